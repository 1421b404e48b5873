//! Legacy level → role resolution.

use std::collections::BTreeMap;

use tracing::warn;

use crate::config::RoleConfig;
use crate::errors::ConfigError;

/// Maps a legacy `level` integer to a target role name.
///
/// Total: every input, including an absent level, resolves to a non-empty
/// role. Unmapped levels fall back to the configured default.
#[derive(Debug, Clone)]
pub struct RoleResolver {
    table: BTreeMap<i64, String>,
    default_role: String,
}

impl RoleResolver {
    /// Build a resolver from the `[roles]` config section.
    ///
    /// Fails on a level key that is not an integer. Blank role names are
    /// dropped so that resolution never yields an empty role;
    /// [`AppConfig::validate`](crate::config::AppConfig::validate) rejects
    /// them before a run starts.
    pub fn new(config: &RoleConfig) -> Result<Self, ConfigError> {
        let mut table = config.level_table()?;
        table.retain(|level, role| {
            let keep = !role.trim().is_empty();
            if !keep {
                warn!(level, "ignoring role table entry with a blank role");
            }
            keep
        });
        let default_role = if config.default_role.trim().is_empty() {
            RoleConfig::default().default_role
        } else {
            config.default_role.clone()
        };
        Ok(Self {
            table,
            default_role,
        })
    }

    pub fn resolve(&self, level: Option<i64>) -> &str {
        level
            .and_then(|l| self.table.get(&l))
            .map(String::as_str)
            .unwrap_or(&self.default_role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_mapped_levels() {
        let resolver = RoleResolver::new(&RoleConfig::default()).unwrap();
        assert_eq!(resolver.resolve(Some(1)), "Global Admin");
        assert_eq!(resolver.resolve(Some(2)), "Rookie");
        assert_eq!(resolver.resolve(Some(5)), "Player");
        assert_eq!(resolver.resolve(Some(6)), "Coach");
    }

    #[test]
    fn test_unmapped_and_absent_levels_fall_back() {
        let resolver = RoleResolver::new(&RoleConfig::default()).unwrap();
        for level in [Some(0), Some(3), Some(4), Some(-1), Some(i64::MAX), None] {
            assert_eq!(resolver.resolve(level), "Rookie", "level {:?}", level);
        }
    }

    #[test]
    fn test_custom_table_and_default() {
        let config = RoleConfig {
            default_role: "Guest".into(),
            levels: BTreeMap::from([
                ("3".to_string(), "Coach".to_string()),
                (" 4 ".to_string(), " ".to_string()),
            ]),
        };
        let resolver = RoleResolver::new(&config).unwrap();
        assert_eq!(resolver.resolve(Some(3)), "Coach");
        assert_eq!(resolver.resolve(Some(4)), "Guest");
        assert_eq!(resolver.resolve(None), "Guest");
    }

    #[test]
    fn test_blank_default_never_returns_empty() {
        let config = RoleConfig {
            default_role: String::new(),
            levels: BTreeMap::new(),
        };
        let resolver = RoleResolver::new(&config).unwrap();
        assert!(!resolver.resolve(Some(9)).is_empty());
    }

    #[test]
    fn test_non_integer_level_is_rejected() {
        let config = RoleConfig {
            default_role: "Rookie".into(),
            levels: BTreeMap::from([("pro".to_string(), "Coach".to_string())]),
        };
        assert!(matches!(
            RoleResolver::new(&config),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "roles.levels"
        ));
    }
}
