//! TOML-based configuration system for usermigrate.
//!
//! All sensitive values (API keys) are stored as `_env` fields that reference
//! environment variable names. The actual secrets are resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::models::UserData;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Relational source of user records.
    pub source: SourceConfig,

    /// Target identity service.
    pub identity: IdentityServiceConfig,

    /// Source column → payload field mapping.
    #[serde(default)]
    pub mapping: MappingConfig,

    /// Level → role table.
    #[serde(default)]
    pub roles: RoleConfig,

    /// Logging and execution settings.
    #[serde(default)]
    pub run: RunConfig,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Where the legacy user table lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to the SQLite database holding the exported user table.
    pub path: PathBuf,

    /// Table name (default `users`).
    #[serde(default = "default_table")]
    pub table: String,

    /// Stable primary key column used for ordering (default `id`).
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Records fetched per page (default 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_table() -> String {
    "users".into()
}
fn default_id_column() -> String {
    "id".into()
}
fn default_batch_size() -> u32 {
    100
}

// ---------------------------------------------------------------------------
// Identity service
// ---------------------------------------------------------------------------

/// Identity service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityServiceConfig {
    /// Base URL of the identity service (default `http://localhost:9011`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Tenant every call is scoped to.
    pub tenant_id: String,

    /// Per-request timeout in seconds (default 30).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Verify the server's TLS certificate (default true).
    #[serde(default = "default_true")]
    pub verify_tls: bool,

    /// Target application ids. The first one is the primary application.
    #[serde(default)]
    pub applications: Vec<String>,

    /// Resolved API key (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub api_key: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:9011".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl IdentityServiceConfig {
    /// The application that receives the registration embedded in the
    /// create-account payload.
    pub fn primary_application(&self) -> Option<&str> {
        self.applications.first().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Field mapping
// ---------------------------------------------------------------------------

/// Names of the source columns feeding each first-class payload field, plus
/// the explicit list of columns copied verbatim into the free-form data bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub email_field: String,
    pub username_field: String,
    pub password_field: String,
    pub salt_field: String,
    pub first_name_field: String,
    pub middle_name_field: String,
    pub last_name_field: String,
    pub confirmed_field: String,
    pub active_field: String,
    pub level_field: String,
    pub avatar_field: String,
    pub birth_date_field: String,
    pub phone_field: String,
    pub street_field: String,
    pub city_field: String,
    pub state_field: String,
    pub zip_field: String,
    pub country_field: String,

    /// Columns copied unchanged into the payload's `data` bag, in order.
    pub passthrough: Vec<String>,

    /// Prefix turning a relative avatar path into an absolute image URL.
    pub image_base_url: Option<String>,

    /// Password encryption scheme the identity service verifies against.
    pub encryption_scheme: String,

    /// Cost factor of the encryption scheme.
    pub factor: u32,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            email_field: "email".into(),
            username_field: "username".into(),
            password_field: "password".into(),
            salt_field: "salt".into(),
            first_name_field: "first_name".into(),
            middle_name_field: "middle_name".into(),
            last_name_field: "last_name".into(),
            confirmed_field: "confirmed".into(),
            active_field: "active".into(),
            level_field: "level".into(),
            avatar_field: "avatar".into(),
            birth_date_field: "birthdate".into(),
            phone_field: "phone_number".into(),
            street_field: "street_address".into(),
            city_field: "city_address".into(),
            state_field: "state_address".into(),
            zip_field: "zip_code".into(),
            country_field: "country".into(),
            passthrough: [
                "user_url",
                "gender",
                "company",
                "jersey_name",
                "jersey_number",
                "title",
                "approved",
                "created",
                "updated",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            image_base_url: None,
            encryption_scheme: "leaguejoe-password-encryptor".into(),
            factor: 1,
        }
    }
}

impl MappingConfig {
    /// Every source column claimed by an explicit mapping rule, with the
    /// setting that claims it.
    pub fn claimed_columns(&self) -> [(&'static str, &str); 18] {
        [
            ("mapping.email_field", self.email_field.as_str()),
            ("mapping.username_field", self.username_field.as_str()),
            ("mapping.password_field", self.password_field.as_str()),
            ("mapping.salt_field", self.salt_field.as_str()),
            ("mapping.first_name_field", self.first_name_field.as_str()),
            ("mapping.middle_name_field", self.middle_name_field.as_str()),
            ("mapping.last_name_field", self.last_name_field.as_str()),
            ("mapping.confirmed_field", self.confirmed_field.as_str()),
            ("mapping.active_field", self.active_field.as_str()),
            ("mapping.level_field", self.level_field.as_str()),
            ("mapping.avatar_field", self.avatar_field.as_str()),
            ("mapping.birth_date_field", self.birth_date_field.as_str()),
            ("mapping.phone_field", self.phone_field.as_str()),
            ("mapping.street_field", self.street_field.as_str()),
            ("mapping.city_field", self.city_field.as_str()),
            ("mapping.state_field", self.state_field.as_str()),
            ("mapping.zip_field", self.zip_field.as_str()),
            ("mapping.country_field", self.country_field.as_str()),
        ]
    }

    /// Whether `column` may be copied into the data bag: it is neither
    /// claimed by a mapping rule nor one of the typed data keys.
    pub fn is_passthrough_allowed(&self, column: &str) -> bool {
        !UserData::RESERVED_KEYS.contains(&column)
            && !self.claimed_columns().iter().any(|(_, c)| *c == column)
    }
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Level → role table with a fixed fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Role for absent or unmapped levels (default `Rookie`).
    #[serde(default = "default_role")]
    pub default_role: String,

    /// Explicit level → role entries. TOML table keys are strings, so levels
    /// are parsed when the table is read.
    #[serde(default = "default_levels")]
    pub levels: BTreeMap<String, String>,
}

fn default_role() -> String {
    "Rookie".into()
}

fn default_levels() -> BTreeMap<String, String> {
    [("1", "Global Admin"), ("2", "Rookie"), ("5", "Player"), ("6", "Coach")]
        .iter()
        .map(|(level, role)| (level.to_string(), role.to_string()))
        .collect()
}

impl RoleConfig {
    /// Parse the level table into integer keys.
    pub fn level_table(&self) -> Result<BTreeMap<i64, String>, ConfigError> {
        self.levels
            .iter()
            .map(|(level, role)| {
                let parsed = level.trim().parse::<i64>().map_err(|_| {
                    invalid("roles.levels", &format!("level '{}' is not an integer", level))
                })?;
                Ok((parsed, role.clone()))
            })
            .collect()
    }
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            default_role: default_role(),
            levels: default_levels(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Logging and execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file receiving a copy of the structured log.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Maximum in-flight identity-service calls within a phase (default 1).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_concurrency() -> usize {
    1
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
            concurrency: default_concurrency(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// The identity-service API key is required: a run cannot authenticate
    /// without it.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        self.identity.api_key =
            resolve_optional_env(&self.identity.api_key_env, "identity.api_key_env");
        if self.identity.api_key.is_none() {
            return Err(ConfigError::EnvVarMissing {
                var: self.identity.api_key_env.clone(),
                field: "identity.api_key_env".into(),
            });
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.batch_size == 0 {
            return Err(invalid("source.batch_size", "batch size must be > 0"));
        }
        check_identifier("source.table", &self.source.table)?;
        check_identifier("source.id_column", &self.source.id_column)?;

        if self.identity.base_url.is_empty() {
            return Err(invalid("identity.base_url", "base URL must not be empty"));
        }
        if self.identity.tenant_id.is_empty() {
            return Err(invalid("identity.tenant_id", "tenant id must not be empty"));
        }
        if self.identity.applications.is_empty() {
            return Err(invalid(
                "identity.applications",
                "at least one target application is required",
            ));
        }
        if self.identity.applications.iter().any(|a| a.trim().is_empty()) {
            return Err(invalid(
                "identity.applications",
                "application ids must not be empty",
            ));
        }

        check_identifier("mapping.email_field", &self.mapping.email_field)?;
        check_identifier("mapping.confirmed_field", &self.mapping.confirmed_field)?;
        check_identifier("mapping.level_field", &self.mapping.level_field)?;
        self.validate_passthrough()?;

        if self.roles.default_role.trim().is_empty() {
            return Err(invalid("roles.default_role", "default role must not be empty"));
        }
        let levels = self.roles.level_table()?;
        if let Some((level, _)) = levels.iter().find(|(_, role)| role.trim().is_empty())
        {
            return Err(invalid(
                "roles.levels",
                &format!("role for level {} must not be empty", level),
            ));
        }

        if self.run.concurrency == 0 {
            return Err(invalid("run.concurrency", "concurrency must be > 0"));
        }

        Ok(())
    }

    fn validate_passthrough(&self) -> Result<(), ConfigError> {
        for column in &self.mapping.passthrough {
            if UserData::RESERVED_KEYS.contains(&column.as_str()) {
                return Err(invalid(
                    "mapping.passthrough",
                    &format!("'{}' is a reserved data key", column),
                ));
            }
            if let Some((setting, _)) = self
                .mapping
                .claimed_columns()
                .iter()
                .find(|(_, c)| *c == column.as_str())
            {
                return Err(invalid(
                    "mapping.passthrough",
                    &format!("column '{}' is already mapped by {}", column, setting),
                ));
            }
            if *column == self.source.id_column {
                return Err(invalid(
                    "mapping.passthrough",
                    &format!("column '{}' is the source key", column),
                ));
            }
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

/// Table and column names are interpolated into SQL, so only plain
/// identifiers are accepted.
fn check_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(invalid(field, "must be a plain [A-Za-z0-9_] identifier"))
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[source]
path = "/var/lib/usermigrate/legacy.db"
table = "users"
batch_size = 50

[identity]
base_url = "https://auth.example.com"
api_key_env = "FUSIONAUTH_API_KEY"
tenant_id = "8f2c6a4e-0000-4000-8000-000000000001"
timeout_secs = 10
verify_tls = false
applications = ["45562ca3-d36c-4d0a-af6f-c0c5abfffffd", "app-two"]

[mapping]
image_base_url = "https://img.example/"
passthrough = ["company", "jersey_number"]

[roles]
default_role = "Rookie"

[roles.levels]
1 = "Global Admin"
7 = "Scout"

[run]
log_level = "debug"
concurrency = 4
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.source.batch_size, 50);
        assert_eq!(config.identity.timeout_secs, 10);
        assert!(!config.identity.verify_tls);
        assert_eq!(
            config.identity.primary_application(),
            Some("45562ca3-d36c-4d0a-af6f-c0c5abfffffd")
        );
        assert_eq!(config.mapping.passthrough, vec!["company", "jersey_number"]);
        assert_eq!(config.mapping.email_field, "email");
        let levels = config.roles.level_table().unwrap();
        assert_eq!(levels.get(&7).map(String::as_str), Some("Scout"));
        assert_eq!(config.run.concurrency, 4);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usermigrate.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.run.log_level, "debug");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/usermigrate.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_missing_applications() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.identity.applications.clear();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "identity.applications"
        ));
    }

    #[test]
    fn test_validate_rejects_sql_in_table_name() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.source.table = "users; DROP TABLE users".into();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "source.table"
        ));
    }

    #[test]
    fn test_validate_rejects_empty_role_name() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.roles.levels.insert("3".into(), "  ".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_integer_level() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.roles.levels.insert("pro".into(), "Coach".into());
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "roles.levels"
        ));
    }

    #[test]
    fn test_validate_rejects_reserved_passthrough_key() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.mapping.passthrough.push("role".into());
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, ref detail }
                if field == "mapping.passthrough" && detail.contains("reserved")
        ));
    }

    #[test]
    fn test_validate_rejects_mapped_column_in_passthrough() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.mapping.passthrough.push("email".into());
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, ref detail }
                if field == "mapping.passthrough" && detail.contains("mapping.email_field")
        ));

        // A renamed rule frees the old column name.
        config.mapping.email_field = "email_address".into();
        assert!(config.validate().is_ok());
        assert!(!config.mapping.is_passthrough_allowed("email_address"));
        assert!(config.mapping.is_passthrough_allowed("email"));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("TEST_USERMIGRATE_KEY", "k-123");

        let toml_str = r#"
[source]
path = "legacy.db"
[identity]
api_key_env = "TEST_USERMIGRATE_KEY"
tenant_id = "t1"
applications = ["a1"]
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        config.resolve_env_vars().unwrap();
        assert_eq!(config.identity.api_key.as_deref(), Some("k-123"));

        std::env::remove_var("TEST_USERMIGRATE_KEY");
    }

    #[test]
    fn test_resolve_env_vars_requires_api_key() {
        let toml_str = r#"
[source]
path = "legacy.db"
[identity]
api_key_env = "TEST_USERMIGRATE_KEY_UNSET"
tenant_id = "t1"
applications = ["a1"]
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        let result = config.resolve_env_vars();
        assert!(matches!(result, Err(ConfigError::EnvVarMissing { .. })));
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[source]
path = "legacy.db"
[identity]
api_key_env = "KEY"
tenant_id = "t1"
applications = ["a1"]
"#;
        let config: AppConfig = toml::from_str(minimal).unwrap();
        assert_eq!(config.source.table, "users");
        assert_eq!(config.source.id_column, "id");
        assert_eq!(config.source.batch_size, 100);
        assert_eq!(config.identity.base_url, "http://localhost:9011");
        assert!(config.identity.verify_tls);
        assert_eq!(config.roles.default_role, "Rookie");
        assert_eq!(config.roles.levels.get("1").map(String::as_str), Some("Global Admin"));
        assert_eq!(config.mapping.encryption_scheme, "leaguejoe-password-encryptor");
        assert_eq!(config.mapping.factor, 1);
        assert_eq!(config.run.concurrency, 1);
        assert!(config.validate().is_ok());
    }
}
