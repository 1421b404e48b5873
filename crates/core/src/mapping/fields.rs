//! Source row → create-account payload.
//!
//! [`FieldMapper::map`] is total and side-effect free. Missing or malformed
//! optional values are omitted from the payload; the only invariant the
//! mapper cannot satisfy on its own (a non-empty email) is enforced by the
//! import controller.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

use super::roles::RoleResolver;
use crate::config::MappingConfig;
use crate::models::{Address, PayloadRegistration, SourceUserRecord, TargetUserPayload, UserData};

/// Builds [`TargetUserPayload`]s from [`SourceUserRecord`]s.
#[derive(Debug, Clone)]
pub struct FieldMapper {
    mapping: MappingConfig,
    roles: RoleResolver,
    primary_application: Option<String>,
}

impl FieldMapper {
    /// `primary_application` receives a registration inside the payload
    /// itself; `None` leaves the payload without registrations.
    pub fn new(
        mapping: MappingConfig,
        roles: RoleResolver,
        primary_application: Option<String>,
    ) -> Self {
        Self {
            mapping,
            roles,
            primary_application,
        }
    }

    pub fn roles(&self) -> &RoleResolver {
        &self.roles
    }

    /// Legacy level of a record, if it has one.
    pub fn level_of(&self, record: &SourceUserRecord) -> Option<i64> {
        record.integer(&self.mapping.level_field)
    }

    /// Role the record resolves to.
    pub fn role_of(&self, record: &SourceUserRecord) -> String {
        self.roles.resolve(self.level_of(record)).to_string()
    }

    /// Email as it will be submitted. Empty when the column is missing.
    pub fn email_of(&self, record: &SourceUserRecord) -> String {
        record
            .text(&self.mapping.email_field)
            .map(|e| e.trim().to_string())
            .unwrap_or_default()
    }

    pub fn username_of(&self, record: &SourceUserRecord) -> Option<String> {
        record.text(&self.mapping.username_field)
    }

    pub fn map(&self, record: &SourceUserRecord) -> TargetUserPayload {
        let m = &self.mapping;
        let level = self.level_of(record);
        let role = self.roles.resolve(level).to_string();

        let verified = record.get(&m.confirmed_field).map(truthy).unwrap_or(false);
        let active = record.get(&m.active_field).map(truthy).unwrap_or(true);

        let first_name = record.text(&m.first_name_field);
        let middle_name = record.text(&m.middle_name_field);
        let last_name = record.text(&m.last_name_field);
        let full = full_name(
            first_name.as_deref().unwrap_or(""),
            middle_name.as_deref().unwrap_or(""),
            last_name.as_deref().unwrap_or(""),
        );

        let image_url = record
            .text(&m.avatar_field)
            .and_then(|path| image_url(m.image_base_url.as_deref(), &path));

        let birth_date = record.get(&m.birth_date_field).and_then(iso_date);

        let address = Address {
            street: record.text(&m.street_field),
            city: record.text(&m.city_field),
            state: record.text(&m.state_field),
            zip: record.text(&m.zip_field),
            country: record.text(&m.country_field),
        };

        let mut extra = BTreeMap::new();
        for column in &m.passthrough {
            // Claimed columns and typed keys never reach the bag.
            if !m.is_passthrough_allowed(column) {
                continue;
            }
            if let Some(value) = record.get(column) {
                extra.insert(column.clone(), value.clone());
            }
        }

        let registrations = self
            .primary_application
            .iter()
            .map(|app| PayloadRegistration {
                application_id: app.clone(),
                roles: vec![role.clone()],
                verified: true,
            })
            .collect();

        TargetUserPayload {
            email: self.email_of(record),
            username: self.username_of(record),
            password: record.text(&m.password_field).unwrap_or_default(),
            salt: record.text(&m.salt_field),
            encryption_scheme: m.encryption_scheme.clone(),
            factor: m.factor,
            password_change_required: false,
            verified,
            active,
            first_name,
            middle_name,
            last_name,
            full_name: if full.is_empty() { None } else { Some(full) },
            image_url,
            birth_date,
            mobile_phone: record.text(&m.phone_field),
            data: UserData {
                source_id: record.id,
                user_level: level,
                role,
                address: if address.is_empty() { None } else { Some(address) },
                extra,
            },
            registrations,
        }
    }
}

/// Coerce a legacy flag to a strict boolean.
///
/// Non-zero numbers and `1/true/yes/y/on/t` (any case) are true; everything
/// else, including unrecognised strings, is false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on" | "t"
        ),
        _ => false,
    }
}

/// Join name parts with single spaces, skipping empty ones.
pub fn full_name(first: &str, middle: &str, last: &str) -> String {
    [first, middle, last]
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve an avatar path against the web base URL.
///
/// Already-absolute URLs pass through; a relative path without a base URL
/// yields nothing rather than a broken link.
pub fn image_url(base: Option<&str>, path: &str) -> Option<String> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    if path.starts_with("http://") || path.starts_with("https://") {
        return Some(path.to_string());
    }
    let base = base?.trim();
    if base.is_empty() {
        return None;
    }
    Some(format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
}

/// Reformat a legacy temporal value as `YYYY-MM-DD`.
///
/// Accepts plain dates, `YYYY-MM-DD HH:MM:SS` datetimes, RFC 3339 strings and
/// integer unix timestamps. Anything else (including MySQL's `0000-00-00`)
/// is omitted.
pub fn iso_date(value: &Value) -> Option<String> {
    let date = match value {
        Value::String(s) => parse_date_str(s.trim())?,
        Value::Number(n) => DateTime::from_timestamp(n.as_i64()?, 0)?.date_naive(),
        _ => return None,
    };
    Some(date.format("%Y-%m-%d").to_string())
}

fn parse_date_str(s: &str) -> Option<NaiveDate> {
    if s.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoleConfig;
    use serde_json::json;

    fn mapper() -> FieldMapper {
        let mapping = MappingConfig {
            image_base_url: Some("https://img.example/".into()),
            ..MappingConfig::default()
        };
        FieldMapper::new(
            mapping,
            RoleResolver::new(&RoleConfig::default()).unwrap(),
            Some("app-primary".into()),
        )
    }

    fn record(pairs: &[(&str, Value)]) -> SourceUserRecord {
        let fields = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        SourceUserRecord::new(42, fields)
    }

    fn full_record() -> SourceUserRecord {
        record(&[
            ("id", json!(42)),
            ("email", json!(" jo@example.com ")),
            ("username", json!("jolee")),
            ("password", json!("df6cb6dad23e6f5d98e3edfe7f3492a1")),
            ("salt", json!("18f")),
            ("first_name", json!("Jo")),
            ("middle_name", json!("")),
            ("last_name", json!("Lee")),
            ("confirmed", json!(1)),
            ("active", json!("0")),
            ("level", json!(6)),
            ("avatar", json!("u/1.png")),
            ("birthdate", json!("1990-05-17 00:00:00")),
            ("phone_number", json!("555-0100")),
            ("street_address", json!("1 Main St")),
            ("city_address", json!("Springfield")),
            ("zip_code", json!("12345")),
            ("company", json!("Acme")),
            ("jersey_number", json!(23)),
            ("title", Value::Null),
            ("internal_notes", json!("do not leak")),
        ])
    }

    #[test]
    fn test_map_full_record() {
        let payload = mapper().map(&full_record());

        assert_eq!(payload.email, "jo@example.com");
        assert_eq!(payload.username.as_deref(), Some("jolee"));
        assert_eq!(payload.password, "df6cb6dad23e6f5d98e3edfe7f3492a1");
        assert_eq!(payload.salt.as_deref(), Some("18f"));
        assert_eq!(payload.encryption_scheme, "leaguejoe-password-encryptor");
        assert_eq!(payload.factor, 1);
        assert!(payload.verified);
        assert!(!payload.active);
        assert_eq!(payload.full_name.as_deref(), Some("Jo Lee"));
        assert_eq!(payload.middle_name, None);
        assert_eq!(
            payload.image_url.as_deref(),
            Some("https://img.example/u/1.png")
        );
        assert_eq!(payload.birth_date.as_deref(), Some("1990-05-17"));
        assert_eq!(payload.mobile_phone.as_deref(), Some("555-0100"));

        assert_eq!(payload.data.source_id, 42);
        assert_eq!(payload.data.user_level, Some(6));
        assert_eq!(payload.data.role, "Coach");
        let address = payload.data.address.as_ref().unwrap();
        assert_eq!(address.city.as_deref(), Some("Springfield"));
        assert_eq!(address.state, None);

        assert_eq!(payload.data.extra.get("company"), Some(&json!("Acme")));
        assert_eq!(payload.data.extra.get("jersey_number"), Some(&json!(23)));
        assert!(!payload.data.extra.contains_key("title"));
        assert!(!payload.data.extra.contains_key("internal_notes"));
        assert!(!payload.data.extra.contains_key("salt"));

        assert_eq!(payload.registrations.len(), 1);
        assert_eq!(payload.registrations[0].application_id, "app-primary");
        assert_eq!(payload.registrations[0].roles, vec!["Coach"]);
    }

    #[test]
    fn test_map_sparse_record_defaults() {
        let payload = mapper().map(&record(&[("email", json!("x@example.com"))]));
        assert!(!payload.verified);
        assert!(payload.active);
        assert_eq!(payload.full_name, None);
        assert_eq!(payload.image_url, None);
        assert_eq!(payload.birth_date, None);
        assert_eq!(payload.data.address, None);
        assert_eq!(payload.data.user_level, None);
        assert_eq!(payload.data.role, "Rookie");
        assert_eq!(payload.password, "");
    }

    #[test]
    fn test_missing_email_maps_to_empty_string() {
        let payload = mapper().map(&record(&[("username", json!("ghost"))]));
        assert_eq!(payload.email, "");
    }

    #[test]
    fn test_claimed_columns_never_enter_data_bag() {
        let mapping = MappingConfig {
            passthrough: vec!["salt".into(), "role".into(), "email".into(), "company".into()],
            ..MappingConfig::default()
        };
        let mapper = FieldMapper::new(mapping, RoleResolver::new(&RoleConfig::default()).unwrap(), None);
        let payload = mapper.map(&record(&[
            ("email", json!("a@example.com")),
            ("salt", json!("abc")),
            ("level", json!(6)),
            ("role", json!("superuser")),
            ("company", json!("Acme")),
        ]));
        assert_eq!(payload.data.extra.keys().collect::<Vec<_>>(), vec!["company"]);
        assert_eq!(payload.salt.as_deref(), Some("abc"));
        assert!(payload.registrations.is_empty());

        // The derived role survives serialization; no duplicate keys.
        let text = serde_json::to_string(&payload.data).unwrap();
        assert_eq!(text.matches("\"role\"").count(), 1);
        let data = serde_json::to_value(&payload.data).unwrap();
        assert_eq!(data["role"], "Coach");
        assert!(data.get("email").is_none());
    }

    #[test]
    fn test_configurable_column_names() {
        let mapping = MappingConfig {
            email_field: "mail".into(),
            level_field: "tier".into(),
            ..MappingConfig::default()
        };
        let mapper = FieldMapper::new(mapping, RoleResolver::new(&RoleConfig::default()).unwrap(), None);
        let payload = mapper.map(&record(&[("mail", json!("m@example.com")), ("tier", json!("1"))]));
        assert_eq!(payload.email, "m@example.com");
        assert_eq!(payload.data.role, "Global Admin");
    }

    #[test]
    fn test_full_name() {
        assert_eq!(full_name("Jo", "", "Lee"), "Jo Lee");
        assert_eq!(full_name("Jo", "Ann", "Lee"), "Jo Ann Lee");
        assert_eq!(full_name("", "", ""), "");
        assert_eq!(full_name(" ", "Ann", ""), "Ann");
    }

    #[test]
    fn test_image_url() {
        assert_eq!(
            image_url(Some("https://img.example/"), "u/1.png").as_deref(),
            Some("https://img.example/u/1.png")
        );
        assert_eq!(
            image_url(Some("https://img.example"), "/u/1.png").as_deref(),
            Some("https://img.example/u/1.png")
        );
        assert_eq!(
            image_url(None, "https://cdn.example/a.png").as_deref(),
            Some("https://cdn.example/a.png")
        );
        assert_eq!(image_url(None, "u/1.png"), None);
        assert_eq!(image_url(Some("https://img.example/"), ""), None);
    }

    #[test]
    fn test_truthy() {
        for v in [json!(true), json!(1), json!(2), json!("1"), json!("TRUE"), json!("yes")] {
            assert!(truthy(&v), "{v}");
        }
        for v in [json!(false), json!(0), json!("0"), json!(""), json!("no"), json!("maybe"), Value::Null] {
            assert!(!truthy(&v), "{v}");
        }
    }

    #[test]
    fn test_iso_date() {
        assert_eq!(iso_date(&json!("1990-05-17")).as_deref(), Some("1990-05-17"));
        assert_eq!(iso_date(&json!("1990-05-17 13:45:00")).as_deref(), Some("1990-05-17"));
        assert_eq!(
            iso_date(&json!("1990-05-17T13:45:00+02:00")).as_deref(),
            Some("1990-05-17")
        );
        assert_eq!(iso_date(&json!(0)).as_deref(), Some("1970-01-01"));
        assert_eq!(iso_date(&json!("0000-00-00")), None);
        assert_eq!(iso_date(&json!("not a date")), None);
        assert_eq!(iso_date(&json!("")), None);
        assert_eq!(iso_date(&json!(true)), None);
    }
}
