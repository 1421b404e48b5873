//! Domain model types used throughout usermigrate.
//!
//! These types bridge the source store, the field mapper, both phase
//! controllers and the final report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Source records
// ---------------------------------------------------------------------------

/// One row of the legacy user table: column name → value.
///
/// Immutable once read; the phase that fetched it owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUserRecord {
    /// Stable primary key the cursor orders by.
    pub id: i64,
    fields: BTreeMap<String, Value>,
}

impl SourceUserRecord {
    pub fn new(id: i64, fields: BTreeMap<String, Value>) -> Self {
        Self { id, fields }
    }

    /// Raw column value. Absent columns and SQL `NULL` both yield `None`.
    pub fn get(&self, column: &str) -> Option<&Value> {
        match self.fields.get(column) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v),
        }
    }

    /// Column rendered as text. Numbers and booleans are stringified;
    /// empty strings count as absent.
    pub fn text(&self, column: &str) -> Option<String> {
        let s = match self.get(column)? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        if s.trim().is_empty() {
            None
        } else {
            Some(s)
        }
    }

    /// Column as an integer, accepting numeric strings.
    pub fn integer(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Target payload
// ---------------------------------------------------------------------------

/// The create-account payload sent to the identity service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetUserPayload {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Pre-hashed password, passed through unmodified.
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    pub encryption_scheme: String,
    pub factor: u32,
    pub password_change_required: bool,
    pub verified: bool,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// `YYYY-MM-DD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile_phone: Option<String>,
    pub data: UserData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registrations: Vec<PayloadRegistration>,
}

impl TargetUserPayload {
    /// Copy with password material blanked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.password = "<redacted>".into();
        if copy.salt.is_some() {
            copy.salt = Some("<redacted>".into());
        }
        copy
    }
}

/// Free-form `data` bag: typed derived fields plus the pass-through columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    /// Primary key in the legacy table.
    pub source_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_level: Option<i64>,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl UserData {
    /// Keys of the typed fields. A pass-through column may not use them.
    pub const RESERVED_KEYS: [&'static str; 4] = ["source_id", "user_level", "role", "address"];
}

/// Postal address, nested under `data.address`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        self.street.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.zip.is_none()
            && self.country.is_none()
    }
}

/// Registration embedded in the create-account payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadRegistration {
    pub application_id: String,
    pub roles: Vec<String>,
    pub verified: bool,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of processing one source record in the import phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Imported,
    Skipped,
    Failed,
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Imported => write!(f, "imported"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One entry of the import log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub source_id: i64,
    pub email: String,
    pub username: Option<String>,
    pub status: ImportStatus,
    pub message: String,
    pub target_user_id: Option<String>,
    pub resolved_role: String,
    /// Payload that would have been sent; only kept for dry runs and never
    /// persisted with the log.
    #[serde(skip)]
    pub payload: Option<TargetUserPayload>,
}

impl ImportOutcome {
    /// Whether the registration phase may act on this user.
    pub fn is_registrable(&self) -> bool {
        matches!(self.status, ImportStatus::Imported | ImportStatus::Skipped)
            && self.target_user_id.is_some()
    }
}

/// Result of one (user, application) registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Registered,
    Skipped,
    Failed,
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registered => write!(f, "registered"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One entry of the registration log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationOutcome {
    pub source_id: i64,
    pub email: String,
    pub target_user_id: String,
    pub app_id: String,
    pub status: RegistrationStatus,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Errors recorded during a run
// ---------------------------------------------------------------------------

/// Which phase produced a [`MigrationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Import,
    Registration,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Import => write!(f, "import"),
            Self::Registration => write!(f, "registration"),
        }
    }
}

/// A per-record or per-registration failure. Collected, never discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationError {
    pub phase: Phase,
    pub source_id: i64,
    pub email: String,
    pub app_id: Option<String>,
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> SourceUserRecord {
        let fields = BTreeMap::from([
            ("email".to_string(), json!("jo@example.com")),
            ("level".to_string(), json!("5")),
            ("jersey_number".to_string(), json!(23)),
            ("middle_name".to_string(), json!("")),
            ("avatar".to_string(), Value::Null),
        ]);
        SourceUserRecord::new(7, fields)
    }

    #[test]
    fn test_record_accessors() {
        let r = record();
        assert_eq!(r.text("email").as_deref(), Some("jo@example.com"));
        assert_eq!(r.text("jersey_number").as_deref(), Some("23"));
        assert_eq!(r.integer("level"), Some(5));
        assert_eq!(r.text("middle_name"), None);
        assert_eq!(r.get("avatar"), None);
        assert_eq!(r.get("missing"), None);
    }

    #[test]
    fn test_payload_serializes_camel_case() {
        let payload = TargetUserPayload {
            email: "jo@example.com".into(),
            username: None,
            password: "abc".into(),
            salt: Some("18f".into()),
            encryption_scheme: "scheme".into(),
            factor: 1,
            password_change_required: false,
            verified: true,
            active: true,
            first_name: Some("Jo".into()),
            middle_name: None,
            last_name: None,
            full_name: Some("Jo".into()),
            image_url: None,
            birth_date: Some("1990-05-17".into()),
            mobile_phone: None,
            data: UserData {
                source_id: 7,
                user_level: Some(5),
                role: "Player".into(),
                address: None,
                extra: BTreeMap::from([("company".to_string(), json!("Acme"))]),
            },
            registrations: vec![PayloadRegistration {
                application_id: "app".into(),
                roles: vec!["Player".into()],
                verified: true,
            }],
        };
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(v["encryptionScheme"], "scheme");
        assert_eq!(v["birthDate"], "1990-05-17");
        assert_eq!(v["data"]["company"], "Acme");
        assert_eq!(v["data"]["role"], "Player");
        assert_eq!(v["registrations"][0]["applicationId"], "app");
        assert!(v.get("imageUrl").is_none());

        let redacted = payload.redacted();
        assert_eq!(redacted.password, "<redacted>");
        assert_eq!(redacted.salt.as_deref(), Some("<redacted>"));
    }

    #[test]
    fn test_registrable_requires_target_id() {
        let mut outcome = ImportOutcome {
            source_id: 1,
            email: "a@example.com".into(),
            username: None,
            status: ImportStatus::Skipped,
            message: "dry run".into(),
            target_user_id: None,
            resolved_role: "Rookie".into(),
            payload: None,
        };
        assert!(!outcome.is_registrable());
        outcome.target_user_id = Some("u-1".into());
        assert!(outcome.is_registrable());
        outcome.status = ImportStatus::Failed;
        assert!(!outcome.is_registrable());
    }
}
