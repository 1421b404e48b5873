//! Remote identity service capability.
//!
//! The phase controllers only talk to [`IdentityService`]; the concrete
//! HTTP client lives in [`fusionauth`]. Tests substitute an in-memory fake.

pub mod fusionauth;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::IdentityServiceError;
use crate::models::TargetUserPayload;

pub use fusionauth::FusionAuthClient;

/// Result of a lookup that may legitimately find nothing.
///
/// "Not found" is a normal answer, kept apart from transport or API errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

/// A user account as reported by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// An existing (user, application) registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRegistration {
    #[serde(default)]
    pub id: Option<String>,
    pub application_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Response to a create-account call. Some deployments answer an import
/// with an empty body, in which case `id` is `None` and the caller must
/// look the account up again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatedUser {
    pub id: Option<String>,
}

/// Operations the migration needs from the identity service.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Cheap reachability probe run before any record is processed.
    async fn check_health(&self) -> Result<(), IdentityServiceError>;

    async fn find_user_by_email(
        &self,
        email: &str,
    ) -> Result<Lookup<RemoteUser>, IdentityServiceError>;

    async fn create_user(
        &self,
        payload: &TargetUserPayload,
    ) -> Result<CreatedUser, IdentityServiceError>;

    async fn find_registration(
        &self,
        user_id: &str,
        app_id: &str,
    ) -> Result<Lookup<RemoteRegistration>, IdentityServiceError>;

    async fn create_registration(
        &self,
        user_id: &str,
        app_id: &str,
        role: &str,
    ) -> Result<(), IdentityServiceError>;
}
