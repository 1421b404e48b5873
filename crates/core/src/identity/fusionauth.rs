//! FusionAuth REST API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::{CreatedUser, IdentityService, Lookup, RemoteRegistration, RemoteUser};
use crate::config::IdentityServiceConfig;
use crate::errors::IdentityServiceError;
use crate::models::TargetUserPayload;

const TENANT_HEADER: &str = "X-FusionAuth-TenantId";

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: RemoteUser,
}

#[derive(Debug, Deserialize)]
struct RegistrationEnvelope {
    registration: RemoteRegistration,
}

/// Asynchronous FusionAuth client scoped to a single tenant.
#[derive(Clone)]
pub struct FusionAuthClient {
    http: reqwest::Client,
    base_url: String,
}

impl FusionAuthClient {
    /// Build a client from resolved settings. Fails when the API key has not
    /// been resolved or cannot be sent as a header.
    pub fn new(config: &IdentityServiceConfig) -> Result<Self, IdentityServiceError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let api_key = config.api_key.as_deref().ok_or_else(|| {
            IdentityServiceError::AuthenticationFailed(format!(
                "API key not resolved from ${}",
                config.api_key_env
            ))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("usermigrate/0.1"));
        let mut key = HeaderValue::from_str(api_key).map_err(|_| {
            IdentityServiceError::AuthenticationFailed(
                "API key contains characters not allowed in a header".into(),
            )
        })?;
        key.set_sensitive(true);
        headers.insert(AUTHORIZATION, key);
        let tenant = HeaderValue::from_str(&config.tenant_id).map_err(|_| {
            IdentityServiceError::ParseError(format!("invalid tenant id '{}'", config.tenant_id))
        })?;
        headers.insert(TENANT_HEADER, tenant);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;
        info!(base_url = %base_url, tenant = %config.tenant_id, "created FusionAuthClient");
        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Pass successful responses through; turn everything else into an error
    /// carrying whatever message the body holds.
    async fn check_response(
        &self,
        resp: reqwest::Response,
    ) -> Result<reqwest::Response, IdentityServiceError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(api_error(status, &body))
    }
}

#[async_trait]
impl IdentityService for FusionAuthClient {
    #[instrument(skip(self))]
    async fn check_health(&self) -> Result<(), IdentityServiceError> {
        let resp = self.http.get(self.url("/api/status")).send().await?;
        self.check_response(resp).await?;
        debug!("identity service is healthy");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_user_by_email(
        &self,
        email: &str,
    ) -> Result<Lookup<RemoteUser>, IdentityServiceError> {
        let resp = self
            .http
            .get(self.url("/api/user"))
            .query(&[("email", email)])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Lookup::NotFound);
        }
        let resp = self.check_response(resp).await?;
        let envelope: UserEnvelope = resp
            .json()
            .await
            .map_err(|e| IdentityServiceError::ParseError(format!("user lookup: {}", e)))?;
        debug!(user_id = %envelope.user.id, "found user");
        Ok(Lookup::Found(envelope.user))
    }

    #[instrument(skip(self, payload), fields(email = %payload.email))]
    async fn create_user(
        &self,
        payload: &TargetUserPayload,
    ) -> Result<CreatedUser, IdentityServiceError> {
        let body = serde_json::json!({
            "users": [payload],
            "validateDbConstraints": true,
        });
        let resp = self
            .http
            .post(self.url("/api/user/import"))
            .json(&body)
            .send()
            .await?;
        let resp = self.check_response(resp).await?;
        let text = resp.text().await?;
        let created = CreatedUser {
            id: created_user_id(&text),
        };
        info!(user_id = ?created.id, "imported user");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn find_registration(
        &self,
        user_id: &str,
        app_id: &str,
    ) -> Result<Lookup<RemoteRegistration>, IdentityServiceError> {
        let url = self.url(&format!("/api/user/registration/{}/{}", user_id, app_id));
        let resp = self.http.get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Lookup::NotFound);
        }
        let resp = self.check_response(resp).await?;
        let envelope: RegistrationEnvelope = resp
            .json()
            .await
            .map_err(|e| IdentityServiceError::ParseError(format!("registration lookup: {}", e)))?;
        Ok(Lookup::Found(envelope.registration))
    }

    #[instrument(skip(self))]
    async fn create_registration(
        &self,
        user_id: &str,
        app_id: &str,
        role: &str,
    ) -> Result<(), IdentityServiceError> {
        let url = self.url(&format!("/api/user/registration/{}", user_id));
        let body = registration_body(app_id, role);
        let resp = self.http.post(url).json(&body).send().await?;
        self.check_response(resp).await?;
        info!("created registration");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn registration_body(app_id: &str, role: &str) -> Value {
    serde_json::json!({
        "registration": {
            "applicationId": app_id,
            "roles": [role],
            "verified": true,
        }
    })
}

/// Pull a user id out of a create/import response, if the server sent one.
fn created_user_id(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/user/id")
        .or_else(|| value.pointer("/users/0/id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Map a non-success status and its body to an error.
///
/// FusionAuth reports problems as `fieldErrors` keyed by field plus a list
/// of `generalErrors`; both are flattened into the message.
fn api_error(status: StatusCode, body: &str) -> IdentityServiceError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return IdentityServiceError::AuthenticationFailed(format!("HTTP {}", status));
    }

    let mut messages = Vec::new();
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(fields) = value.get("fieldErrors").and_then(Value::as_object) {
            for (field, errors) in fields {
                for err in errors.as_array().into_iter().flatten() {
                    if let Some(msg) = err.get("message").and_then(Value::as_str) {
                        messages.push(format!("{}: {}", field, msg));
                    }
                }
            }
        }
        for err in value
            .get("generalErrors")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(msg) = err.get("message").and_then(Value::as_str) {
                messages.push(msg.to_string());
            }
        }
    }

    let message = if !messages.is_empty() {
        messages.join("; ")
    } else if !body.trim().is_empty() {
        body.trim().chars().take(200).collect()
    } else {
        format!("HTTP {}", status)
    };

    IdentityServiceError::ApiError {
        status: status.as_u16(),
        message,
    }
}
