//! Registration phase: enrol every migrated user into each target application.
//!
//! Consumes a finished [`ImportLog`](crate::import::ImportLog). Only outcomes
//! that are `Imported` or `Skipped` and carry a target user id are considered;
//! registration is never attempted for a user absent from the identity service.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::identity::{IdentityService, Lookup};
use crate::models::{
    ImportOutcome, MigrationError, Phase, RegistrationOutcome, RegistrationStatus,
};

/// Append-only result of a registration phase, ordered by user then by
/// application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationLog {
    pub outcomes: Vec<RegistrationOutcome>,
    pub errors: Vec<MigrationError>,
}

/// One unit of registration work.
struct Pair<'o> {
    user: &'o ImportOutcome,
    user_id: &'o str,
    app_id: &'o str,
}

pub struct RegistrationPhase<'a> {
    identity: &'a dyn IdentityService,
    applications: &'a [String],
    dry_run: bool,
    concurrency: usize,
}

impl<'a> RegistrationPhase<'a> {
    pub fn new(
        identity: &'a dyn IdentityService,
        applications: &'a [String],
        dry_run: bool,
        concurrency: usize,
    ) -> Self {
        Self {
            identity,
            applications,
            dry_run,
            concurrency: concurrency.max(1),
        }
    }

    /// Register every eligible user with every configured application.
    pub async fn run<'o, I>(&self, imports: I) -> RegistrationLog
    where
        I: IntoIterator<Item = &'o ImportOutcome>,
    {
        let mut pairs = Vec::new();
        for user in imports {
            let Some(user_id) = user.target_user_id.as_deref() else {
                continue;
            };
            if !user.is_registrable() {
                continue;
            }
            for app_id in self.applications {
                pairs.push(Pair {
                    user,
                    user_id,
                    app_id,
                });
            }
        }
        debug!(pairs = pairs.len(), "registration work planned");

        let results: Vec<_> = stream::iter(pairs.iter())
            .map(|pair| self.register_pair(pair))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut log = RegistrationLog::default();
        for (outcome, error) in results {
            log.outcomes.push(outcome);
            log.errors.extend(error);
        }

        info!(
            processed = log.outcomes.len(),
            errors = log.errors.len(),
            dry_run = self.dry_run,
            "registration phase complete"
        );
        log
    }

    #[instrument(skip(self, pair), fields(source_id = pair.user.source_id, app_id = %pair.app_id))]
    async fn register_pair(
        &self,
        pair: &Pair<'_>,
    ) -> (RegistrationOutcome, Option<MigrationError>) {
        let mut outcome = RegistrationOutcome {
            source_id: pair.user.source_id,
            email: pair.user.email.clone(),
            target_user_id: pair.user_id.to_string(),
            app_id: pair.app_id.to_string(),
            status: RegistrationStatus::Failed,
            message: String::new(),
        };

        match self.identity.find_registration(pair.user_id, pair.app_id).await {
            Ok(Lookup::Found(_)) => {
                debug!("already registered");
                outcome.status = RegistrationStatus::Skipped;
                outcome.message = "already registered".into();
                return (outcome, None);
            }
            Ok(Lookup::NotFound) => {}
            Err(e) => return fail(outcome, format!("registration lookup failed: {}", e)),
        }

        if self.dry_run {
            info!(email = %outcome.email, role = %pair.user.resolved_role, "dry run: would register");
            outcome.status = RegistrationStatus::Skipped;
            outcome.message = "would register".into();
            return (outcome, None);
        }

        match self
            .identity
            .create_registration(pair.user_id, pair.app_id, &pair.user.resolved_role)
            .await
        {
            Ok(()) => {
                info!(email = %outcome.email, role = %pair.user.resolved_role, "registered user");
                outcome.status = RegistrationStatus::Registered;
                outcome.message = format!("registered as {}", pair.user.resolved_role);
                (outcome, None)
            }
            Err(e) => fail(outcome, e.to_string()),
        }
    }
}

fn fail(
    mut outcome: RegistrationOutcome,
    detail: String,
) -> (RegistrationOutcome, Option<MigrationError>) {
    warn!(
        source_id = outcome.source_id,
        app_id = %outcome.app_id,
        detail = %detail,
        "registration failed"
    );
    let error = MigrationError {
        phase: Phase::Registration,
        source_id: outcome.source_id,
        email: outcome.email.clone(),
        app_id: Some(outcome.app_id.clone()),
        detail: detail.clone(),
    };
    outcome.status = RegistrationStatus::Failed;
    outcome.message = detail;
    (outcome, Some(error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_records_app_id() {
        let outcome = RegistrationOutcome {
            source_id: 4,
            email: "u4@example.com".into(),
            target_user_id: "t-4".into(),
            app_id: "app-2".into(),
            status: RegistrationStatus::Registered,
            message: String::new(),
        };
        let (outcome, error) = fail(outcome, "HTTP 500".into());
        assert_eq!(outcome.status, RegistrationStatus::Failed);
        let error = error.unwrap();
        assert_eq!(error.phase, Phase::Registration);
        assert_eq!(error.app_id.as_deref(), Some("app-2"));
        assert_eq!(error.detail, "HTTP 500");
    }
}
