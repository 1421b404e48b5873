//! Import phase: create each source user on the identity service at most once.
//!
//! Per record the controller looks the email up first. An existing account is
//! skipped and its id carried forward, so re-running the phase after a partial
//! failure never creates duplicates. Errors stay with the record that caused
//! them and processing moves on.

use std::path::Path;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::errors::{IdentityServiceError, RunError};
use crate::identity::{IdentityService, Lookup};
use crate::mapping::FieldMapper;
use crate::models::{ImportOutcome, ImportStatus, MigrationError, Phase, SourceUserRecord};
use crate::source::{RecordCursor, RejectedRow, SourceStore};

pub(crate) const MSG_EXISTING: &str = "user already exists";
pub(crate) const MSG_DRY_RUN: &str = "dry run: would import";

// ---------------------------------------------------------------------------
// Import log
// ---------------------------------------------------------------------------

/// Append-only result of an import phase, in source order.
///
/// Handed by value to the registration phase; it can also be written to disk
/// so registration can run in a later process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportLog {
    pub outcomes: Vec<ImportOutcome>,
    pub errors: Vec<MigrationError>,
}

impl ImportLog {
    fn record(&mut self, outcome: ImportOutcome, error: Option<MigrationError>) {
        self.outcomes.push(outcome);
        if let Some(err) = error {
            self.errors.push(err);
        }
    }

    /// Outcomes the registration phase may act on.
    pub fn registrable(&self) -> impl Iterator<Item = &ImportOutcome> {
        self.outcomes.iter().filter(|o| o.is_registrable())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RunError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|e| log_error(path, e))?;
        std::fs::write(path, json).map_err(|e| log_error(path, e))?;
        info!(path = %path.display(), outcomes = self.outcomes.len(), "saved import log");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RunError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| log_error(path, e))?;
        let log: Self = serde_json::from_str(&contents).map_err(|e| log_error(path, e))?;
        info!(path = %path.display(), outcomes = log.outcomes.len(), "loaded import log");
        Ok(log)
    }
}

fn log_error(path: &Path, err: impl std::fmt::Display) -> RunError {
    RunError::ImportLog {
        path: path.display().to_string(),
        detail: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Drives the import of every source record.
pub struct ImportPhase<'a> {
    identity: &'a dyn IdentityService,
    mapper: &'a FieldMapper,
    dry_run: bool,
    concurrency: usize,
}

impl<'a> ImportPhase<'a> {
    pub fn new(
        identity: &'a dyn IdentityService,
        mapper: &'a FieldMapper,
        dry_run: bool,
        concurrency: usize,
    ) -> Self {
        Self {
            identity,
            mapper,
            dry_run,
            concurrency: concurrency.max(1),
        }
    }

    /// Page through the source and import every record.
    ///
    /// Only a failure to read a whole page aborts the phase; everything else,
    /// including a row without a usable key, is recorded against the row it
    /// concerns.
    pub async fn run(
        &self,
        source: &dyn SourceStore,
        batch_size: u32,
    ) -> Result<ImportLog, RunError> {
        let mut log = ImportLog::default();
        let mut cursor = RecordCursor::new(source, batch_size);

        loop {
            let offset = cursor.offset();
            let batch = match cursor.next_batch() {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(err) => return Err(RunError::SourceRead { offset, source: err }),
            };

            let results: Vec<_> = stream::iter(batch.iter())
                .map(|row| async move {
                    match row {
                        Ok(record) => self.import_record(record).await,
                        Err(rejected) => reject(rejected),
                    }
                })
                .buffered(self.concurrency)
                .collect()
                .await;
            for (outcome, error) in results {
                log.record(outcome, error);
            }
            debug!(offset, processed = log.outcomes.len(), "import batch complete");
        }

        info!(
            processed = log.outcomes.len(),
            errors = log.errors.len(),
            dry_run = self.dry_run,
            "import phase complete"
        );
        Ok(log)
    }

    /// Process a single record. Never fails: problems become a `Failed`
    /// outcome plus the matching [`MigrationError`].
    #[instrument(skip(self, record), fields(source_id = record.id))]
    pub async fn import_record(
        &self,
        record: &SourceUserRecord,
    ) -> (ImportOutcome, Option<MigrationError>) {
        let email = self.mapper.email_of(record);
        let mut outcome = ImportOutcome {
            source_id: record.id,
            email: email.clone(),
            username: self.mapper.username_of(record),
            status: ImportStatus::Failed,
            message: String::new(),
            target_user_id: None,
            resolved_role: self.mapper.role_of(record),
            payload: None,
        };

        if email.is_empty() {
            warn!("record has no email, not submitting");
            return fail(outcome, "record has no email address".into());
        }

        match self.identity.find_user_by_email(&email).await {
            Ok(Lookup::Found(user)) => {
                debug!(email = %email, user_id = %user.id, "user already exists");
                outcome.status = ImportStatus::Skipped;
                outcome.message = MSG_EXISTING.into();
                outcome.target_user_id = Some(user.id);
                return (outcome, None);
            }
            Ok(Lookup::NotFound) => {}
            Err(e) => return fail(outcome, format!("lookup failed: {}", e)),
        }

        let payload = self.mapper.map(record);

        if self.dry_run {
            info!(email = %email, role = %outcome.resolved_role, "dry run: would import user");
            outcome.status = ImportStatus::Skipped;
            outcome.message = MSG_DRY_RUN.into();
            outcome.payload = Some(payload);
            return (outcome, None);
        }

        let created = match self.identity.create_user(&payload).await {
            Ok(created) => created,
            Err(e) => return fail(outcome, e.to_string()),
        };

        let user_id = match created.id {
            Some(id) => id,
            None => match self.recover_id(&email).await {
                Ok(id) => id,
                Err(detail) => return fail(outcome, detail),
            },
        };

        info!(email = %email, user_id = %user_id, "imported user");
        outcome.status = ImportStatus::Imported;
        outcome.message = "imported".into();
        outcome.target_user_id = Some(user_id);
        (outcome, None)
    }

    /// Compensating lookup after a create response that carried no id.
    async fn recover_id(&self, email: &str) -> Result<String, String> {
        debug!(email = %email, "create response had no id, looking the user up");
        match self.identity.find_user_by_email(email).await {
            Ok(Lookup::Found(user)) => Ok(user.id),
            Ok(Lookup::NotFound) => Err("user created but its id could not be recovered".into()),
            Err(e) => Err(format!("user created but id lookup failed: {}", e)),
        }
    }

    /// Rebuild the eligible set for a registration-only run without a saved
    /// import log: page the source and look every email up, never creating.
    ///
    /// Users unknown to the identity service are left out. Lookup errors are
    /// charged to the registration phase since that is the phase running.
    pub async fn resolve_existing(
        &self,
        source: &dyn SourceStore,
        batch_size: u32,
    ) -> Result<ImportLog, RunError> {
        let mut log = ImportLog::default();
        let mut cursor = RecordCursor::new(source, batch_size);

        loop {
            let offset = cursor.offset();
            let batch = match cursor.next_batch() {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(err) => return Err(RunError::SourceRead { offset, source: err }),
            };

            let mut records = Vec::with_capacity(batch.len());
            for row in &batch {
                match row {
                    Ok(record) => records.push(record),
                    Err(rejected) => {
                        warn!(%rejected, "skipping unkeyed source row");
                        log.errors.push(MigrationError {
                            phase: Phase::Registration,
                            source_id: RejectedRow::SOURCE_ID,
                            email: rejected.email.clone(),
                            app_id: None,
                            detail: rejected.to_string(),
                        });
                    }
                }
            }

            let lookups: Vec<_> = stream::iter(records)
                .map(|record| async move {
                    let email = self.mapper.email_of(record);
                    let found = if email.is_empty() {
                        Ok(Lookup::NotFound)
                    } else {
                        self.identity.find_user_by_email(&email).await
                    };
                    (record, email, found)
                })
                .buffered(self.concurrency)
                .collect()
                .await;

            for (record, email, found) in lookups {
                match found {
                    Ok(Lookup::Found(user)) => log.outcomes.push(ImportOutcome {
                        source_id: record.id,
                        email,
                        username: self.mapper.username_of(record),
                        status: ImportStatus::Skipped,
                        message: MSG_EXISTING.into(),
                        target_user_id: Some(user.id),
                        resolved_role: self.mapper.role_of(record),
                        payload: None,
                    }),
                    Ok(Lookup::NotFound) => {
                        debug!(source_id = record.id, "not on the identity service, not eligible");
                    }
                    Err(e) => log.errors.push(lookup_error(record.id, email, e)),
                }
            }
        }

        info!(
            eligible = log.outcomes.len(),
            errors = log.errors.len(),
            "resolved existing users for registration"
        );
        Ok(log)
    }
}

/// Failed outcome for a row the source could not key.
fn reject(rejected: &RejectedRow) -> (ImportOutcome, Option<MigrationError>) {
    let outcome = ImportOutcome {
        source_id: RejectedRow::SOURCE_ID,
        email: rejected.email.clone(),
        username: None,
        status: ImportStatus::Failed,
        message: String::new(),
        target_user_id: None,
        resolved_role: String::new(),
        payload: None,
    };
    fail(outcome, rejected.to_string())
}

fn fail(mut outcome: ImportOutcome, detail: String) -> (ImportOutcome, Option<MigrationError>) {
    warn!(source_id = outcome.source_id, email = %outcome.email, detail = %detail, "import failed");
    let error = MigrationError {
        phase: Phase::Import,
        source_id: outcome.source_id,
        email: outcome.email.clone(),
        app_id: None,
        detail: detail.clone(),
    };
    outcome.status = ImportStatus::Failed;
    outcome.message = detail;
    outcome.target_user_id = None;
    (outcome, Some(error))
}

fn lookup_error(source_id: i64, email: String, err: IdentityServiceError) -> MigrationError {
    warn!(source_id, email = %email, error = %err, "lookup failed while resolving existing users");
    MigrationError {
        phase: Phase::Registration,
        source_id,
        email,
        app_id: None,
        detail: format!("lookup failed: {}", err),
    }
}
