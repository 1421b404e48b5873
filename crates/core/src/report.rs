//! End-of-run aggregation.
//!
//! [`RunReport::from_logs`] is a pure fold over the two outcome logs and the
//! [`RunStamp`] the coordinator hands in. A phase that did not run contributes
//! zero counts, never missing ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::import::ImportLog;
use crate::models::{ImportStatus, MigrationError, RegistrationStatus};
use crate::registration::RegistrationLog;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounts {
    pub total: usize,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationCounts {
    pub total: usize,
    pub registered: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Identity and timing of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStamp {
    pub run_id: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Structured summary of one migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub import: ImportCounts,
    pub registration: RegistrationCounts,
    /// Every recorded failure: import errors first, then registration errors,
    /// each in the order they occurred.
    pub errors: Vec<MigrationError>,
}

impl RunReport {
    /// Fold the logs of the phases that ran into a report.
    pub fn from_logs(
        stamp: RunStamp,
        import: Option<&ImportLog>,
        registration: Option<&RegistrationLog>,
    ) -> Self {
        let mut import_counts = ImportCounts::default();
        let mut registration_counts = RegistrationCounts::default();
        let mut errors = Vec::new();

        if let Some(log) = import {
            for outcome in &log.outcomes {
                import_counts.total += 1;
                match outcome.status {
                    ImportStatus::Imported => import_counts.imported += 1,
                    ImportStatus::Skipped => import_counts.skipped += 1,
                    ImportStatus::Failed => import_counts.failed += 1,
                }
            }
            errors.extend(log.errors.iter().cloned());
        }

        if let Some(log) = registration {
            for outcome in &log.outcomes {
                registration_counts.total += 1;
                match outcome.status {
                    RegistrationStatus::Registered => registration_counts.registered += 1,
                    RegistrationStatus::Skipped => registration_counts.skipped += 1,
                    RegistrationStatus::Failed => registration_counts.failed += 1,
                }
            }
            errors.extend(log.errors.iter().cloned());
        }

        Self {
            run_id: stamp.run_id,
            dry_run: stamp.dry_run,
            started_at: stamp.started_at,
            completed_at: stamp.completed_at,
            import: import_counts,
            registration: registration_counts,
            errors,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Emit the report through `tracing`: one summary line, then one line per error.
    pub fn log_summary(&self) {
        info!(
            run_id = %self.run_id,
            dry_run = self.dry_run,
            imported = self.import.imported,
            import_skipped = self.import.skipped,
            import_failed = self.import.failed,
            registered = self.registration.registered,
            registration_skipped = self.registration.skipped,
            registration_failed = self.registration.failed,
            errors = self.errors.len(),
            "migration run finished"
        );
        for err in &self.errors {
            warn!(
                phase = %err.phase,
                source_id = err.source_id,
                email = %err.email,
                app_id = err.app_id.as_deref().unwrap_or("-"),
                "{}",
                err.detail
            );
        }
    }
}
