//! Run coordinator: decides which phases run, sequences them, and folds
//! their logs into a [`RunReport`].
//!
//! A run proceeds as:
//!
//! 1. Preflight: the source must answer a count and the identity service a
//!    health probe. Either failing aborts before any record is touched.
//! 2. Import phase, unless registration-only.
//! 3. Registration phase, unless import-only. It starts only after the
//!    import log is complete.
//! 4. Aggregation into the report, which is logged and returned.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::{ConfigError, RunError};
use crate::identity::IdentityService;
use crate::import::{ImportLog, ImportPhase};
use crate::mapping::{FieldMapper, RoleResolver};
use crate::registration::{RegistrationLog, RegistrationPhase};
use crate::report::{RunReport, RunStamp};
use crate::source::SourceStore;

// ---------------------------------------------------------------------------
// Modes & options
// ---------------------------------------------------------------------------

/// Which phases a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Full,
    ImportOnly,
    RegisterOnly,
}

impl RunMode {
    /// Resolve the phase flags. Asking for both "only" modes is contradictory
    /// and rejected rather than guessed at.
    pub fn from_flags(import_only: bool, register_only: bool) -> Result<Self, RunError> {
        match (import_only, register_only) {
            (true, true) => Err(RunError::ConflictingModes),
            (true, false) => Ok(Self::ImportOnly),
            (false, true) => Ok(Self::RegisterOnly),
            (false, false) => Ok(Self::Full),
        }
    }

    pub fn runs_import(self) -> bool {
        !matches!(self, Self::RegisterOnly)
    }

    pub fn runs_registration(self) -> bool {
        !matches!(self, Self::ImportOnly)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::ImportOnly => write!(f, "import_only"),
            Self::RegisterOnly => write!(f, "register_only"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    pub dry_run: bool,
    /// Where the import log is written after an import phase, and read from
    /// by a registration-only run.
    pub import_log: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Full,
            dry_run: false,
            import_log: None,
        }
    }
}

/// Everything a run produced. The logs are `None` for phases that did not run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub report: RunReport,
    pub import: Option<ImportLog>,
    pub registration: Option<RegistrationLog>,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator<'a> {
    source: &'a dyn SourceStore,
    identity: &'a dyn IdentityService,
    mapper: FieldMapper,
    applications: Vec<String>,
    batch_size: u32,
    concurrency: usize,
}

impl<'a> Coordinator<'a> {
    /// Wire the collaborators together. `config` should already be
    /// validated; an unparsable role table is still rejected here.
    pub fn new(
        config: &AppConfig,
        source: &'a dyn SourceStore,
        identity: &'a dyn IdentityService,
    ) -> Result<Self, ConfigError> {
        let roles = RoleResolver::new(&config.roles)?;
        let mapper = FieldMapper::new(
            config.mapping.clone(),
            roles,
            config.identity.primary_application().map(str::to_string),
        );
        Ok(Self {
            source,
            identity,
            mapper,
            applications: config.identity.applications.clone(),
            batch_size: config.source.batch_size,
            concurrency: config.run.concurrency,
        })
    }

    /// Confirm both collaborators answer before anything is processed.
    /// Returns the advisory source record count.
    pub async fn preflight(&self) -> Result<u64, RunError> {
        let total = self.source.count().map_err(RunError::SourceUnavailable)?;
        self.identity
            .check_health()
            .await
            .map_err(RunError::IdentityUnavailable)?;
        info!(source_records = total, "preflight checks passed");
        Ok(total)
    }

    /// Execute one migration run.
    ///
    /// Per-record and per-registration failures are part of the result; only
    /// run-level failures are returned as `Err`.
    pub async fn run(&self, options: &RunOptions) -> Result<RunResult, RunError> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(
            run_id = %run_id,
            mode = %options.mode,
            dry_run = options.dry_run,
            applications = self.applications.len(),
            "starting migration run"
        );

        self.preflight().await?;

        let import_phase = ImportPhase::new(
            self.identity,
            &self.mapper,
            options.dry_run,
            self.concurrency,
        );

        let import_log = if options.mode.runs_import() {
            let log = import_phase.run(self.source, self.batch_size).await?;
            if let Some(path) = &options.import_log {
                if options.dry_run {
                    info!("dry run: import log not written");
                } else if let Err(e) = log.save(path) {
                    warn!(error = %e, "could not write import log");
                }
            }
            Some(log)
        } else {
            None
        };

        let registration_log = if options.mode.runs_registration() {
            let resolved;
            let (eligible, lookup_errors) = match &import_log {
                Some(log) => (log, Vec::new()),
                None => {
                    resolved = self.eligible_without_import(&import_phase, options).await?;
                    (&resolved, resolved.errors.clone())
                }
            };

            let phase = RegistrationPhase::new(
                self.identity,
                &self.applications,
                options.dry_run,
                self.concurrency,
            );
            let mut log = phase.run(eligible.registrable()).await;
            if !lookup_errors.is_empty() {
                let mut errors = lookup_errors;
                errors.append(&mut log.errors);
                log.errors = errors;
            }
            Some(log)
        } else {
            None
        };

        let stamp = RunStamp {
            run_id,
            dry_run: options.dry_run,
            started_at,
            completed_at: Utc::now(),
        };
        let report = RunReport::from_logs(stamp, import_log.as_ref(), registration_log.as_ref());
        report.log_summary();

        Ok(RunResult {
            report,
            import: import_log,
            registration: registration_log,
        })
    }

    /// Source of eligible users for a registration-only run: the saved import
    /// log if one exists, otherwise a lookup of every source email.
    async fn eligible_without_import(
        &self,
        import_phase: &ImportPhase<'_>,
        options: &RunOptions,
    ) -> Result<ImportLog, RunError> {
        if let Some(path) = options.import_log.as_deref().filter(|p| p.exists()) {
            let mut log = ImportLog::load(path)?;
            // Errors from the earlier process were reported by that run.
            log.errors.clear();
            return Ok(log);
        }
        info!("no saved import log, resolving existing users from the source");
        import_phase
            .resolve_existing(self.source, self.batch_size)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_flags() {
        assert_eq!(RunMode::from_flags(false, false).unwrap(), RunMode::Full);
        assert_eq!(RunMode::from_flags(true, false).unwrap(), RunMode::ImportOnly);
        assert_eq!(RunMode::from_flags(false, true).unwrap(), RunMode::RegisterOnly);
        assert!(matches!(
            RunMode::from_flags(true, true),
            Err(RunError::ConflictingModes)
        ));
    }

    #[test]
    fn test_mode_phase_selection() {
        assert!(RunMode::Full.runs_import() && RunMode::Full.runs_registration());
        assert!(RunMode::ImportOnly.runs_import());
        assert!(!RunMode::ImportOnly.runs_registration());
        assert!(!RunMode::RegisterOnly.runs_import());
        assert!(RunMode::RegisterOnly.runs_registration());
        assert_eq!(RunMode::RegisterOnly.to_string(), "register_only");
    }
}
