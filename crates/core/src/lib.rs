//! usermigrate core library.
//!
//! Migrates legacy user records from a relational source into a remote
//! identity service, then registers each migrated user with the configured
//! applications. The crate provides configuration, the source store, the
//! identity-service client, field and role mapping, both phase controllers,
//! the run coordinator, and report aggregation.

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod identity;
pub mod import;
pub mod mapping;
pub mod models;
pub mod registration;
pub mod report;
pub mod source;

// Re-exports for convenience.
pub use config::AppConfig;
pub use coordinator::{Coordinator, RunMode, RunOptions, RunResult};
pub use identity::{FusionAuthClient, IdentityService, Lookup};
pub use report::RunReport;
pub use source::{SourceStore, SqliteSourceStore};
