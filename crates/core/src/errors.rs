//! Error types for the usermigrate core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Per-record failures never surface through these types at the run level:
//! the phase controllers turn them into outcome entries and
//! [`MigrationError`](crate::models::MigrationError) records.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Identity(#[from] IdentityServiceError),

    #[error(transparent)]
    Run(#[from] RunError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Source store errors
// ---------------------------------------------------------------------------

/// Errors from the relational source of user records.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Underlying rusqlite error.
    #[error("source database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// The query result lacks a column the store relies on. Rows that are
    /// merely malformed are reported per row, not through this error.
    #[error("source query is missing column '{0}'")]
    MissingColumn(String),

    /// The source file does not exist.
    #[error("source database not found: {0}")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Identity service errors
// ---------------------------------------------------------------------------

/// Errors from the remote identity service.
///
/// A negative lookup is not an error; see [`Lookup`](crate::identity::Lookup).
#[derive(Debug, Error)]
pub enum IdentityServiceError {
    /// HTTP-level transport error (network, TLS, timeout).
    #[error("identity service HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API key was rejected.
    #[error("identity service authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The API returned a non-success status code.
    #[error("identity service API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("identity service response parse error: {0}")]
    ParseError(String),
}

// ---------------------------------------------------------------------------
// Run errors
// ---------------------------------------------------------------------------

/// Run-level failures. These are the only errors that abort a migration run.
#[derive(Debug, Error)]
pub enum RunError {
    /// `--import-only` and `--register-only` were both requested.
    #[error("--import-only and --register-only cannot be combined")]
    ConflictingModes,

    /// The source store could not be reached before any record was processed.
    #[error("source store unreachable at startup: {0}")]
    SourceUnavailable(#[source] SourceError),

    /// The identity service could not be reached before any record was processed.
    #[error("identity service unreachable at startup: {0}")]
    IdentityUnavailable(#[source] IdentityServiceError),

    /// Paging through the source failed after the run started.
    #[error("reading source records failed at offset {offset}: {source}")]
    SourceRead {
        offset: u64,
        #[source]
        source: SourceError,
    },

    /// A saved import log could not be read or written.
    #[error("import log error at '{path}': {detail}")]
    ImportLog { path: String, detail: String },
}

// CoreError implements `std::error::Error` via `thiserror`, which means
// `anyhow::Error: From<CoreError>` is already provided by the blanket impl
// in `anyhow`.
