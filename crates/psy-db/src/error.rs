//! Error types for psy-db.
//!
//! [`DatabaseError`] covers raw storage access. [`EngineError`] is what the
//! lifecycle manager and result store return: it separates caller mistakes
//! (validation, access, state) from storage faults so callers can decide
//! what to show and what to retry.

use std::path::PathBuf;

use chrono::NaiveDate;
use psy_config::ConfigError;
use psy_core::enums::LifecycleState;
use psy_modules::{FactoryError, ManifestError};
use thiserror::Error;

use crate::transient::{is_transient_storage_error, is_unique_violation};

/// Errors from database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A SQL query failed.
    #[error("Query failed: {0}")]
    Query(String),

    /// Schema migration failed.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Expected a result row but none was returned.
    #[error("No result returned")]
    NoResult,

    /// Invalid state encountered (e.g., bad data in DB).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The database is locked, busy, or cannot be reached. Retryable.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Underlying libSQL error.
    #[error("libSQL error: {0}")]
    LibSql(#[source] libsql::Error),

    /// A stored descriptor could not be decoded.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Catch-all for unexpected errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<libsql::Error> for DatabaseError {
    fn from(e: libsql::Error) -> Self {
        if is_transient_storage_error(&e) {
            tracing::error!(error = %e, "Storage unavailable");
            Self::StorageUnavailable(e.to_string())
        } else {
            if !is_unique_violation(&e) {
                tracing::error!(error = %e, "Storage error");
            }
            Self::LibSql(e)
        }
    }
}

/// Errors from lifecycle and result-store operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The module's manifest is unreadable or invalid.
    #[error(transparent)]
    Manifest(ManifestError),

    /// The manifest's `module_key` differs from its directory name.
    #[error("Module directory '{expected}' declares key '{found}' ({})", path.display())]
    KeyMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Module '{key}' not found")]
    ModuleNotFound { key: String },

    #[error("Module '{key}' cannot {action} from state {from}")]
    InvalidTransition {
        key: String,
        from: LifecycleState,
        action: &'static str,
    },

    #[error("Module '{key}' has unmet dependencies: {}", reasons.join("; "))]
    DependencyUnmet { key: String, reasons: Vec<String> },

    #[error("Module '{key}' is not active (state: {state})")]
    ModuleNotActive { key: String, state: LifecycleState },

    #[error(transparent)]
    LoadFailed(#[from] FactoryError),

    /// Storage provisioning did not produce a usable result table.
    #[error("Provisioning of module '{key}' failed: {reason}")]
    Provisioning { key: String, reason: String },

    /// The acting psychologist does not own the requested data.
    #[error("Psychologist {psychologist_id} may not access {resource}")]
    AccessDenied {
        psychologist_id: i64,
        resource: String,
    },

    #[error("A '{module}' result for child {child_id} on {test_date} already exists")]
    DuplicateRecord {
        module: String,
        child_id: i64,
        test_date: NaiveDate,
    },

    #[error("Result {id} not found in module '{module}'")]
    NotFound { module: String, id: i64 },

    #[error("Module '{module}' has no column '{field}'")]
    UnknownField { module: String, field: String },

    /// A module field collides with an engine-owned column.
    #[error("Column '{field}' of module '{module}' is managed by the engine")]
    ReservedField { module: String, field: String },

    #[error("Column '{field}' of module '{module}' is not numeric (declared '{declared_type}')")]
    NonNumericField {
        module: String,
        field: String,
        declared_type: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField { field: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// The module's compute hook rejected the input.
    #[error("Module '{module}' hook failed: {message}")]
    Hook { module: String, message: String },

    /// Another installed module already owns the requested result table.
    #[error("Table '{table}' requested by module '{key}' belongs to module '{owner}'")]
    TableClaimed {
        key: String,
        table: String,
        owner: String,
    },

    #[error("Result table '{table}' of module '{module}' does not exist")]
    TableMissing { module: String, table: String },

    /// Retryable: the database is locked or unreachable.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Registry and storage disagree; needs operator attention.
    #[error("Inconsistent state: {}", issues.join("; "))]
    InconsistentState { issues: Vec<String> },

    #[error("Backup of module '{key}' to {} failed: {source}", path.display())]
    Backup {
        key: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(DatabaseError),
}

impl EngineError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// Whether the error is a storage or consistency fault rather than a
    /// rejected request.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_)
                | Self::InconsistentState { .. }
                | Self::Database(_)
                | Self::Config(_)
                | Self::Backup { .. }
                | Self::Provisioning { .. }
        )
    }
}

impl From<DatabaseError> for EngineError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::StorageUnavailable(msg) => Self::StorageUnavailable(msg),
            DatabaseError::Manifest(m) => Self::from(m),
            other => Self::Database(other),
        }
    }
}

impl From<libsql::Error> for EngineError {
    fn from(e: libsql::Error) -> Self {
        DatabaseError::from(e).into()
    }
}

impl From<ManifestError> for EngineError {
    fn from(e: ManifestError) -> Self {
        match e {
            ManifestError::KeyMismatch {
                path,
                expected,
                found,
            } => Self::KeyMismatch {
                path,
                expected,
                found,
            },
            other => Self::Manifest(other),
        }
    }
}
