//! Errors shared by every Psylab crate.
//!
//! Crate-specific failures (`ManifestError`, `DatabaseError`, `EngineError`)
//! live next to the code that raises them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A value is outside what the result store accepts.
    #[error("invalid value: {0}")]
    Validation(String),
}
