//! Error types for manifest parsing, discovery, and module instantiation.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from reading or validating a module manifest.
///
/// Every variant carries the offending path so operators can locate the module.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest or module directory could not be read.
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not syntactically valid JSON (file corruption).
    #[error("Malformed manifest {} at line {line}, column {column}: {message}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },

    /// A required field is absent (authoring mistake).
    #[error("Manifest {} is missing required field '{field}'", path.display())]
    MissingField { path: PathBuf, field: String },

    /// The document does not match the manifest schema.
    #[error("Manifest {} failed schema validation: {}", path.display(), errors.join("; "))]
    Invalid { path: PathBuf, errors: Vec<String> },

    /// A field is present but its value is unacceptable.
    #[error("Manifest {} has invalid '{field}': {reason}", path.display())]
    InvalidField {
        path: PathBuf,
        field: String,
        reason: String,
    },

    /// `module_key` disagrees with the module directory name.
    #[error("Manifest {} declares key '{found}' but its directory is '{expected}'", path.display())]
    KeyMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

impl ManifestError {
    /// Path of the manifest (or directory) the error refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. }
            | Self::Malformed { path, .. }
            | Self::MissingField { path, .. }
            | Self::Invalid { path, .. }
            | Self::InvalidField { path, .. }
            | Self::KeyMismatch { path, .. } => path,
        }
    }

    /// Whether the error indicates a corrupt or unreadable file rather than
    /// an authoring mistake.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Malformed { .. })
    }
}

/// A module constructor refused to produce an instance.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("Module '{key}' failed to load: {reason}")]
    LoadFailed { key: String, reason: String },
}

/// A module hook failed while processing a record.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("Compute hook failed: {0}")]
    Compute(String),
}
