use thiserror::Error;

/// Failures while loading or validating [`crate::PsyConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A TOML file or `PSYLAB_` variable could not be merged or extracted.
    #[error("failed to load settings: {0}")]
    Figment(#[from] figment::Error),

    /// A section the engine needs at startup is absent.
    #[error("settings section '{section}' is required but not set")]
    NotConfigured { section: String },

    #[error("setting '{field}' rejected: {reason}")]
    InvalidValue { field: String, reason: String },
}
