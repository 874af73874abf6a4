//! Host environment modules are checked against at install time.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_core_version() -> String {
    "1.0.0".to_string()
}

fn default_runtime_version() -> String {
    "1.85.0".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    /// Version of the host core that module `dependencies.core` is checked against.
    #[serde(default = "default_core_version")]
    pub core_version: String,

    /// Language-runtime version that module `dependencies.runtime` is checked against.
    #[serde(default = "default_runtime_version")]
    pub runtime_version: String,

    /// Capabilities this host provides (e.g. `"pdf_export"`, `"scoring"`).
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            core_version: default_core_version(),
            runtime_version: default_runtime_version(),
            capabilities: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Parsed host-core version.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `core_version` is not semver.
    pub fn core_version(&self) -> Result<semver::Version, ConfigError> {
        parse_version("host.core_version", &self.core_version)
    }

    /// Parsed runtime version.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `runtime_version` is not semver.
    pub fn runtime_version(&self) -> Result<semver::Version, ConfigError> {
        parse_version("host.runtime_version", &self.runtime_version)
    }

    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

fn parse_version(field: &str, value: &str) -> Result<semver::Version, ConfigError> {
    semver::Version::parse(value.trim()).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: format!("'{value}' is not a semantic version: {e}"),
    })
}
