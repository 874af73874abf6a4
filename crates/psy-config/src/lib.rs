//! # psy-config
//!
//! Layered configuration loading for Psylab using figment.
//!
//! Configuration sources (in priority order, highest wins):
//! 1. Environment variables (`PSYLAB_*` prefix, `__` as separator)
//! 2. Project-level `.psylab/config.toml`
//! 3. User-level `~/.config/psylab/config.toml`
//! 4. Built-in defaults
//!
//! # Environment Variable Mapping
//!
//! Figment maps `PSYLAB_DATABASE__PATH` -> `database.path`,
//! `PSYLAB_HOST__CORE_VERSION` -> `host.core_version`, etc.
//! The `__` (double underscore) separates nested config sections.
//!
//! # Usage
//!
//! ```no_run
//! use psy_config::PsyConfig;
//!
//! let config = PsyConfig::load_with_dotenv().expect("config");
//! config.validate().expect("valid config");
//!
//! for category in config.category_set().keys() {
//!     println!("category: {category}");
//! }
//! ```

mod categories;
mod database;
mod error;
mod host;
mod modules;

pub use categories::{CategoryMeta, CategorySet};
pub use database::DatabaseConfig;
pub use error::ConfigError;
pub use host::HostConfig;
pub use modules::ModulesConfig;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PsyConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub categories: CategorySet,
}

impl PsyConfig {
    /// Load configuration from all sources (TOML files + environment variables).
    ///
    /// Does NOT call `dotenvy` -- use [`load_with_dotenv`](Self::load_with_dotenv)
    /// if you need `.env` file loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Figment` if a source cannot be read or extracted.
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment().extract().map_err(ConfigError::from)
    }

    /// Load configuration with `.env` file support.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Figment` if a source cannot be read or extracted.
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        Self::load_dotenv_from_workspace();
        Self::load()
    }

    /// Build the figment provider chain.
    ///
    /// Public so tests can inspect the figment directly or add providers on top.
    #[must_use]
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                figment = figment.merge(Toml::file(global_path));
            }
        }

        let local_path = PathBuf::from(".psylab/config.toml");
        if local_path.exists() {
            figment = figment.merge(Toml::file(local_path));
        }

        figment.merge(Env::prefixed("PSYLAB_").split("__"))
    }

    /// Categories modules may declare: the configured set, or the built-in
    /// set when none are configured.
    #[must_use]
    pub fn category_set(&self) -> CategorySet {
        if self.categories.is_empty() {
            CategorySet::builtin()
        } else {
            self.categories.clone()
        }
    }

    /// Check values figment cannot type-check on its own.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparsable host versions, a zero
    /// busy timeout, or an empty manifest file name, and
    /// `ConfigError::NotConfigured` when no module root is configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.host.core_version()?;
        self.host.runtime_version()?;
        if self.database.busy_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "database.busy_timeout_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.modules.manifest_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "modules.manifest_file".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.modules.roots.is_empty() {
            return Err(ConfigError::NotConfigured {
                section: "modules.roots".into(),
            });
        }
        Ok(())
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("psylab").join("config.toml"))
    }

    /// Load `.env` from the workspace root, walking up from
    /// `CARGO_MANIFEST_DIR` when set. Silently does nothing if none is found.
    fn load_dotenv_from_workspace() {
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let mut dir = PathBuf::from(manifest_dir);
            for _ in 0..3 {
                let env_path = dir.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                    return;
                }
                if !dir.pop() {
                    break;
                }
            }
        }

        let _ = dotenvy::dotenv();
    }
}
