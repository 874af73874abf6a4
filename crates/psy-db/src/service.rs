//! Service layer tying the registry, lifecycle manager, and result store together.
//!
//! `PsyService` owns the database handle and every collaborator the engine
//! needs: the module catalog, the host description used for dependency
//! checks, the factory registry and instance cache, and the child directory.
//! All operations are implemented as `impl PsyService` blocks under `repos`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use psy_config::{ConfigError, HostConfig, PsyConfig};
use psy_modules::{Catalog, FactoryRegistry, InstanceCache};

use crate::PsyDb;
use crate::children::ChildDirectory;
use crate::error::EngineError;

/// Host-side settings the lifecycle manager checks modules against.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub catalog: Catalog,
    pub core_version: semver::Version,
    pub runtime_version: semver::Version,
    pub capabilities: Vec<String>,
    /// Where uninstall copies module directories when a backup is requested.
    pub backup_dir: PathBuf,
}

impl EngineSettings {
    /// Build settings from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration fails validation.
    pub fn from_config(config: &PsyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            catalog: Catalog::from_config(config),
            core_version: config.host.core_version()?,
            runtime_version: config.host.runtime_version()?,
            capabilities: config.host.capabilities.clone(),
            backup_dir: config.modules.backup_dir.clone(),
        })
    }

    /// Settings for `catalog` with the default host description.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the default host versions fail to parse.
    pub fn for_catalog(catalog: Catalog, backup_dir: PathBuf) -> Result<Self, ConfigError> {
        let host = HostConfig::default();
        Ok(Self {
            catalog,
            core_version: host.core_version()?,
            runtime_version: host.runtime_version()?,
            capabilities: host.capabilities,
            backup_dir,
        })
    }

    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// The module engine: registry, lifecycle, and result store over one connection.
pub struct PsyService {
    db: PsyDb,
    settings: EngineSettings,
    factories: FactoryRegistry,
    instances: InstanceCache,
    children: Arc<dyn ChildDirectory>,
}

impl PsyService {
    #[must_use]
    pub fn new(
        db: PsyDb,
        settings: EngineSettings,
        factories: FactoryRegistry,
        children: Arc<dyn ChildDirectory>,
    ) -> Self {
        Self {
            db,
            settings,
            factories,
            instances: InstanceCache::new(),
            children,
        }
    }

    /// Open the configured database and build a service from configuration.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` for invalid configuration, or a storage
    /// error if the database cannot be opened.
    pub async fn open(
        config: &PsyConfig,
        factories: FactoryRegistry,
        children: Arc<dyn ChildDirectory>,
    ) -> Result<Self, EngineError> {
        let settings = EngineSettings::from_config(config)?;
        let db = PsyDb::open_local(&config.database.path, config.database.busy_timeout()).await?;
        Ok(Self::new(db, settings, factories, children))
    }

    /// Access the underlying database handle.
    #[must_use]
    pub const fn db(&self) -> &PsyDb {
        &self.db
    }

    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.settings.catalog
    }

    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.settings.backup_dir
    }

    #[must_use]
    pub const fn factories(&self) -> &FactoryRegistry {
        &self.factories
    }

    /// Loaded instances of active modules.
    #[must_use]
    pub const fn instances(&self) -> &InstanceCache {
        &self.instances
    }

    pub(crate) fn children(&self) -> &dyn ChildDirectory {
        self.children.as_ref()
    }
}
