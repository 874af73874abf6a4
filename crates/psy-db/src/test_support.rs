//! Shared test utilities for psy-db unit tests.

#[cfg(test)]
pub(crate) mod helpers {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use psy_config::CategorySet;
    use psy_core::entities::{ModuleDependencies, ModuleDescriptor, StorageContract};
    use psy_modules::{Catalog, DiscoveredModule, FactoryRegistry};

    use crate::PsyDb;
    use crate::children::StaticChildDirectory;
    use crate::service::{EngineSettings, PsyService};

    /// In-memory service with an empty catalog and no children.
    pub async fn test_service() -> PsyService {
        test_service_with(Vec::new(), StaticChildDirectory::new(), FactoryRegistry::new()).await
    }

    /// In-memory service scanning `roots`.
    pub async fn test_service_with(
        roots: Vec<PathBuf>,
        children: StaticChildDirectory,
        factories: FactoryRegistry,
    ) -> PsyService {
        let db = PsyDb::open_local(":memory:", Duration::from_secs(5)).await.unwrap();
        let catalog = Catalog::new(roots, "module.json", CategorySet::builtin());
        let backup_dir = std::env::temp_dir().join("psylab-test-backups");
        let settings = EngineSettings::for_catalog(catalog, backup_dir).unwrap();
        PsyService::new(db, settings, factories, Arc::new(children))
    }

    /// A discovered module that exists only in memory.
    pub fn discovered(key: &str, version: &str) -> DiscoveredModule {
        DiscoveredModule {
            descriptor: ModuleDescriptor {
                key: key.into(),
                name: key.into(),
                description: String::new(),
                version: semver::Version::parse(version).unwrap(),
                author: String::new(),
                category: "cognitive".into(),
                dependencies: ModuleDependencies::default(),
                storage: StorageContract {
                    table: StorageContract::default_table(key),
                    create_script: None,
                },
            },
            path: PathBuf::from("/nonexistent/modules").join(key),
        }
    }

    /// Write a module directory with a minimal manifest under `root`.
    pub fn write_module(root: &Path, key: &str, version: &str) -> PathBuf {
        let dir = root.join(key);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("module.json"),
            format!(
                r#"{{"module_key": "{key}", "name": "{key}", "version": "{version}", "category": "cognitive"}}"#
            ),
        )
        .unwrap();
        dir
    }
}
