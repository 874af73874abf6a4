//! Module catalog: discovery of test modules on disk.
//!
//! Each configured root holds one subdirectory per module. A subdirectory
//! counts as a module when it contains the manifest file; directories without
//! one are skipped so partially-populated trees work during development.
//! Failures in one module never abort the scan of the others.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use psy_config::{CategorySet, PsyConfig};
use psy_core::entities::ModuleDescriptor;

use crate::error::ManifestError;
use crate::manifest::parse_manifest;

/// A module found on disk with a valid manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredModule {
    pub descriptor: ModuleDescriptor,
    /// Module directory.
    pub path: PathBuf,
}

impl DiscoveredModule {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.descriptor.key
    }

    /// Absolute location of the provisioning script, if the module declares one.
    #[must_use]
    pub fn create_script_path(&self) -> Option<PathBuf> {
        self.descriptor
            .storage
            .create_script
            .as_deref()
            .map(|script| self.path.join(script))
    }
}

/// Result of a full catalog scan.
#[derive(Debug, Default)]
pub struct CatalogScan {
    /// Valid modules, deduplicated by key and sorted by key.
    pub modules: Vec<DiscoveredModule>,
    /// Modules that were found but could not be accepted.
    pub failures: Vec<ManifestError>,
}

impl CatalogScan {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&DiscoveredModule> {
        self.modules.iter().find(|m| m.key() == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(DiscoveredModule::key)
    }
}

/// Scans module roots for manifests.
#[derive(Debug, Clone)]
pub struct Catalog {
    roots: Vec<PathBuf>,
    manifest_file: String,
    categories: CategorySet,
}

impl Catalog {
    #[must_use]
    pub fn new(roots: Vec<PathBuf>, manifest_file: impl Into<String>, categories: CategorySet) -> Self {
        Self {
            roots,
            manifest_file: manifest_file.into(),
            categories,
        }
    }

    #[must_use]
    pub fn from_config(config: &PsyConfig) -> Self {
        Self::new(
            config.modules.roots.clone(),
            config.modules.manifest_file.clone(),
            config.category_set(),
        )
    }

    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    #[must_use]
    pub const fn categories(&self) -> &CategorySet {
        &self.categories
    }

    /// Enumerate every module directory under every root.
    ///
    /// Roots are visited in configured order and entries in name order; the
    /// first module seen for a key wins.
    #[must_use]
    pub fn scan(&self) -> CatalogScan {
        let mut scan = CatalogScan::default();
        let mut seen = HashSet::new();

        for root in &self.roots {
            if !root.is_dir() {
                tracing::debug!(root = %root.display(), "Module root does not exist");
                continue;
            }

            let dirs = match module_dirs(root) {
                Ok(dirs) => dirs,
                Err(source) => {
                    scan.failures.push(ManifestError::Io {
                        path: root.clone(),
                        source,
                    });
                    continue;
                }
            };

            for dir in dirs {
                match self.load_module(&dir) {
                    Ok(Some(module)) => {
                        if seen.insert(module.key().to_string()) {
                            tracing::debug!(
                                module = %module.key(),
                                version = %module.descriptor.version,
                                path = %dir.display(),
                                "Discovered module"
                            );
                            scan.modules.push(module);
                        } else {
                            tracing::debug!(
                                module = %module.key(),
                                path = %dir.display(),
                                "Module shadowed by an earlier root, ignoring"
                            );
                        }
                    }
                    Ok(None) => {
                        tracing::debug!(path = %dir.display(), "No manifest, skipping");
                    }
                    Err(e) => {
                        tracing::warn!(path = %e.path().display(), error = %e, "Rejected module manifest");
                        scan.failures.push(e);
                    }
                }
            }
        }

        scan.modules.sort_by(|a, b| a.key().cmp(b.key()));
        scan
    }

    /// Locate a single module by key, honoring root precedence.
    ///
    /// # Errors
    ///
    /// Returns the manifest error of the first root holding a `key` directory
    /// whose manifest is invalid.
    pub fn find(&self, key: &str) -> Result<Option<DiscoveredModule>, ManifestError> {
        for root in &self.roots {
            let dir = root.join(key);
            if !dir.is_dir() {
                continue;
            }
            if let Some(module) = self.load_module(&dir)? {
                return Ok(Some(module));
            }
        }
        Ok(None)
    }

    /// Load the module in `dir`.
    ///
    /// Returns `Ok(None)` when the directory has no manifest.
    ///
    /// # Errors
    ///
    /// Returns `ManifestError` if the manifest cannot be read, fails
    /// validation, or declares a key different from the directory name.
    pub fn load_module(&self, dir: &Path) -> Result<Option<DiscoveredModule>, ManifestError> {
        let manifest_path = dir.join(&self.manifest_file);
        if !manifest_path.is_file() {
            return Ok(None);
        }

        let bytes = std::fs::read(&manifest_path).map_err(|source| ManifestError::Io {
            path: manifest_path.clone(),
            source,
        })?;
        let descriptor = parse_manifest(&bytes, &manifest_path, &self.categories)?;

        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if descriptor.key != dir_name {
            return Err(ManifestError::KeyMismatch {
                path: manifest_path,
                expected: dir_name,
                found: descriptor.key,
            });
        }

        Ok(Some(DiscoveredModule {
            descriptor,
            path: dir.to_path_buf(),
        }))
    }
}

/// Subdirectories of `root`, sorted by name.
fn module_dirs(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}
