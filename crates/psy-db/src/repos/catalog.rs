//! Catalog view and registry synchronization.
//!
//! Joins what the catalog finds on disk with what the registry remembers.
//! `scan_and_register` writes only registry rows; result tables are never
//! touched here. Installed modules keep their storage contract across
//! manifest edits until they are reinstalled.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use psy_core::entities::{ModuleDescriptor, StorageContract};
use psy_core::enums::{AuditAction, LifecycleState};
use psy_modules::{DiscoveredModule, ManifestError};

use crate::error::EngineError;
use crate::repos::audit::AuditEvent;
use crate::repos::registry::{RegistryEntry, upsert_entry};
use crate::service::PsyService;

/// One module as seen by operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleListing {
    pub descriptor: ModuleDescriptor,
    pub path: PathBuf,
    pub state: LifecycleState,
    /// False when the registry knows the module but its directory is gone.
    pub on_disk: bool,
}

impl ModuleListing {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.descriptor.key
    }

    #[must_use]
    pub const fn is_installed(&self) -> bool {
        self.state.is_installed()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }
}

/// Result of [`PsyService::list_modules`].
#[derive(Debug, Default)]
pub struct CatalogListing {
    /// Sorted by key.
    pub modules: Vec<ModuleListing>,
    pub failures: Vec<ManifestError>,
}

/// A problem found while synchronizing the registry with disk.
#[derive(Debug)]
pub enum ScanIssue {
    Manifest(ManifestError),
    /// Registered module whose directory no longer exists.
    RegistryOrphan { key: String, path: PathBuf },
    /// An installed module's manifest now declares different storage. The
    /// registry keeps the installed contract until the module is reinstalled.
    StorageChanged {
        key: String,
        installed: StorageContract,
        declared: StorageContract,
    },
    /// An installed module's changed manifest asks for a host it cannot run on.
    DependencyUnmet { key: String, reasons: Vec<String> },
}

impl std::fmt::Display for ScanIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manifest(e) => write!(f, "{e}"),
            Self::RegistryOrphan { key, path } => {
                write!(f, "Registered module '{key}' is missing from {}", path.display())
            }
            Self::StorageChanged {
                key,
                installed,
                declared,
            } if installed.table != declared.table => write!(
                f,
                "Installed module '{key}' cannot move from table '{}' to '{}'; reinstall to apply",
                installed.table, declared.table
            ),
            Self::StorageChanged { key, .. } => write!(
                f,
                "Installed module '{key}' cannot change its create script; reinstall to apply"
            ),
            Self::DependencyUnmet { key, reasons } => write!(
                f,
                "Changed manifest of installed module '{key}' was not applied: {}",
                reasons.join("; ")
            ),
        }
    }
}

/// Result of [`PsyService::scan_and_register`].
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Keys registered by this scan.
    pub registered: Vec<String>,
    /// Keys whose registry metadata was refreshed from a changed manifest.
    pub updated: Vec<String>,
    pub failures: Vec<ScanIssue>,
}

impl ScanReport {
    /// Every key this scan wrote, sorted.
    #[must_use]
    pub fn changed(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .registered
            .iter()
            .chain(&self.updated)
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        keys
    }
}

impl PsyService {
    /// Every discoverable or registered module with its lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the registry cannot be read.
    pub async fn list_modules(&self) -> Result<CatalogListing, EngineError> {
        let scan = self.catalog().scan();
        let mut registry: HashMap<String, RegistryEntry> = self
            .registry_entries()
            .await?
            .into_iter()
            .map(|e| (e.key().to_string(), e))
            .collect();

        let mut modules: Vec<ModuleListing> = scan
            .modules
            .into_iter()
            .map(|m| {
                let state = registry
                    .remove(m.key())
                    .map_or(LifecycleState::Discovered, |e| e.state);
                ModuleListing {
                    descriptor: m.descriptor,
                    path: m.path,
                    state,
                    on_disk: true,
                }
            })
            .collect();

        modules.extend(registry.into_values().map(|e| ModuleListing {
            on_disk: e.path.is_dir(),
            descriptor: e.descriptor,
            path: e.path,
            state: e.state,
        }));
        modules.sort_by(|a, b| a.key().cmp(b.key()));

        Ok(CatalogListing {
            modules,
            failures: scan.failures,
        })
    }

    /// Register newly discovered modules and refresh changed manifests.
    ///
    /// Lifecycle state is never changed. Running it twice without filesystem
    /// changes performs no writes the second time.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the registry cannot be read or written.
    pub async fn scan_and_register(&self) -> Result<ScanReport, EngineError> {
        let scan = self.catalog().scan();
        let mut registry: HashMap<String, RegistryEntry> = self
            .registry_entries()
            .await?
            .into_iter()
            .map(|e| (e.key().to_string(), e))
            .collect();

        let mut report = ScanReport {
            failures: scan.failures.into_iter().map(ScanIssue::Manifest).collect(),
            ..ScanReport::default()
        };

        for module in &scan.modules {
            match registry.remove(module.key()) {
                None => {
                    upsert_entry(
                        self.db().conn(),
                        module,
                        LifecycleState::Registered,
                        Utc::now(),
                    )
                    .await?;
                    tracing::info!(
                        module = %module.key(),
                        version = %module.descriptor.version,
                        "Registered module"
                    );
                    self.record_audit(
                        None,
                        AuditEvent::new(
                            module.key(),
                            AuditAction::Register,
                            format!("Registered {} {}", module.key(), module.descriptor.version),
                        ),
                    )
                    .await;
                    report.registered.push(module.key().to_string());
                }
                Some(entry) if !entry.matches(module) => {
                    if let Some(issue) = self.refresh_refusal(&entry, module) {
                        tracing::warn!(module = %module.key(), "{issue}");
                        report.failures.push(issue);
                        continue;
                    }
                    upsert_entry(self.db().conn(), module, entry.state, Utc::now()).await?;
                    self.instances().invalidate(module.key());
                    tracing::info!(
                        module = %module.key(),
                        from = %entry.descriptor.version,
                        to = %module.descriptor.version,
                        "Refreshed module metadata"
                    );
                    report.updated.push(module.key().to_string());
                }
                Some(_) => {
                    tracing::debug!(module = %module.key(), "Registry up to date");
                }
            }
        }

        // Whatever is left is registered but was not found by the scan.
        let mut leftovers: Vec<RegistryEntry> = registry.into_values().collect();
        leftovers.sort_by(|a, b| a.key().cmp(b.key()));
        for entry in leftovers {
            if !entry.path.is_dir() {
                tracing::warn!(
                    module = %entry.key(),
                    path = %entry.path.display(),
                    "Registered module directory is missing"
                );
                report.failures.push(ScanIssue::RegistryOrphan {
                    key: entry.key().to_string(),
                    path: entry.path,
                });
            }
        }

        Ok(report)
    }

    /// Why a changed manifest may not replace the registry row of `entry`.
    /// Only installed modules are constrained; their table and dependencies
    /// were checked at install time.
    fn refresh_refusal(
        &self,
        entry: &RegistryEntry,
        module: &DiscoveredModule,
    ) -> Option<ScanIssue> {
        if !entry.state.is_installed() {
            return None;
        }
        if entry.descriptor.storage != module.descriptor.storage {
            return Some(ScanIssue::StorageChanged {
                key: module.key().to_string(),
                installed: entry.descriptor.storage.clone(),
                declared: module.descriptor.storage.clone(),
            });
        }
        match self.check_dependencies(&module.descriptor) {
            Ok(()) => None,
            Err(EngineError::DependencyUnmet { key, reasons }) => {
                Some(ScanIssue::DependencyUnmet { key, reasons })
            }
            Err(other) => Some(ScanIssue::DependencyUnmet {
                key: module.key().to_string(),
                reasons: vec![other.to_string()],
            }),
        }
    }
}
