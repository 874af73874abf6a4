//! Module lifecycle manager.
//!
//! ```text
//! register   discovered → registered   registry row written
//! install    registered → active       dependencies checked, storage provisioned
//! deactivate active     → inactive     instance unloaded, data kept
//! activate   inactive   → active       instance reloaded, table must exist
//! uninstall  any row    → (removed)    row deleted, table optionally dropped
//! ```
//!
//! Install and uninstall change the registry and a result table together, so
//! both run inside one `BEGIN IMMEDIATE` transaction: concurrent callers
//! serialize on the write lock and observe either nothing or everything.
//! Every successful transition writes one audit entry after commit; a failed
//! attempt writes one `*_error` entry instead.

use std::path::{Path, PathBuf};

use chrono::Utc;
use libsql::TransactionBehavior;
use psy_core::entities::ModuleDescriptor;
use psy_core::enums::{AuditAction, LifecycleState};
use psy_core::identity::Actor;
use psy_modules::DiscoveredModule;
use psy_modules::manifest::parse_requirement;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{DatabaseError, EngineError};
use crate::helpers::quote_ident;
use crate::introspect::{
    default_table_ddl, missing_common_columns, table_columns, table_exists, unique_index_ddl,
};
use crate::repos::audit::AuditEvent;
use crate::repos::registry::{
    RegistryEntry, delete_entry, fetch_entry, table_owner, transition_state, upsert_entry,
};
use crate::service::PsyService;

/// What uninstall removes besides the registry row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UninstallOptions {
    /// Drop the module's result table.
    pub delete_data: bool,
    /// Copy the module directory to the backup directory before removing anything.
    pub backup_files: bool,
    /// Remove the module directory once the uninstall has committed.
    pub delete_files: bool,
}

impl UninstallOptions {
    /// Remove everything, keeping a backup of the module files.
    #[must_use]
    pub const fn purge() -> Self {
        Self {
            delete_data: true,
            backup_files: true,
            delete_files: true,
        }
    }
}

/// What an uninstall actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallReport {
    pub key: String,
    pub table_dropped: bool,
    pub backup_path: Option<PathBuf>,
    pub files_deleted: bool,
    /// Steps that were skipped or failed without undoing the uninstall.
    pub warnings: Vec<String>,
}

enum Transition<T> {
    Changed {
        value: T,
        description: String,
        detail: serde_json::Value,
    },
    Unchanged(T),
}

enum Provisioned {
    AlreadyActive(RegistryEntry),
    Installed {
        entry: RegistryEntry,
        table_created: bool,
    },
}

impl PsyService {
    /// Register a discovered module.
    ///
    /// # Errors
    ///
    /// `ModuleNotFound` if no module directory has this key, `InvalidTransition`
    /// if it is already registered, or the manifest error that rejected it.
    pub async fn register_module(
        &self,
        actor: &Actor,
        key: &str,
    ) -> Result<RegistryEntry, EngineError> {
        let result = self.register_inner(key).await;
        self.finish_transition(actor, key, AuditAction::Register, result)
            .await
    }

    /// Install a registered module: check dependencies, load its instance,
    /// and provision its result table.
    ///
    /// Installing an already active module succeeds without changes, so
    /// concurrent installs of the same module both succeed.
    ///
    /// # Errors
    ///
    /// `DependencyUnmet`, `LoadFailed`, `TableClaimed`, and `Provisioning`
    /// abort before or inside the transaction and leave no trace in storage.
    pub async fn install_module(
        &self,
        actor: &Actor,
        key: &str,
    ) -> Result<RegistryEntry, EngineError> {
        let result = self.install_inner(key).await;
        self.finish_transition(actor, key, AuditAction::Install, result)
            .await
    }

    /// Reactivate an inactive module without re-provisioning.
    ///
    /// # Errors
    ///
    /// `InconsistentState` if the registry says installed but the table is
    /// gone, `LoadFailed` if the instance cannot be built.
    pub async fn activate_module(
        &self,
        actor: &Actor,
        key: &str,
    ) -> Result<RegistryEntry, EngineError> {
        let result = self.activate_inner(key).await;
        self.finish_transition(actor, key, AuditAction::Activate, result)
            .await
    }

    /// Deactivate an active module. Stored results stay readable.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the module is active.
    pub async fn deactivate_module(
        &self,
        actor: &Actor,
        key: &str,
    ) -> Result<RegistryEntry, EngineError> {
        let result = self.deactivate_inner(key).await;
        self.finish_transition(actor, key, AuditAction::Deactivate, result)
            .await
    }

    /// Remove a module from the registry.
    ///
    /// The registry row and (with `delete_data`) the result table go in one
    /// transaction. A requested backup is taken before commit and its failure
    /// aborts the uninstall. File deletion runs after commit and only warns.
    ///
    /// # Errors
    ///
    /// `ModuleNotFound` for unknown keys, `Backup` if the copy fails.
    pub async fn uninstall_module(
        &self,
        actor: &Actor,
        key: &str,
        options: UninstallOptions,
    ) -> Result<UninstallReport, EngineError> {
        let result = self.uninstall_inner(key, options).await;
        self.finish_transition(actor, key, AuditAction::Uninstall, result)
            .await
    }

    /// Check a module's declared requirements against this host.
    ///
    /// # Errors
    ///
    /// Returns `DependencyUnmet` listing every unmet requirement.
    pub fn check_dependencies(&self, descriptor: &ModuleDescriptor) -> Result<(), EngineError> {
        let settings = self.settings();
        let deps = &descriptor.dependencies;
        let mut reasons = Vec::new();

        for (what, required, available) in [
            ("core", deps.core.as_deref(), &settings.core_version),
            ("runtime", deps.runtime.as_deref(), &settings.runtime_version),
        ] {
            let Some(required) = required else { continue };
            match parse_requirement(required) {
                Ok(req) if req.matches(available) => {}
                Ok(req) => reasons.push(format!("{what} {available} does not satisfy {req}")),
                Err(e) => reasons.push(format!("{what}: {e}")),
            }
        }

        for capability in &deps.capabilities {
            if !settings.has_capability(capability) {
                reasons.push(format!("missing capability '{capability}'"));
            }
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(EngineError::DependencyUnmet {
                key: descriptor.key.clone(),
                reasons,
            })
        }
    }

    async fn finish_transition<T>(
        &self,
        actor: &Actor,
        key: &str,
        action: AuditAction,
        result: Result<Transition<T>, EngineError>,
    ) -> Result<T, EngineError> {
        match result {
            Ok(Transition::Changed {
                value,
                description,
                detail,
            }) => {
                tracing::info!(module = %key, action = %action, actor = %actor.label(), "{description}");
                self.record_audit(
                    Some(actor),
                    AuditEvent::new(key, action, description).detail(detail),
                )
                .await;
                Ok(value)
            }
            Ok(Transition::Unchanged(value)) => {
                tracing::debug!(module = %key, action = %action, "Already in target state");
                Ok(value)
            }
            Err(e) => {
                if e.is_fault() {
                    tracing::error!(module = %key, action = %action, error = %e, "Lifecycle transition failed");
                } else {
                    tracing::debug!(module = %key, action = %action, error = %e, "Lifecycle transition rejected");
                }
                if let Some(error_action) = action.error_variant() {
                    self.record_audit(
                        Some(actor),
                        AuditEvent::new(key, error_action, e.to_string())
                            .detail(json!({ "error": e.to_string() })),
                    )
                    .await;
                }
                Err(e)
            }
        }
    }

    /// Registry row for `key`, distinguishing unregistered modules that
    /// exist on disk from unknown keys.
    async fn require_entry(
        &self,
        key: &str,
        action: &'static str,
    ) -> Result<RegistryEntry, EngineError> {
        if let Some(entry) = self.registry_entry(key).await? {
            return Ok(entry);
        }
        match self.catalog().find(key)? {
            Some(_) => Err(EngineError::InvalidTransition {
                key: key.to_string(),
                from: LifecycleState::Discovered,
                action,
            }),
            None => Err(EngineError::ModuleNotFound {
                key: key.to_string(),
            }),
        }
    }

    fn find_on_disk(&self, key: &str) -> Result<DiscoveredModule, EngineError> {
        self.catalog()
            .find(key)?
            .ok_or_else(|| EngineError::ModuleNotFound {
                key: key.to_string(),
            })
    }

    async fn register_inner(&self, key: &str) -> Result<Transition<RegistryEntry>, EngineError> {
        if let Some(entry) = self.registry_entry(key).await? {
            return Err(EngineError::InvalidTransition {
                key: key.to_string(),
                from: entry.state,
                action: "register",
            });
        }
        let module = self.find_on_disk(key)?;

        upsert_entry(
            self.db().conn(),
            &module,
            LifecycleState::Registered,
            Utc::now(),
        )
        .await?;
        let entry = self
            .registry_entry(key)
            .await?
            .ok_or(DatabaseError::NoResult)?;

        Ok(Transition::Changed {
            description: format!("Registered {key} {}", entry.descriptor.version),
            detail: json!({
                "version": entry.descriptor.version.to_string(),
                "path": entry.path.display().to_string(),
            }),
            value: entry,
        })
    }

    async fn install_inner(&self, key: &str) -> Result<Transition<RegistryEntry>, EngineError> {
        let entry = self.require_entry(key, "install").await?;
        match entry.state {
            LifecycleState::Active => return Ok(Transition::Unchanged(entry)),
            LifecycleState::Registered => {}
            from => {
                return Err(EngineError::InvalidTransition {
                    key: key.to_string(),
                    from,
                    action: "install",
                });
            }
        }

        let module = self.find_on_disk(key)?;
        self.check_dependencies(&module.descriptor)?;
        let instance = self.factories().instantiate(&module.descriptor)?;
        let script = read_create_script(&module)?;

        let tx = self
            .db()
            .conn()
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await?;
        let provisioned = match provision(&tx, &module, script.as_deref()).await {
            Ok(p) => p,
            Err(e) => {
                rollback(tx, key).await;
                return Err(e);
            }
        };

        match provisioned {
            Provisioned::AlreadyActive(entry) => {
                rollback(tx, key).await;
                Ok(Transition::Unchanged(entry))
            }
            Provisioned::Installed {
                entry,
                table_created,
            } => {
                tx.commit().await?;
                self.instances().insert(key, instance);
                Ok(Transition::Changed {
                    description: format!("Installed {key} {}", entry.descriptor.version),
                    detail: json!({
                        "version": entry.descriptor.version.to_string(),
                        "table": entry.table(),
                        "table_created": table_created,
                    }),
                    value: entry,
                })
            }
        }
    }

    async fn activate_inner(&self, key: &str) -> Result<Transition<RegistryEntry>, EngineError> {
        let entry = self.require_entry(key, "activate").await?;
        if entry.state == LifecycleState::Active {
            return Ok(Transition::Unchanged(entry));
        }
        if entry.state != LifecycleState::Inactive {
            return Err(EngineError::InvalidTransition {
                key: key.to_string(),
                from: entry.state,
                action: "activate",
            });
        }

        if !table_exists(self.db().conn(), entry.table()).await? {
            return Err(EngineError::InconsistentState {
                issues: vec![format!(
                    "module '{key}' is installed but table '{}' is missing",
                    entry.table()
                )],
            });
        }
        let instance = self.factories().instantiate(&entry.descriptor)?;

        let moved = transition_state(
            self.db().conn(),
            key,
            LifecycleState::Inactive,
            LifecycleState::Active,
            Utc::now(),
        )
        .await?;
        let current = self.require_entry(key, "activate").await?;
        if !moved {
            return if current.state == LifecycleState::Active {
                Ok(Transition::Unchanged(current))
            } else {
                Err(EngineError::InvalidTransition {
                    key: key.to_string(),
                    from: current.state,
                    action: "activate",
                })
            };
        }

        self.instances().insert(key, instance);
        Ok(Transition::Changed {
            description: format!("Activated {key}"),
            detail: json!({ "from": LifecycleState::Inactive, "to": LifecycleState::Active }),
            value: current,
        })
    }

    async fn deactivate_inner(&self, key: &str) -> Result<Transition<RegistryEntry>, EngineError> {
        let entry = self.require_entry(key, "deactivate").await?;
        if entry.state == LifecycleState::Inactive {
            return Ok(Transition::Unchanged(entry));
        }
        if !entry.state.can_transition_to(LifecycleState::Inactive) {
            return Err(EngineError::InvalidTransition {
                key: key.to_string(),
                from: entry.state,
                action: "deactivate",
            });
        }

        let moved = transition_state(
            self.db().conn(),
            key,
            LifecycleState::Active,
            LifecycleState::Inactive,
            Utc::now(),
        )
        .await?;
        self.instances().invalidate(key);
        let current = self.require_entry(key, "deactivate").await?;
        if !moved {
            return if current.state == LifecycleState::Inactive {
                Ok(Transition::Unchanged(current))
            } else {
                Err(EngineError::InvalidTransition {
                    key: key.to_string(),
                    from: current.state,
                    action: "deactivate",
                })
            };
        }

        Ok(Transition::Changed {
            description: format!("Deactivated {key}"),
            detail: json!({ "from": LifecycleState::Active, "to": LifecycleState::Inactive }),
            value: current,
        })
    }

    async fn uninstall_inner(
        &self,
        key: &str,
        options: UninstallOptions,
    ) -> Result<Transition<UninstallReport>, EngineError> {
        let entry = self.require_entry(key, "uninstall").await?;
        if !entry.state.can_uninstall() {
            return Err(EngineError::InvalidTransition {
                key: key.to_string(),
                from: entry.state,
                action: "uninstall",
            });
        }

        let tx = self
            .db()
            .conn()
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await?;
        let mut report = match self.remove_in_tx(&tx, key, options).await {
            Ok(report) => report,
            Err(e) => {
                rollback(tx, key).await;
                return Err(e);
            }
        };
        tx.commit().await?;
        self.instances().invalidate(key);

        if options.delete_files {
            match tokio::fs::remove_dir_all(&entry.path).await {
                Ok(()) => report.files_deleted = true,
                Err(e) => {
                    tracing::warn!(
                        module = %key,
                        path = %entry.path.display(),
                        error = %e,
                        "Failed to delete module files"
                    );
                    report
                        .warnings
                        .push(format!("could not delete {}: {e}", entry.path.display()));
                }
            }
        }

        Ok(Transition::Changed {
            description: format!("Uninstalled {key}"),
            detail: json!({
                "delete_data": options.delete_data,
                "backup_files": options.backup_files,
                "delete_files": options.delete_files,
                "table_dropped": report.table_dropped,
                "backup_path": report.backup_path.as_ref().map(|p| p.display().to_string()),
            }),
            value: report,
        })
    }

    async fn remove_in_tx(
        &self,
        conn: &libsql::Connection,
        key: &str,
        options: UninstallOptions,
    ) -> Result<UninstallReport, EngineError> {
        let entry = fetch_entry(conn, key)
            .await?
            .ok_or_else(|| EngineError::ModuleNotFound {
                key: key.to_string(),
            })?;
        let mut report = UninstallReport {
            key: key.to_string(),
            ..UninstallReport::default()
        };

        if options.backup_files {
            report.backup_path = Some(backup_module(&entry, self.backup_dir()).await?);
        }

        if options.delete_data && table_exists(conn, entry.table()).await? {
            if let Some(owner) = table_owner(conn, entry.table(), key).await? {
                tracing::warn!(
                    module = %key,
                    table = %entry.table(),
                    owner = %owner,
                    "Keeping result table owned by another module"
                );
                report.warnings.push(format!(
                    "table '{}' belongs to module '{owner}' and was kept",
                    entry.table()
                ));
            } else {
                conn.execute(&format!("DROP TABLE {}", quote_ident(entry.table())), ())
                    .await?;
                report.table_dropped = true;
            }
        }

        delete_entry(conn, key).await?;
        Ok(report)
    }
}

/// Create and verify the module's table, then flip the registry row to active.
/// Runs inside the install transaction.
async fn provision(
    conn: &libsql::Connection,
    module: &DiscoveredModule,
    script: Option<&str>,
) -> Result<Provisioned, EngineError> {
    let key = module.key();
    let table = module.descriptor.storage.table.as_str();

    let entry = fetch_entry(conn, key)
        .await?
        .ok_or_else(|| EngineError::ModuleNotFound {
            key: key.to_string(),
        })?;
    match entry.state {
        LifecycleState::Active => return Ok(Provisioned::AlreadyActive(entry)),
        LifecycleState::Registered => {}
        from => {
            return Err(EngineError::InvalidTransition {
                key: key.to_string(),
                from,
                action: "install",
            });
        }
    }

    if let Some(owner) = table_owner(conn, table, key).await? {
        return Err(EngineError::TableClaimed {
            key: key.to_string(),
            table: table.to_string(),
            owner,
        });
    }

    let table_created = if table_exists(conn, table).await? {
        tracing::debug!(module = %key, table, "Result table already exists, keeping it");
        false
    } else {
        let ddl = script.map_or_else(|| default_table_ddl(table), str::to_string);
        conn.execute_batch(&ddl)
            .await
            .map_err(|e| EngineError::Provisioning {
                key: key.to_string(),
                reason: format!("create script failed: {e}"),
            })?;
        true
    };

    let columns = table_columns(conn, table).await?;
    if columns.is_empty() {
        return Err(EngineError::Provisioning {
            key: key.to_string(),
            reason: format!("script did not create table '{table}'"),
        });
    }
    let missing = missing_common_columns(&columns);
    if !missing.is_empty() {
        return Err(EngineError::Provisioning {
            key: key.to_string(),
            reason: format!("table '{table}' lacks columns {}", missing.join(", ")),
        });
    }

    conn.execute(&unique_index_ddl(table), ())
        .await
        .map_err(|e| EngineError::Provisioning {
            key: key.to_string(),
            reason: format!("unique index on '{table}': {e}"),
        })?;

    let now = Utc::now();
    upsert_entry(conn, module, LifecycleState::Registered, now).await?;
    if !transition_state(conn, key, LifecycleState::Registered, LifecycleState::Active, now).await?
    {
        return Err(DatabaseError::InvalidState(format!("module '{key}' left registered state mid-install")).into());
    }
    let entry = fetch_entry(conn, key)
        .await?
        .ok_or(DatabaseError::NoResult)?;

    Ok(Provisioned::Installed {
        entry,
        table_created,
    })
}

fn read_create_script(module: &DiscoveredModule) -> Result<Option<String>, EngineError> {
    let Some(path) = module.create_script_path() else {
        return Ok(None);
    };
    std::fs::read_to_string(&path)
        .map(Some)
        .map_err(|e| EngineError::Provisioning {
            key: module.key().to_string(),
            reason: format!("cannot read {}: {e}", path.display()),
        })
}

async fn rollback(tx: libsql::Transaction, key: &str) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(module = %key, error = %e, "Rollback failed");
    }
}

/// Copy the module directory to `<backup_dir>/<key>-<timestamp>`.
async fn backup_module(entry: &RegistryEntry, backup_dir: &Path) -> Result<PathBuf, EngineError> {
    let target = backup_dir.join(format!(
        "{}-{}",
        entry.key(),
        Utc::now().format("%Y%m%dT%H%M%S%.3f")
    ));
    let source = entry.path.clone();
    let dest = target.clone();
    let copied = tokio::task::spawn_blocking(move || copy_dir_recursive(&source, &dest))
        .await
        .map_err(std::io::Error::other)
        .and_then(|r| r);

    match copied {
        Ok(files) => {
            tracing::info!(
                module = %entry.key(),
                backup = %target.display(),
                files,
                "Backed up module files"
            );
            Ok(target)
        }
        Err(source) => {
            // The timestamped target is ours; drop whatever was copied.
            match tokio::fs::remove_dir_all(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    module = %entry.key(),
                    backup = %target.display(),
                    error = %e,
                    "Failed to remove partial backup"
                ),
            }
            Err(EngineError::Backup {
                key: entry.key().to_string(),
                path: target,
                source,
            })
        }
    }
}

/// Recursively copy `src` into a new directory `dst`. Returns the file count.
fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<u64> {
    if !src.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("module directory {} does not exist", src.display()),
        ));
    }
    std::fs::create_dir_all(dst)?;
    let mut files = 0;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            files += copy_dir_recursive(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
            files += 1;
        }
    }
    Ok(files)
}
