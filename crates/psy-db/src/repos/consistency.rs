//! Registry/storage consistency check.
//!
//! Reports installed modules whose table or files disagree with the
//! registry. Nothing is repaired here; findings are for operators.

use std::fmt;

use serde::Serialize;

use crate::error::EngineError;
use crate::introspect::{missing_common_columns, table_columns};
use crate::service::PsyService;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InconsistencyKind {
    /// Registry says installed but the result table does not exist.
    MissingTable,
    /// The table exists without some of the common columns.
    ContractViolation { missing_columns: Vec<String> },
    /// Registry says installed but the module directory is gone.
    MissingFiles,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inconsistency {
    pub module_key: String,
    pub table: String,
    #[serde(flatten)]
    pub kind: InconsistencyKind,
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            InconsistencyKind::MissingTable => write!(
                f,
                "module '{}' is installed but table '{}' is missing",
                self.module_key, self.table
            ),
            InconsistencyKind::ContractViolation { missing_columns } => write!(
                f,
                "table '{}' of module '{}' lacks {}",
                self.table,
                self.module_key,
                missing_columns.join(", ")
            ),
            InconsistencyKind::MissingFiles => write!(
                f,
                "module '{}' is installed but its directory is missing",
                self.module_key
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Installed modules examined.
    pub checked: usize,
    pub issues: Vec<Inconsistency>,
}

impl ConsistencyReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

impl PsyService {
    /// Compare every installed module's registry row with its table and
    /// directory. Each finding is logged at `error` level.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the registry or schema cannot be read.
    pub async fn check_consistency(&self) -> Result<ConsistencyReport, EngineError> {
        let mut report = ConsistencyReport::default();

        for entry in self.registry_entries().await? {
            if !entry.state.is_installed() {
                continue;
            }
            report.checked += 1;

            let columns = table_columns(self.db().conn(), entry.table()).await?;
            let kind = if columns.is_empty() {
                Some(InconsistencyKind::MissingTable)
            } else {
                let missing = missing_common_columns(&columns);
                (!missing.is_empty()).then(|| InconsistencyKind::ContractViolation {
                    missing_columns: missing.into_iter().map(str::to_string).collect(),
                })
            };
            let mut kinds: Vec<InconsistencyKind> = kind.into_iter().collect();
            if !entry.path.is_dir() {
                kinds.push(InconsistencyKind::MissingFiles);
            }

            for kind in kinds {
                let issue = Inconsistency {
                    module_key: entry.key().to_string(),
                    table: entry.table().to_string(),
                    kind,
                };
                tracing::error!(module = %issue.module_key, table = %issue.table, "{issue}");
                report.issues.push(issue);
            }
        }

        tracing::debug!(
            checked = report.checked,
            issues = report.issues.len(),
            "Consistency check finished"
        );
        Ok(report)
    }

    /// [`Self::check_consistency`], failing on any finding.
    ///
    /// # Errors
    ///
    /// `InconsistentState` listing every finding, or a storage error.
    pub async fn ensure_consistent(&self) -> Result<(), EngineError> {
        let report = self.check_consistency().await?;
        if report.is_consistent() {
            Ok(())
        } else {
            Err(EngineError::InconsistentState {
                issues: report.issues.iter().map(ToString::to_string).collect(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::children::StaticChildDirectory;
    use crate::test_support::helpers::{test_service_with, write_module};
    use pretty_assertions::assert_eq;
    use psy_core::identity::Actor;
    use psy_modules::FactoryRegistry;
    use tempfile::TempDir;

    async fn with_installed(keys: &[&str]) -> (TempDir, PsyService) {
        let root = TempDir::new().unwrap();
        for key in keys {
            write_module(root.path(), key, "1.0.0");
        }
        let svc = test_service_with(
            vec![root.path().to_path_buf()],
            StaticChildDirectory::new(),
            FactoryRegistry::new(),
        )
        .await;
        let admin = Actor::new(1);
        for key in keys {
            svc.register_module(&admin, key).await.unwrap();
            svc.install_module(&admin, key).await.unwrap();
        }
        (root, svc)
    }

    #[tokio::test]
    async fn fresh_install_is_consistent() {
        let (_root, svc) = with_installed(&["wisc", "anxiety_test"]).await;
        let report = svc.check_consistency().await.unwrap();
        assert_eq!(report.checked, 2);
        assert!(report.is_consistent());
        svc.ensure_consistent().await.unwrap();
    }

    #[tokio::test]
    async fn dropped_table_is_reported() {
        let (_root, svc) = with_installed(&["wisc"]).await;
        svc.db()
            .conn()
            .execute("DROP TABLE wisc_results", ())
            .await
            .unwrap();

        let report = svc.check_consistency().await.unwrap();
        assert_eq!(
            report.issues,
            vec![Inconsistency {
                module_key: "wisc".into(),
                table: "wisc_results".into(),
                kind: InconsistencyKind::MissingTable,
            }]
        );

        let err = svc.ensure_consistent().await.unwrap_err();
        assert!(err.is_fault());
        assert!(matches!(err, EngineError::InconsistentState { ref issues } if issues.len() == 1));
    }

    #[tokio::test]
    async fn altered_table_and_missing_files_are_reported() {
        let (root, svc) = with_installed(&["wisc"]).await;
        let conn = svc.db().conn();
        conn.execute("DROP TABLE wisc_results", ()).await.unwrap();
        conn.execute(
            "CREATE TABLE wisc_results (id INTEGER PRIMARY KEY, child_id INTEGER)",
            (),
        )
        .await
        .unwrap();
        std::fs::remove_dir_all(root.path().join("wisc")).unwrap();

        let kinds: Vec<InconsistencyKind> = svc
            .check_consistency()
            .await
            .unwrap()
            .issues
            .into_iter()
            .map(|i| i.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                InconsistencyKind::ContractViolation {
                    missing_columns: vec![
                        "psychologist_id".into(),
                        "test_date".into(),
                        "created_at".into()
                    ],
                },
                InconsistencyKind::MissingFiles,
            ]
        );
    }

    #[tokio::test]
    async fn registered_modules_are_not_checked() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "wisc", "1.0.0");
        let svc = test_service_with(
            vec![root.path().to_path_buf()],
            StaticChildDirectory::new(),
            FactoryRegistry::new(),
        )
        .await;
        svc.scan_and_register().await.unwrap();

        let report = svc.check_consistency().await.unwrap();
        assert_eq!(report.checked, 0);
        assert!(report.is_consistent());
    }
}
