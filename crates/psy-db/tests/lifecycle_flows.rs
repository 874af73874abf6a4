//! Lifecycle integration tests
//!
//! - Register, install, deactivate, activate, uninstall across real module trees
//! - Data retention across uninstall and reinstall
//! - Rejected transitions and their `*_error` audit entries
//! - Exclusive ownership of result tables
//! - Backups and file removal on uninstall

mod common;

use common::{Fixture, date};
use psy_core::enums::{AuditAction, LifecycleState};
use psy_core::identity::Actor;
use psy_db::children::StaticChildDirectory;
use psy_db::error::EngineError;
use psy_db::introspect::table_exists;
use psy_db::repos::audit::AuditFilter;
use psy_db::repos::lifecycle::UninstallOptions;
use psy_db::repos::results::NewResult;
use pretty_assertions::assert_eq;

fn admin() -> Actor {
    Actor::new(1).with_ip("127.0.0.1")
}

fn children() -> StaticChildDirectory {
    StaticChildDirectory::new().with_child(42, 1)
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_lifecycle_writes_one_audit_per_transition() {
    let fx = Fixture::new();
    fx.write_anxiety_module();
    let svc = fx.service(children()).await;
    let actor = admin();

    let entry = svc.register_module(&actor, "anxiety_test").await.unwrap();
    assert_eq!(entry.state, LifecycleState::Registered);
    let entry = svc.install_module(&actor, "anxiety_test").await.unwrap();
    assert_eq!(entry.state, LifecycleState::Active);
    assert!(entry.installed_at.is_some());
    assert!(svc.instances().contains("anxiety_test"));

    let entry = svc.deactivate_module(&actor, "anxiety_test").await.unwrap();
    assert_eq!(entry.state, LifecycleState::Inactive);
    assert!(!svc.instances().contains("anxiety_test"));

    let entry = svc.activate_module(&actor, "anxiety_test").await.unwrap();
    assert_eq!(entry.state, LifecycleState::Active);

    let report = svc
        .uninstall_module(&actor, "anxiety_test", UninstallOptions::default())
        .await
        .unwrap();
    assert!(!report.table_dropped);
    assert!(svc.registry_entry("anxiety_test").await.unwrap().is_none());

    let mut actions: Vec<AuditAction> = svc
        .audit_history("anxiety_test", 20)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    actions.reverse();
    assert_eq!(
        actions,
        vec![
            AuditAction::Register,
            AuditAction::Install,
            AuditAction::Deactivate,
            AuditAction::Activate,
            AuditAction::Uninstall,
        ]
    );

    let install = svc
        .query_audit(&AuditFilter {
            action: Some(AuditAction::Install),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(install[0].actor, "psychologist:1");
    assert_eq!(install[0].ip.as_deref(), Some("127.0.0.1"));
}

#[tokio::test]
async fn repeated_install_and_activate_are_no_ops() {
    let fx = Fixture::new();
    fx.write_anxiety_module();
    let svc = fx.service(children()).await;
    let actor = admin();
    svc.register_module(&actor, "anxiety_test").await.unwrap();
    let first = svc.install_module(&actor, "anxiety_test").await.unwrap();

    let again = svc.install_module(&actor, "anxiety_test").await.unwrap();
    assert_eq!(again, first);
    let active = svc.activate_module(&actor, "anxiety_test").await.unwrap();
    assert_eq!(active.state, LifecycleState::Active);

    let installs = svc
        .query_audit(&AuditFilter {
            module_key: Some("anxiety_test".into()),
            action: Some(AuditAction::Install),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(installs.len(), 1);
}

#[tokio::test]
async fn module_without_schema_gets_common_columns() {
    let fx = Fixture::new();
    fx.write_module("drawing_test", "0.3.0", "developmental", None);
    let svc = fx.service(children()).await;
    let actor = admin();
    svc.register_module(&actor, "drawing_test").await.unwrap();
    svc.install_module(&actor, "drawing_test").await.unwrap();

    let columns: Vec<String> = svc
        .introspect_columns("drawing_test")
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(
        columns,
        vec!["id", "child_id", "psychologist_id", "test_date", "created_at"]
    );

    let record = svc
        .create_result(&actor, "drawing_test", NewResult::new(42, date("2024-03-01")))
        .await
        .unwrap();
    assert!(record.fields.is_empty());
}

// ---------------------------------------------------------------------------
// Data retention
// ---------------------------------------------------------------------------

#[tokio::test]
async fn uninstall_keeping_data_then_reinstall_keeps_records() {
    let fx = Fixture::new();
    fx.write_anxiety_module();
    let svc = fx.service(children()).await;
    let actor = admin();
    svc.register_module(&actor, "anxiety_test").await.unwrap();
    svc.install_module(&actor, "anxiety_test").await.unwrap();
    let record = svc
        .create_result(
            &actor,
            "anxiety_test",
            NewResult::new(42, date("2024-03-01")).with("raw_score", 14),
        )
        .await
        .unwrap();

    svc.uninstall_module(&actor, "anxiety_test", UninstallOptions::default())
        .await
        .unwrap();
    let err = svc.find_result(&actor, "anxiety_test", record.id.0).await.unwrap_err();
    assert!(matches!(err, EngineError::ModuleNotFound { .. }));

    svc.register_module(&actor, "anxiety_test").await.unwrap();
    svc.install_module(&actor, "anxiety_test").await.unwrap();
    let found = svc.find_result(&actor, "anxiety_test", record.id.0).await.unwrap();
    assert_eq!(found, record);
}

#[tokio::test]
async fn uninstall_deleting_data_drops_records() {
    let fx = Fixture::new();
    fx.write_anxiety_module();
    let svc = fx.service(children()).await;
    let actor = admin();
    svc.register_module(&actor, "anxiety_test").await.unwrap();
    svc.install_module(&actor, "anxiety_test").await.unwrap();
    let record = svc
        .create_result(
            &actor,
            "anxiety_test",
            NewResult::new(42, date("2024-03-01")).with("raw_score", 14),
        )
        .await
        .unwrap();

    let report = svc
        .uninstall_module(
            &actor,
            "anxiety_test",
            UninstallOptions {
                delete_data: true,
                ..UninstallOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(report.table_dropped);

    svc.register_module(&actor, "anxiety_test").await.unwrap();
    assert!(!table_exists(svc.db().conn(), "anxiety_test_results").await.unwrap());
    let err = svc.find_result(&actor, "anxiety_test", record.id.0).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::ModuleNotActive { state: LifecycleState::Registered, .. }
    ));

    svc.install_module(&actor, "anxiety_test").await.unwrap();
    let err = svc.find_result(&actor, "anxiety_test", record.id.0).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

// ---------------------------------------------------------------------------
// Rejected transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transitions_outside_the_state_machine_are_rejected() {
    let fx = Fixture::new();
    fx.write_anxiety_module();
    let svc = fx.service(children()).await;
    let actor = admin();

    let err = svc.install_module(&actor, "anxiety_test").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition { from: LifecycleState::Discovered, action: "install", .. }
    ));

    svc.register_module(&actor, "anxiety_test").await.unwrap();
    let err = svc.register_module(&actor, "anxiety_test").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { from: LifecycleState::Registered, .. }));
    let err = svc.activate_module(&actor, "anxiety_test").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { from: LifecycleState::Registered, .. }));
    let err = svc.deactivate_module(&actor, "anxiety_test").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { from: LifecycleState::Registered, .. }));

    svc.install_module(&actor, "anxiety_test").await.unwrap();
    svc.deactivate_module(&actor, "anxiety_test").await.unwrap();
    let err = svc.install_module(&actor, "anxiety_test").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { from: LifecycleState::Inactive, .. }));

    let err = svc.install_module(&actor, "no_such_module").await.unwrap_err();
    assert!(matches!(err, EngineError::ModuleNotFound { ref key } if key == "no_such_module"));

    let errors: Vec<AuditAction> = svc
        .audit_history("anxiety_test", 20)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .filter(|a| a.as_str().ends_with("_error"))
        .collect();
    assert_eq!(
        errors,
        vec![
            AuditAction::InstallError,
            AuditAction::DeactivateError,
            AuditAction::ActivateError,
            AuditAction::InstallError,
        ]
    );
}

#[tokio::test]
async fn unmet_dependencies_leave_module_registered() {
    let fx = Fixture::new();
    let dir = fx.write_module("wisc", "5.0.0", "cognitive", None);
    std::fs::write(
        dir.join("module.json"),
        r#"{"module_key": "wisc", "name": "WISC", "version": "5.0.0", "category": "cognitive",
            "dependencies": {"core": ">=9.0.0", "capabilities": ["norm_tables"]}}"#,
    )
    .unwrap();
    let svc = fx.service(children()).await;
    let actor = admin();
    svc.register_module(&actor, "wisc").await.unwrap();

    let err = svc.install_module(&actor, "wisc").await.unwrap_err();
    match err {
        EngineError::DependencyUnmet { reasons, .. } => assert_eq!(reasons.len(), 2),
        other => panic!("expected DependencyUnmet, got {other:?}"),
    }

    let entry = svc.registry_entry("wisc").await.unwrap().unwrap();
    assert_eq!(entry.state, LifecycleState::Registered);
    assert!(!table_exists(svc.db().conn(), "wisc_results").await.unwrap());

    let audits = svc.audit_history("wisc", 1).await.unwrap();
    assert_eq!(audits[0].action, AuditAction::InstallError);
    assert!(audits[0].detail.as_ref().unwrap()["error"].is_string());
}

#[tokio::test]
async fn broken_create_script_rolls_back_install() {
    let fx = Fixture::new();
    fx.write_module(
        "wisc",
        "5.0.0",
        "cognitive",
        Some("CREATE TABLE wisc_results (id INTEGER PRIMARY KEY, score INTEGER);"),
    );
    let svc = fx.service(children()).await;
    let actor = admin();
    svc.register_module(&actor, "wisc").await.unwrap();

    let err = svc.install_module(&actor, "wisc").await.unwrap_err();
    assert!(matches!(err, EngineError::Provisioning { ref key, .. } if key == "wisc"));

    let entry = svc.registry_entry("wisc").await.unwrap().unwrap();
    assert_eq!(entry.state, LifecycleState::Registered);
    assert!(!table_exists(svc.db().conn(), "wisc_results").await.unwrap());
}

#[tokio::test]
async fn activate_with_missing_table_is_inconsistent() {
    let fx = Fixture::new();
    fx.write_anxiety_module();
    let svc = fx.service(children()).await;
    let actor = admin();
    svc.register_module(&actor, "anxiety_test").await.unwrap();
    svc.install_module(&actor, "anxiety_test").await.unwrap();
    svc.deactivate_module(&actor, "anxiety_test").await.unwrap();
    svc.db()
        .conn()
        .execute("DROP TABLE anxiety_test_results", ())
        .await
        .unwrap();

    let err = svc.activate_module(&actor, "anxiety_test").await.unwrap_err();
    assert!(matches!(err, EngineError::InconsistentState { .. }));
    assert!(!err.is_retryable());
    let entry = svc.registry_entry("anxiety_test").await.unwrap().unwrap();
    assert_eq!(entry.state, LifecycleState::Inactive);
}

// ---------------------------------------------------------------------------
// Table ownership
// ---------------------------------------------------------------------------

/// A module whose manifest names the anxiety module's result table.
fn write_squatter(fx: &Fixture) {
    let dir = fx.root().join("squatter");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("module.json"),
        r#"{"module_key": "squatter", "name": "Squatter", "version": "1.0.0",
            "category": "emotional", "database": {"table": "anxiety_test_results"}}"#,
    )
    .unwrap();
}

#[tokio::test]
async fn install_refuses_a_table_owned_by_another_module() {
    let fx = Fixture::new();
    fx.write_anxiety_module();
    write_squatter(&fx);
    let svc = fx.service(children()).await;
    let actor = admin();
    svc.register_module(&actor, "anxiety_test").await.unwrap();
    svc.install_module(&actor, "anxiety_test").await.unwrap();
    let record = svc
        .create_result(
            &actor,
            "anxiety_test",
            NewResult::new(42, date("2024-03-01")).with("raw_score", 14),
        )
        .await
        .unwrap();

    svc.register_module(&actor, "squatter").await.unwrap();
    let err = svc.install_module(&actor, "squatter").await.unwrap_err();
    match &err {
        EngineError::TableClaimed { key, table, owner } => {
            assert_eq!(key, "squatter");
            assert_eq!(table, "anxiety_test_results");
            assert_eq!(owner, "anxiety_test");
        }
        other => panic!("expected TableClaimed, got {other:?}"),
    }
    assert!(!err.is_fault());

    let entry = svc.registry_entry("squatter").await.unwrap().unwrap();
    assert_eq!(entry.state, LifecycleState::Registered);
    let err = svc.find_result(&actor, "squatter", record.id.0).await.unwrap_err();
    assert!(matches!(err, EngineError::ModuleNotActive { .. }));

    // Uninstalling the refused module cannot take the owner's data with it.
    let report = svc
        .uninstall_module(
            &actor,
            "squatter",
            UninstallOptions {
                delete_data: true,
                ..UninstallOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(!report.table_dropped);
    assert_eq!(report.warnings.len(), 1);
    let found = svc.find_result(&actor, "anxiety_test", record.id.0).await.unwrap();
    assert_eq!(found, record);
    assert!(svc.check_consistency().await.unwrap().is_consistent());

    let audits = svc.audit_history("squatter", 5).await.unwrap();
    assert!(audits.iter().any(|a| a.action == AuditAction::InstallError));
}

#[tokio::test]
async fn inactive_owner_still_holds_its_table() {
    let fx = Fixture::new();
    fx.write_anxiety_module();
    write_squatter(&fx);
    let svc = fx.service(children()).await;
    let actor = admin();
    for key in ["anxiety_test", "squatter"] {
        svc.register_module(&actor, key).await.unwrap();
    }
    svc.install_module(&actor, "anxiety_test").await.unwrap();
    svc.deactivate_module(&actor, "anxiety_test").await.unwrap();

    let err = svc.install_module(&actor, "squatter").await.unwrap_err();
    assert!(matches!(err, EngineError::TableClaimed { ref owner, .. } if owner == "anxiety_test"));

    svc.activate_module(&actor, "anxiety_test").await.unwrap();
}

// ---------------------------------------------------------------------------
// Backups and files
// ---------------------------------------------------------------------------

#[tokio::test]
async fn purge_backs_up_then_removes_everything() {
    let fx = Fixture::new();
    let dir = fx.write_anxiety_module();
    let svc = fx.service(children()).await;
    let actor = admin();
    svc.register_module(&actor, "anxiety_test").await.unwrap();
    svc.install_module(&actor, "anxiety_test").await.unwrap();

    let report = svc
        .uninstall_module(&actor, "anxiety_test", UninstallOptions::purge())
        .await
        .unwrap();
    assert!(report.table_dropped);
    assert!(report.files_deleted);
    assert!(report.warnings.is_empty());
    assert!(!dir.exists());

    let backup = report.backup_path.unwrap();
    assert!(backup.starts_with(fx.backups.path()));
    assert!(backup.join("module.json").is_file());
    assert!(backup.join("schema.sql").is_file());

    let listing = svc.list_modules().await.unwrap();
    assert!(listing.modules.is_empty());
}

#[tokio::test]
async fn failed_backup_aborts_uninstall() {
    let fx = Fixture::new();
    let dir = fx.write_anxiety_module();
    let svc = fx.service(children()).await;
    let actor = admin();
    svc.register_module(&actor, "anxiety_test").await.unwrap();
    svc.install_module(&actor, "anxiety_test").await.unwrap();
    std::fs::remove_dir_all(&dir).unwrap();

    let err = svc
        .uninstall_module(&actor, "anxiety_test", UninstallOptions::purge())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Backup { .. }));

    let entry = svc.registry_entry("anxiety_test").await.unwrap().unwrap();
    assert_eq!(entry.state, LifecycleState::Active);
    assert!(svc.introspect_columns("anxiety_test").await.is_ok());
    let audits = svc.audit_history("anxiety_test", 1).await.unwrap();
    assert_eq!(audits[0].action, AuditAction::UninstallError);
}

#[cfg(unix)]
#[tokio::test]
async fn interrupted_backup_leaves_no_partial_copy() {
    let fx = Fixture::new();
    let dir = fx.write_anxiety_module();
    // Copying follows the dangling link and fails partway through.
    std::os::unix::fs::symlink(dir.join("missing.csv"), dir.join("norms.csv")).unwrap();
    let svc = fx.service(children()).await;
    let actor = admin();
    svc.register_module(&actor, "anxiety_test").await.unwrap();
    svc.install_module(&actor, "anxiety_test").await.unwrap();

    let err = svc
        .uninstall_module(&actor, "anxiety_test", UninstallOptions::purge())
        .await
        .unwrap_err();
    match err {
        EngineError::Backup { path, .. } => assert!(!path.exists()),
        other => panic!("expected Backup, got {other:?}"),
    }
    assert_eq!(std::fs::read_dir(fx.backups.path()).unwrap().count(), 0);

    assert!(dir.join("module.json").is_file());
    let entry = svc.registry_entry("anxiety_test").await.unwrap().unwrap();
    assert_eq!(entry.state, LifecycleState::Active);
}
