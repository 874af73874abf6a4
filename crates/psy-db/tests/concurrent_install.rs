//! Two services installing the same module against one database file.

mod common;

use std::sync::Arc;

use common::Fixture;
use psy_core::enums::{AuditAction, LifecycleState};
use psy_core::identity::Actor;
use psy_db::children::{ChildDirectory, SqlChildDirectory};
use psy_db::repos::audit::AuditFilter;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_installs_both_succeed_once() {
    let fx = Fixture::new();
    fx.write_anxiety_module();
    let data = TempDir::new().unwrap();
    let db_path = data.path().join("psylab.db");
    let db_path = db_path.to_str().unwrap();
    let children: Arc<dyn ChildDirectory> = Arc::new(SqlChildDirectory);

    let first = Arc::new(fx.service_at(db_path, Arc::clone(&children)).await);
    let second = Arc::new(fx.service_at(db_path, Arc::clone(&children)).await);
    first.scan_and_register().await.unwrap();

    let handles: Vec<_> = [Arc::clone(&first), Arc::clone(&second)]
        .into_iter()
        .enumerate()
        .map(|(i, svc)| {
            tokio::spawn(async move {
                let actor = Actor::new(i64::try_from(i).unwrap() + 1);
                svc.install_module(&actor, "anxiety_test").await
            })
        })
        .collect();
    for handle in handles {
        let entry = handle.await.unwrap().unwrap();
        assert_eq!(entry.state, LifecycleState::Active);
    }

    let registry = second.registry_entries().await.unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(registry[0].state, LifecycleState::Active);

    let mut rows = first
        .db()
        .conn()
        .query(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'anxiety_test_results'",
            (),
        )
        .await
        .unwrap();
    let row = rows.next().await.unwrap().unwrap();
    assert_eq!(row.get::<i64>(0).unwrap(), 1);

    let installs = first
        .query_audit(&AuditFilter {
            action: Some(AuditAction::Install),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(installs.len(), 1);
    let failures = first
        .query_audit(&AuditFilter {
            action: Some(AuditAction::InstallError),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert!(failures.is_empty());
}

#[tokio::test]
async fn sql_child_directory_reads_children_table() {
    let fx = Fixture::new();
    fx.write_anxiety_module();
    let data = TempDir::new().unwrap();
    let db_path = data.path().join("psylab.db");
    let svc = fx
        .service_at(db_path.to_str().unwrap(), Arc::new(SqlChildDirectory))
        .await;
    svc.db()
        .conn()
        .execute(
            "INSERT INTO children (id, psychologist_id, first_name, last_name) VALUES (42, 1, 'Ada', 'L')",
            (),
        )
        .await
        .unwrap();
    svc.scan_and_register().await.unwrap();
    svc.install_module(&Actor::new(1), "anxiety_test").await.unwrap();

    assert!(
        svc.find_results_by_child(&Actor::new(1), "anxiety_test", 42)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        svc.find_results_by_child(&Actor::new(2), "anxiety_test", 42)
            .await
            .is_err()
    );
}
