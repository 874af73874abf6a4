//! Module registry repository.
//!
//! One row per registered module, holding the validated descriptor, its
//! directory, and the lifecycle state. Discovered-only modules have no row;
//! uninstall deletes the row. The free functions take a connection so the
//! lifecycle manager can call them inside its transactions.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use psy_core::entities::ModuleDescriptor;
use psy_core::enums::LifecycleState;
use psy_modules::DiscoveredModule;

use crate::error::DatabaseError;
use crate::helpers::{get_opt_string, parse_datetime, parse_enum, parse_optional_datetime};
use crate::service::PsyService;

/// A module's row in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub descriptor: ModuleDescriptor,
    /// Module directory at registration time.
    pub path: PathBuf,
    pub state: LifecycleState,
    /// Descriptor fingerprint; changes when the manifest changes.
    pub fingerprint: String,
    pub registered_at: DateTime<Utc>,
    pub installed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RegistryEntry {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.descriptor.key
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.descriptor.storage.table
    }

    /// Whether the registry row still matches `module` as found on disk.
    #[must_use]
    pub fn matches(&self, module: &DiscoveredModule) -> bool {
        self.fingerprint == module.descriptor.fingerprint() && self.path == module.path
    }
}

const ENTRY_COLUMNS: &str =
    "key, descriptor, path, state, fingerprint, registered_at, installed_at, updated_at";

fn row_to_entry(row: &libsql::Row) -> Result<RegistryEntry, DatabaseError> {
    let key = row.get::<String>(0)?;
    let descriptor: ModuleDescriptor = serde_json::from_str(&row.get::<String>(1)?)
        .map_err(|e| DatabaseError::InvalidState(format!("registry descriptor of '{key}': {e}")))?;
    Ok(RegistryEntry {
        descriptor,
        path: PathBuf::from(row.get::<String>(2)?),
        state: parse_enum(&row.get::<String>(3)?)?,
        fingerprint: row.get::<String>(4)?,
        registered_at: parse_datetime(&row.get::<String>(5)?)?,
        installed_at: parse_optional_datetime(get_opt_string(row, 6)?.as_deref())?,
        updated_at: parse_datetime(&row.get::<String>(7)?)?,
    })
}

pub(crate) async fn fetch_entry(
    conn: &libsql::Connection,
    key: &str,
) -> Result<Option<RegistryEntry>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {ENTRY_COLUMNS} FROM modules WHERE key = ?1"),
            [key],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_entry(&row)?)),
        None => Ok(None),
    }
}

/// Insert a registry row for `module` in `state`, or refresh the metadata of
/// an existing row. An existing row keeps its lifecycle state.
pub(crate) async fn upsert_entry(
    conn: &libsql::Connection,
    module: &DiscoveredModule,
    state: LifecycleState,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let d = &module.descriptor;
    let descriptor_json = serde_json::to_string(d)
        .map_err(|e| DatabaseError::Query(format!("serialize descriptor of '{}': {e}", d.key)))?;
    let now = now.to_rfc3339();
    conn.execute(
        "INSERT INTO modules (key, name, description, version, author, category, table_name, path,
                              descriptor, fingerprint, state, registered_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
         ON CONFLICT(key) DO UPDATE SET
             name = excluded.name,
             description = excluded.description,
             version = excluded.version,
             author = excluded.author,
             category = excluded.category,
             table_name = excluded.table_name,
             path = excluded.path,
             descriptor = excluded.descriptor,
             fingerprint = excluded.fingerprint,
             updated_at = excluded.updated_at",
        libsql::params![
            d.key.as_str(),
            d.name.as_str(),
            d.description.as_str(),
            d.version.to_string(),
            d.author.as_str(),
            d.category.as_str(),
            d.storage.table.as_str(),
            module.path.to_string_lossy().into_owned(),
            descriptor_json,
            d.fingerprint(),
            state.as_str(),
            now
        ],
    )
    .await?;
    Ok(())
}

/// Move `key` from `from` to `to`. Returns false when the row was not in
/// `from`, leaving it untouched.
pub(crate) async fn transition_state(
    conn: &libsql::Connection,
    key: &str,
    from: LifecycleState,
    to: LifecycleState,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let mark_installed = from == LifecycleState::Registered && to.is_installed();
    let changed = conn
        .execute(
            "UPDATE modules
             SET state = ?3,
                 updated_at = ?4,
                 installed_at = CASE WHEN ?5 THEN ?4 ELSE installed_at END
             WHERE key = ?1 AND state = ?2",
            libsql::params![key, from.as_str(), to.as_str(), now.to_rfc3339(), i64::from(mark_installed)],
        )
        .await?;
    Ok(changed > 0)
}

/// Key of the installed module, other than `key`, whose result table is
/// `table`.
pub(crate) async fn table_owner(
    conn: &libsql::Connection,
    table: &str,
    key: &str,
) -> Result<Option<String>, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT key FROM modules
             WHERE table_name = ?1 AND key <> ?2 AND state IN ('active', 'inactive')
             LIMIT 1",
            [table, key],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row.get::<String>(0)?)),
        None => Ok(None),
    }
}

pub(crate) async fn delete_entry(conn: &libsql::Connection, key: &str) -> Result<bool, DatabaseError> {
    let deleted = conn
        .execute("DELETE FROM modules WHERE key = ?1", [key])
        .await?;
    Ok(deleted > 0)
}

impl PsyService {
    /// Registry row for `key`, if the module is registered.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails or the row is corrupt.
    pub async fn registry_entry(&self, key: &str) -> Result<Option<RegistryEntry>, DatabaseError> {
        fetch_entry(self.db().conn(), key).await
    }

    /// All registry rows, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails or a row is corrupt.
    pub async fn registry_entries(&self) -> Result<Vec<RegistryEntry>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!("SELECT {ENTRY_COLUMNS} FROM modules ORDER BY key"),
                (),
            )
            .await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(row_to_entry(&row)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::helpers::{discovered, test_service};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn upsert_inserts_then_preserves_state() {
        let svc = test_service().await;
        let conn = svc.db().conn();
        let module = discovered("wisc", "5.0.0");

        upsert_entry(conn, &module, LifecycleState::Registered, Utc::now())
            .await
            .unwrap();
        assert!(
            transition_state(
                conn,
                "wisc",
                LifecycleState::Registered,
                LifecycleState::Active,
                Utc::now()
            )
            .await
            .unwrap()
        );

        let newer = discovered("wisc", "5.1.0");
        upsert_entry(conn, &newer, LifecycleState::Registered, Utc::now())
            .await
            .unwrap();

        let entry = svc.registry_entry("wisc").await.unwrap().unwrap();
        assert_eq!(entry.state, LifecycleState::Active);
        assert_eq!(entry.descriptor.version, semver::Version::new(5, 1, 0));
        assert!(entry.installed_at.is_some());
        assert!(entry.matches(&newer));
        assert!(!entry.matches(&module));
    }

    #[tokio::test]
    async fn transition_requires_expected_state() {
        let svc = test_service().await;
        let conn = svc.db().conn();
        upsert_entry(conn, &discovered("wisc", "5.0.0"), LifecycleState::Registered, Utc::now())
            .await
            .unwrap();

        let moved = transition_state(
            conn,
            "wisc",
            LifecycleState::Active,
            LifecycleState::Inactive,
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(!moved);
        let entry = svc.registry_entry("wisc").await.unwrap().unwrap();
        assert_eq!(entry.state, LifecycleState::Registered);
        assert!(entry.installed_at.is_none());
    }

    #[tokio::test]
    async fn table_owner_ignores_registered_rows() {
        let svc = test_service().await;
        let conn = svc.db().conn();
        let wisc = discovered("wisc", "5.0.0");
        let mut intruder = discovered("intruder", "1.0.0");
        intruder.descriptor.storage.table = "wisc_results".into();
        for module in [&wisc, &intruder] {
            upsert_entry(conn, module, LifecycleState::Registered, Utc::now())
                .await
                .unwrap();
        }
        assert_eq!(table_owner(conn, "wisc_results", "intruder").await.unwrap(), None);

        transition_state(
            conn,
            "wisc",
            LifecycleState::Registered,
            LifecycleState::Active,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(
            table_owner(conn, "wisc_results", "intruder").await.unwrap(),
            Some("wisc".to_string())
        );
        assert_eq!(table_owner(conn, "wisc_results", "wisc").await.unwrap(), None);

        // The partial unique index backs the check up.
        let second_owner = transition_state(
            conn,
            "intruder",
            LifecycleState::Registered,
            LifecycleState::Active,
            Utc::now(),
        )
        .await;
        assert!(second_owner.is_err());
    }

    #[tokio::test]
    async fn entries_sorted_and_deletable() {
        let svc = test_service().await;
        let conn = svc.db().conn();
        for key in ["wisc", "anxiety_test"] {
            upsert_entry(conn, &discovered(key, "1.0.0"), LifecycleState::Registered, Utc::now())
                .await
                .unwrap();
        }

        let keys: Vec<String> = svc
            .registry_entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.descriptor.key)
            .collect();
        assert_eq!(keys, vec!["anxiety_test", "wisc"]);

        assert!(delete_entry(conn, "wisc").await.unwrap());
        assert!(!delete_entry(conn, "wisc").await.unwrap());
        assert!(svc.registry_entry("wisc").await.unwrap().is_none());
    }
}
