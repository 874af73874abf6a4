//! # psy-db
//!
//! libSQL storage for the Psylab module engine.
//!
//! Holds the module registry, the audit log, and one result table per
//! installed module. [`service::PsyService`] layers the lifecycle manager and
//! the generic, tenant-scoped result store on top of a single connection;
//! operations live in [`repos`] as `impl PsyService` blocks.

pub mod children;
pub mod error;
pub mod helpers;
pub mod introspect;
mod migrations;
pub mod repos;
pub mod service;
pub mod transient;

#[cfg(test)]
mod test_support;

use std::time::Duration;

use error::DatabaseError;
use libsql::Builder;

/// Database handle: one libSQL database and its connection.
pub struct PsyDb {
    #[allow(dead_code)]
    db: libsql::Database,
    conn: libsql::Connection,
}

impl PsyDb {
    /// Open a local database file, or `":memory:"` for tests.
    ///
    /// Enables foreign keys, sets the busy timeout, and runs migrations.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the database cannot be opened or
    /// migrations fail.
    pub async fn open_local(path: &str, busy_timeout: Duration) -> Result<Self, DatabaseError> {
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;

        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Migration(format!("PRAGMA foreign_keys: {e}")))?;

        // PRAGMA busy_timeout returns a row, so it goes through query().
        let millis = busy_timeout.as_millis();
        let mut rows = conn
            .query(&format!("PRAGMA busy_timeout = {millis}"), ())
            .await
            .map_err(|e| DatabaseError::Migration(format!("PRAGMA busy_timeout: {e}")))?;
        rows.next().await?;

        let psy_db = Self { db, conn };
        psy_db.run_migrations().await?;
        tracing::debug!(path, busy_timeout_ms = %millis, "Opened database");
        Ok(psy_db)
    }

    /// Access the underlying libSQL connection for direct queries.
    #[must_use]
    pub const fn conn(&self) -> &libsql::Connection {
        &self.conn
    }

    /// Generate a prefixed ID via libSQL. Returns e.g., `"aud-a3f8b2c1"`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails or returns no rows.
    pub async fn generate_id(&self, prefix: &str) -> Result<String, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT '{prefix}-' || lower(hex(randomblob(4)))"),
                (),
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        Ok(row.get::<String>(0)?)
    }
}
