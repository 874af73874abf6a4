//! Engine-owned schema, applied every time the store opens.
//!
//! Scripts are `IF NOT EXISTS` throughout. Module result tables are never
//! created here; install provisions them from the module's own script.

use crate::PsyDb;
use crate::error::DatabaseError;

/// Ordered `(name, script)` pairs.
const SCRIPTS: [(&str, &str); 2] = [
    ("001_initial", include_str!("../migrations/001_initial.sql")),
    ("002_children", include_str!("../migrations/002_children.sql")),
];

impl PsyDb {
    pub(crate) async fn run_migrations(&self) -> Result<(), DatabaseError> {
        for (name, script) in SCRIPTS {
            tracing::trace!(migration = name, "Applying engine schema");
            self.conn
                .execute_batch(script)
                .await
                .map_err(|e| DatabaseError::Migration(format!("{name}: {e}")))?;
        }
        Ok(())
    }
}
