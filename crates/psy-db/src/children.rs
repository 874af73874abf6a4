//! Child ownership lookups.
//!
//! Children belong to exactly one psychologist. The result store asks a
//! [`ChildDirectory`] before touching any child's results; the directory is
//! injected so hosts with their own child registry can plug it in.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::PsyDb;
use crate::error::DatabaseError;

#[async_trait]
pub trait ChildDirectory: Send + Sync {
    /// Whether `child_id` exists and is owned by `psychologist_id`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the lookup itself fails.
    async fn child_belongs_to(
        &self,
        db: &PsyDb,
        child_id: i64,
        psychologist_id: i64,
    ) -> Result<bool, DatabaseError>;
}

/// Directory backed by the `children` table of the engine database.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlChildDirectory;

#[async_trait]
impl ChildDirectory for SqlChildDirectory {
    async fn child_belongs_to(
        &self,
        db: &PsyDb,
        child_id: i64,
        psychologist_id: i64,
    ) -> Result<bool, DatabaseError> {
        let mut rows = db
            .conn()
            .query(
                "SELECT 1 FROM children WHERE id = ?1 AND psychologist_id = ?2",
                libsql::params![child_id, psychologist_id],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }
}

/// Fixed in-memory ownership map.
#[derive(Debug, Default, Clone)]
pub struct StaticChildDirectory {
    owners: HashMap<i64, i64>,
}

impl StaticChildDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `child_id` belongs to `psychologist_id`.
    #[must_use]
    pub fn with_child(mut self, child_id: i64, psychologist_id: i64) -> Self {
        self.owners.insert(child_id, psychologist_id);
        self
    }
}

#[async_trait]
impl ChildDirectory for StaticChildDirectory {
    async fn child_belongs_to(
        &self,
        _db: &PsyDb,
        child_id: i64,
        psychologist_id: i64,
    ) -> Result<bool, DatabaseError> {
        Ok(self.owners.get(&child_id) == Some(&psychologist_id))
    }
}
