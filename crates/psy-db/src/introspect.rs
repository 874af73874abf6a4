//! Live schema introspection and provisioning DDL for module result tables.
//!
//! The column set of a result table is whatever the module's script created,
//! so the store asks `SQLite` at runtime instead of trusting the manifest.

use psy_core::ids::{
    COL_CHILD_ID, COL_CREATED_AT, COL_ID, COL_PSYCHOLOGIST_ID, COL_TEST_DATE, COMMON_COLUMNS,
};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::helpers::{get_opt_string, quote_ident};

/// Type affinity derived from a declared column type, per `SQLite` rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

impl Affinity {
    /// Affinity of a declared type such as `"INTEGER"`, `"VARCHAR(20)"`, or `""`.
    #[must_use]
    pub fn of(declared_type: &str) -> Self {
        let t = declared_type.to_ascii_uppercase();
        if t.contains("INT") {
            Self::Integer
        } else if t.contains("CHAR") || t.contains("CLOB") || t.contains("TEXT") {
            Self::Text
        } else if t.is_empty() || t.contains("BLOB") {
            Self::Blob
        } else if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") {
            Self::Real
        } else {
            Self::Numeric
        }
    }

    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Real | Self::Numeric)
    }
}

/// One column of a result table as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

impl ColumnInfo {
    #[must_use]
    pub fn affinity(&self) -> Affinity {
        Affinity::of(&self.declared_type)
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        self.affinity().is_numeric()
    }
}

/// Whether `table` exists in the database reachable through `conn`.
///
/// # Errors
///
/// Returns `DatabaseError` if the catalog query fails.
pub async fn table_exists(conn: &libsql::Connection, table: &str) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
        )
        .await?;
    Ok(rows.next().await?.is_some())
}

/// Columns of `table` in table order. Empty when the table does not exist.
///
/// # Errors
///
/// Returns `DatabaseError` if the pragma query fails.
pub async fn table_columns(
    conn: &libsql::Connection,
    table: &str,
) -> Result<Vec<ColumnInfo>, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
            [table],
        )
        .await?;

    let mut columns = Vec::new();
    while let Some(row) = rows.next().await? {
        columns.push(ColumnInfo {
            name: row.get::<String>(0)?,
            declared_type: get_opt_string(&row, 1)?.unwrap_or_default(),
            not_null: row.get::<i64>(2)? != 0,
            default_value: get_opt_string(&row, 3)?,
            primary_key: row.get::<i64>(4)? != 0,
        });
    }
    Ok(columns)
}

/// Common columns absent from `columns`, in canonical order.
#[must_use]
pub fn missing_common_columns(columns: &[ColumnInfo]) -> Vec<&'static str> {
    COMMON_COLUMNS
        .iter()
        .copied()
        .filter(|common| !columns.iter().any(|c| c.name == *common))
        .collect()
}

/// DDL for a module that declares no provisioning script: the common columns only.
#[must_use]
pub fn default_table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            {COL_ID} INTEGER PRIMARY KEY,
            {COL_CHILD_ID} INTEGER NOT NULL,
            {COL_PSYCHOLOGIST_ID} INTEGER NOT NULL,
            {COL_TEST_DATE} TEXT NOT NULL,
            {COL_CREATED_AT} TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
        quote_ident(table)
    )
}

/// DDL for the index backing `(child_id, test_date, psychologist_id)` uniqueness.
#[must_use]
pub fn unique_index_ddl(table: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({COL_CHILD_ID}, {COL_TEST_DATE}, {COL_PSYCHOLOGIST_ID})",
        quote_ident(&format!("idx_{table}_unique_admin")),
        quote_ident(table)
    )
}
