//! ID prefixes and shared column names.

/// Prefix for audit log entry IDs (`aud-xxxxxxxx`).
pub const PREFIX_AUDIT: &str = "aud";

/// Every ID prefix issued by the engine.
pub const ALL_PREFIXES: &[&str] = &[PREFIX_AUDIT];

pub const COL_ID: &str = "id";
pub const COL_CHILD_ID: &str = "child_id";
pub const COL_PSYCHOLOGIST_ID: &str = "psychologist_id";
pub const COL_TEST_DATE: &str = "test_date";
pub const COL_CREATED_AT: &str = "created_at";

/// Columns every module result table must carry, in canonical order.
///
/// Module-specific columns may never reuse these names.
pub const COMMON_COLUMNS: &[&str] = &[
    COL_ID,
    COL_CHILD_ID,
    COL_PSYCHOLOGIST_ID,
    COL_TEST_DATE,
    COL_CREATED_AT,
];

/// Returns true if `name` is one of the engine-owned result columns.
#[must_use]
pub fn is_common_column(name: &str) -> bool {
    COMMON_COLUMNS.contains(&name)
}

/// Tables the engine itself owns. No module may name one as its result table.
pub const ENGINE_TABLES: &[&str] = &["modules", "audit_log", "children"];

/// Returns true for engine-owned tables and `SQLite`'s internal `sqlite_*` names.
#[must_use]
pub fn is_engine_table(name: &str) -> bool {
    ENGINE_TABLES.contains(&name) || name.starts_with("sqlite_")
}

/// Returns true if `s` is a valid module key or table identifier:
/// non-empty, lowercase ASCII letters, digits and underscores only.
#[must_use]
pub fn is_valid_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}
