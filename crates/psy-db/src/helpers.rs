//! Column decoding shared by the registry, audit, and result repos.
//!
//! Module tables are only known at runtime, so result rows travel as
//! `libsql::Value` and are mapped to [`FieldValue`] here.

use chrono::{DateTime, NaiveDate, Utc};
use psy_core::values::FieldValue;

use crate::error::DatabaseError;

/// Timestamp columns carry either RFC 3339 (engine writes) or
/// `YYYY-MM-DD HH:MM:SS` (`datetime('now')` defaults in module scripts).
///
/// # Errors
///
/// `DatabaseError::Query` when neither layout matches.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc())
        })
        .map_err(|e| DatabaseError::Query(format!("timestamp '{s}' unreadable: {e}")))
}

/// Empty strings count as absent.
///
/// # Errors
///
/// `DatabaseError::Query` for a non-empty, unparsable timestamp.
pub fn parse_optional_datetime(s: Option<&str>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.filter(|s| !s.is_empty()).map(parse_datetime).transpose()
}

/// Reads the leading `YYYY-MM-DD` of a `test_date` value; any time part is
/// ignored.
///
/// # Errors
///
/// `DatabaseError::Query` if the leading date is malformed.
pub fn parse_date(s: &str) -> Result<NaiveDate, DatabaseError> {
    let day = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| DatabaseError::Query(format!("test date '{s}' unreadable: {e}")))
}

/// Decode a snake_case TEXT column (registry state, audit action) through
/// the type's serde representation.
///
/// # Errors
///
/// `DatabaseError::Query` for an unknown label.
pub fn parse_enum<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, DatabaseError> {
    T::deserialize(serde_json::Value::from(s))
        .map_err(|e| DatabaseError::Query(format!("unknown label '{s}': {e}")))
}

/// NULL and `''` both read as `None`.
///
/// # Errors
///
/// Propagates the column read failure.
pub fn get_opt_string(row: &libsql::Row, idx: i32) -> Result<Option<String>, DatabaseError> {
    Ok(row.get::<Option<String>>(idx)?.filter(|s| !s.is_empty()))
}

/// # Errors
///
/// `DatabaseError::Query` when a non-empty column is not valid JSON.
pub fn parse_optional_json(s: Option<&str>) -> Result<Option<serde_json::Value>, DatabaseError> {
    s.filter(|s| !s.is_empty())
        .map(|s| {
            serde_json::from_str(s)
                .map_err(|e| DatabaseError::Query(format!("stored JSON unreadable: {e}")))
        })
        .transpose()
}

#[must_use]
pub fn to_sql_value(value: &FieldValue) -> libsql::Value {
    match value {
        FieldValue::Null => libsql::Value::Null,
        FieldValue::Integer(i) => libsql::Value::Integer(*i),
        FieldValue::Real(r) => libsql::Value::Real(*r),
        FieldValue::Text(s) => libsql::Value::Text(s.clone()),
        FieldValue::Blob(b) => libsql::Value::Blob(b.clone()),
    }
}

#[must_use]
pub fn from_sql_value(value: libsql::Value) -> FieldValue {
    match value {
        libsql::Value::Null => FieldValue::Null,
        libsql::Value::Integer(i) => FieldValue::Integer(i),
        libsql::Value::Real(r) => FieldValue::Real(r),
        libsql::Value::Text(s) => FieldValue::Text(s),
        libsql::Value::Blob(b) => FieldValue::Blob(b),
    }
}

/// Read an integer column that may have been stored as text by a loosely
/// typed module table.
///
/// # Errors
///
/// Returns `DatabaseError::InvalidState` for NULL or non-numeric values.
pub fn value_as_i64(value: &libsql::Value, column: &str) -> Result<i64, DatabaseError> {
    match value {
        libsql::Value::Integer(i) => Ok(*i),
        libsql::Value::Text(s) => s.trim().parse().map_err(|_| {
            DatabaseError::InvalidState(format!("column '{column}' holds non-integer '{s}'"))
        }),
        other => Err(DatabaseError::InvalidState(format!(
            "column '{column}' holds {other:?}, expected an integer"
        ))),
    }
}

/// Quote a SQL identifier. Embedded double quotes are doubled.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
