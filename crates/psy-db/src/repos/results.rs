//! Generic, tenant-scoped result store.
//!
//! Module tables are not known at compile time. Columns are introspected at
//! runtime and everything beyond the common columns travels as
//! [`ModuleFields`]. Every statement against a module table binds the
//! actor's `psychologist_id`; a record owned by someone else is
//! indistinguishable from a missing one.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use psy_core::entities::{RecordId, ResultRecord};
use psy_core::enums::{AuditAction, LifecycleState};
use psy_core::identity::Actor;
use psy_core::ids::{
    COL_CHILD_ID, COL_CREATED_AT, COL_ID, COL_PSYCHOLOGIST_ID, COL_TEST_DATE, is_common_column,
};
use psy_core::values::{FieldValue, ModuleFields};
use psy_modules::{Annotation, ModuleInstance, run_compute, run_interpret};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{DatabaseError, EngineError};
use crate::helpers::{
    from_sql_value, parse_date, parse_datetime, quote_ident, to_sql_value, value_as_i64,
};
use crate::introspect::{ColumnInfo, table_columns};
use crate::repos::audit::AuditEvent;
use crate::repos::registry::RegistryEntry;
use crate::service::PsyService;
use crate::transient::is_unique_violation;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Input for [`PsyService::create_result`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewResult {
    pub child_id: i64,
    pub test_date: NaiveDate,
    /// Module-specific columns only.
    pub fields: ModuleFields,
}

impl NewResult {
    #[must_use]
    pub fn new(child_id: i64, test_date: NaiveDate) -> Self {
        Self {
            child_id,
            test_date,
            fields: ModuleFields::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.set(name, value);
        self
    }

    /// Build from a raw submitted field map, e.g. a decoded form body.
    ///
    /// `child_id` and `test_date` are required. A `psychologist_id`, if
    /// present, must name the actor. `id` and `created_at` are assigned by
    /// the store and rejected.
    ///
    /// # Errors
    ///
    /// `MissingField`, `InvalidValue`, or `AccessDenied`.
    pub fn from_fields(
        actor: &Actor,
        raw: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, EngineError> {
        let child_id = required(raw, COL_CHILD_ID)
            .and_then(|v| json_i64(v).ok_or_else(|| invalid(COL_CHILD_ID, "expected an integer")))?;
        let test_date = required(raw, COL_TEST_DATE).and_then(|v| {
            v.as_str()
                .and_then(|s| NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok())
                .ok_or_else(|| invalid(COL_TEST_DATE, "expected a YYYY-MM-DD date"))
        })?;

        if let Some(value) = raw.get(COL_PSYCHOLOGIST_ID).filter(|v| !v.is_null()) {
            let claimed = json_i64(value)
                .ok_or_else(|| invalid(COL_PSYCHOLOGIST_ID, "expected an integer"))?;
            if claimed != actor.psychologist_id {
                return Err(EngineError::AccessDenied {
                    psychologist_id: actor.psychologist_id,
                    resource: format!("results of psychologist {claimed}"),
                });
            }
        }

        let mut fields = ModuleFields::new();
        for (name, value) in raw {
            match name.as_str() {
                COL_CHILD_ID | COL_TEST_DATE | COL_PSYCHOLOGIST_ID => {}
                COL_ID | COL_CREATED_AT => {
                    return Err(invalid(name, "assigned by the result store"));
                }
                _ => {
                    let value = FieldValue::from_json(value)
                        .map_err(|e| invalid(name, &e.to_string()))?;
                    fields.set(name.clone(), value);
                }
            }
        }

        Ok(Self {
            child_id,
            test_date,
            fields,
        })
    }
}

fn required<'a>(
    raw: &'a serde_json::Map<String, serde_json::Value>,
    field: &str,
) -> Result<&'a serde_json::Value, EngineError> {
    raw.get(field)
        .filter(|v| !v.is_null() && v.as_str().is_none_or(|s| !s.trim().is_empty()))
        .ok_or_else(|| EngineError::MissingField {
            field: field.to_string(),
        })
}

fn json_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn invalid(field: &str, reason: &str) -> EngineError {
    EngineError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Changes for [`PsyService::update_result`]. Unmentioned fields keep their value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultUpdate {
    pub test_date: Option<NaiveDate>,
    pub fields: ModuleFields,
}

impl ResultUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_test_date(mut self, test_date: NaiveDate) -> Self {
        self.test_date = Some(test_date);
        self
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.set(name, value);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Filter for [`PsyService::find_results_by_tenant`]. Date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultFilter {
    pub child_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub order: SortOrder,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Statistics over one numeric column for the actor's rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub field: String,
    /// Rows where the field is not NULL.
    pub count: u64,
    pub average: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Occurrences per distinct value, ordered by value.
    pub distribution: Vec<(FieldValue, u64)>,
}

/// First and last administration of a module for one child.
#[derive(Debug, Clone, PartialEq)]
pub struct TestDateRange {
    pub first: ResultRecord,
    pub last: ResultRecord,
}

fn row_text(value: libsql::Value, column: &str) -> Result<String, DatabaseError> {
    match value {
        libsql::Value::Text(s) => Ok(s),
        other => Err(DatabaseError::InvalidState(format!(
            "column '{column}' holds {other:?}, expected text"
        ))),
    }
}

/// Decode a `SELECT *` row by column name.
fn row_to_record(module_key: &str, row: &libsql::Row) -> Result<ResultRecord, DatabaseError> {
    let mut id = None;
    let mut child_id = None;
    let mut psychologist_id = None;
    let mut test_date = None;
    let mut created_at = None;
    let mut fields = ModuleFields::new();

    for idx in 0..row.column_count() {
        let name = row
            .column_name(idx)
            .ok_or_else(|| DatabaseError::InvalidState(format!("unnamed column {idx}")))?
            .to_string();
        let value = row.get_value(idx)?;
        match name.as_str() {
            COL_ID => id = Some(value_as_i64(&value, COL_ID)?),
            COL_CHILD_ID => child_id = Some(value_as_i64(&value, COL_CHILD_ID)?),
            COL_PSYCHOLOGIST_ID => {
                psychologist_id = Some(value_as_i64(&value, COL_PSYCHOLOGIST_ID)?);
            }
            COL_TEST_DATE => test_date = Some(parse_date(&row_text(value, COL_TEST_DATE)?)?),
            COL_CREATED_AT => {
                created_at = Some(parse_datetime(&row_text(value, COL_CREATED_AT)?)?);
            }
            _ => fields.set(name, from_sql_value(value)),
        }
    }

    let lacks = |column: &str| {
        DatabaseError::InvalidState(format!("row of '{module_key}' lacks column '{column}'"))
    };
    Ok(ResultRecord {
        id: RecordId(id.ok_or_else(|| lacks(COL_ID))?),
        module_key: module_key.to_string(),
        child_id: child_id.ok_or_else(|| lacks(COL_CHILD_ID))?,
        psychologist_id: psychologist_id.ok_or_else(|| lacks(COL_PSYCHOLOGIST_ID))?,
        test_date: test_date.ok_or_else(|| lacks(COL_TEST_DATE))?,
        created_at: created_at.ok_or_else(|| lacks(COL_CREATED_AT))?,
        fields,
    })
}

/// Full record as stored, for audit snapshots.
fn snapshot(record: &ResultRecord) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(COL_ID.into(), json!(record.id.0));
    map.insert(COL_CHILD_ID.into(), json!(record.child_id));
    map.insert(COL_PSYCHOLOGIST_ID.into(), json!(record.psychologist_id));
    map.insert(
        COL_TEST_DATE.into(),
        json!(record.test_date.format(DATE_FORMAT).to_string()),
    );
    map.insert(COL_CREATED_AT.into(), json!(record.created_at.to_rfc3339()));
    for (name, value) in record.fields.iter() {
        map.insert(name.to_string(), value.to_json());
    }
    serde_json::Value::Object(map)
}

fn validate_field_names(
    module: &str,
    columns: &[ColumnInfo],
    fields: &ModuleFields,
) -> Result<(), EngineError> {
    for name in fields.names() {
        if is_common_column(name) {
            return Err(EngineError::ReservedField {
                module: module.to_string(),
                field: name.to_string(),
            });
        }
        if !columns.iter().any(|c| c.name == name) {
            return Err(EngineError::UnknownField {
                module: module.to_string(),
                field: name.to_string(),
            });
        }
    }
    Ok(())
}

fn duplicate(module: &str, child_id: i64, test_date: NaiveDate) -> EngineError {
    EngineError::DuplicateRecord {
        module: module.to_string(),
        child_id,
        test_date,
    }
}

impl PsyService {
    /// Store a new administration for a child of the actor.
    ///
    /// The module's compute hook runs on the raw fields first; its derived
    /// fields are stored alongside them.
    ///
    /// # Errors
    ///
    /// `ModuleNotActive`, `AccessDenied`, `UnknownField`, `ReservedField`,
    /// `DuplicateRecord`, `Hook`, `TableMissing`, or a storage error.
    pub async fn create_result(
        &self,
        actor: &Actor,
        module_key: &str,
        new: NewResult,
    ) -> Result<ResultRecord, EngineError> {
        let entry = self.store_module(module_key, true).await?;
        self.ensure_child_owned(actor, new.child_id).await?;
        let columns = self.live_columns(&entry).await?;
        validate_field_names(module_key, &columns, &new.fields)?;
        if self
            .administration_exists(&entry, actor, new.child_id, new.test_date, None)
            .await?
        {
            return Err(duplicate(module_key, new.child_id, new.test_date));
        }

        let instance = self.instance_for(&entry)?;
        let derived = compute(instance.as_ref(), module_key, &new.fields)?;
        validate_field_names(module_key, &columns, &derived)?;
        let mut fields = new.fields;
        fields.merge(&derived);

        let mut names = vec![
            COL_CHILD_ID.to_string(),
            COL_PSYCHOLOGIST_ID.to_string(),
            COL_TEST_DATE.to_string(),
            COL_CREATED_AT.to_string(),
        ];
        let mut params = vec![
            libsql::Value::Integer(new.child_id),
            libsql::Value::Integer(actor.psychologist_id),
            libsql::Value::Text(new.test_date.format(DATE_FORMAT).to_string()),
            libsql::Value::Text(Utc::now().to_rfc3339()),
        ];
        for (name, value) in fields.iter() {
            names.push(name.to_string());
            params.push(to_sql_value(value));
        }
        let column_list = names
            .iter()
            .map(|n| quote_ident(n))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=params.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({column_list}) VALUES ({placeholders})",
            quote_ident(entry.table())
        );

        let conn = self.db().conn();
        if let Err(e) = conn.execute(&sql, libsql::params_from_iter(params)).await {
            if is_unique_violation(&e) {
                return Err(duplicate(module_key, new.child_id, new.test_date));
            }
            return Err(e.into());
        }
        let id = conn.last_insert_rowid();

        let record = self.load_owned(actor, &entry, id).await?;
        tracing::debug!(module = %module_key, id, child_id = record.child_id, "Created result");
        self.record_audit(
            Some(actor),
            AuditEvent::new(
                module_key,
                AuditAction::Create,
                format!("Created result {id} for child {}", record.child_id),
            )
            .record(id)
            .detail(snapshot(&record)),
        )
        .await;
        Ok(record)
    }

    /// Change fields or the test date of one of the actor's records.
    ///
    /// Derived fields are recomputed from the merged record. An update that
    /// changes nothing writes nothing and returns the record as stored.
    ///
    /// # Errors
    ///
    /// As [`Self::create_result`], plus `NotFound` for a record the actor does not own.
    pub async fn update_result(
        &self,
        actor: &Actor,
        module_key: &str,
        id: i64,
        update: ResultUpdate,
    ) -> Result<ResultRecord, EngineError> {
        let entry = self.store_module(module_key, true).await?;
        let columns = self.live_columns(&entry).await?;
        validate_field_names(module_key, &columns, &update.fields)?;
        let existing = self.load_owned(actor, &entry, id).await?;
        self.ensure_child_owned(actor, existing.child_id).await?;

        let test_date = update.test_date.unwrap_or(existing.test_date);
        if test_date != existing.test_date
            && self
                .administration_exists(&entry, actor, existing.child_id, test_date, Some(id))
                .await?
        {
            return Err(duplicate(module_key, existing.child_id, test_date));
        }

        let mut merged = existing.fields.clone();
        merged.merge(&update.fields);
        let instance = self.instance_for(&entry)?;
        let derived = compute(instance.as_ref(), module_key, &merged)?;
        validate_field_names(module_key, &columns, &derived)?;
        let mut requested = update.fields;
        requested.merge(&derived);

        let mut changes = ModuleFields::new();
        let mut diff = serde_json::Map::new();
        for (name, value) in requested.iter() {
            let old = existing.fields.get(name).cloned().unwrap_or(FieldValue::Null);
            if &old != value {
                diff.insert(
                    name.to_string(),
                    json!({ "old": old.to_json(), "new": value.to_json() }),
                );
                changes.set(name, value.clone());
            }
        }
        if test_date != existing.test_date {
            diff.insert(
                COL_TEST_DATE.to_string(),
                json!({
                    "old": existing.test_date.format(DATE_FORMAT).to_string(),
                    "new": test_date.format(DATE_FORMAT).to_string(),
                }),
            );
        }
        if diff.is_empty() {
            return Ok(existing);
        }

        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (name, value) in changes.iter() {
            params.push(to_sql_value(value));
            assignments.push(format!("{} = ?{}", quote_ident(name), params.len()));
        }
        if test_date != existing.test_date {
            params.push(libsql::Value::Text(test_date.format(DATE_FORMAT).to_string()));
            assignments.push(format!("{COL_TEST_DATE} = ?{}", params.len()));
        }
        params.push(libsql::Value::Integer(id));
        params.push(libsql::Value::Integer(actor.psychologist_id));
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{} AND psychologist_id = ?{}",
            quote_ident(entry.table()),
            assignments.join(", "),
            params.len() - 1,
            params.len()
        );

        if let Err(e) = self
            .db()
            .conn()
            .execute(&sql, libsql::params_from_iter(params))
            .await
        {
            if is_unique_violation(&e) {
                return Err(duplicate(module_key, existing.child_id, test_date));
            }
            return Err(e.into());
        }

        let record = self.load_owned(actor, &entry, id).await?;
        self.record_audit(
            Some(actor),
            AuditEvent::new(module_key, AuditAction::Update, format!("Updated result {id}"))
                .record(id)
                .detail(serde_json::Value::Object(diff)),
        )
        .await;
        Ok(record)
    }

    /// Delete one of the actor's records. Returns the deleted record.
    ///
    /// # Errors
    ///
    /// `ModuleNotActive`, `NotFound`, `AccessDenied`, or a storage error.
    pub async fn delete_result(
        &self,
        actor: &Actor,
        module_key: &str,
        id: i64,
    ) -> Result<ResultRecord, EngineError> {
        let entry = self.store_module(module_key, true).await?;
        self.live_columns(&entry).await?;
        let existing = self.load_owned(actor, &entry, id).await?;
        self.ensure_child_owned(actor, existing.child_id).await?;

        let deleted = self
            .db()
            .conn()
            .execute(
                &format!(
                    "DELETE FROM {} WHERE id = ?1 AND psychologist_id = ?2",
                    quote_ident(entry.table())
                ),
                libsql::params![id, actor.psychologist_id],
            )
            .await?;
        if deleted == 0 {
            return Err(EngineError::NotFound {
                module: module_key.to_string(),
                id,
            });
        }

        self.record_audit(
            Some(actor),
            AuditEvent::new(module_key, AuditAction::Delete, format!("Deleted result {id}"))
                .record(id)
                .detail(snapshot(&existing)),
        )
        .await;
        Ok(existing)
    }

    /// One of the actor's records. Works while the module is inactive.
    ///
    /// # Errors
    ///
    /// `ModuleNotFound`, `TableMissing`, `NotFound`, or a storage error.
    pub async fn find_result(
        &self,
        actor: &Actor,
        module_key: &str,
        id: i64,
    ) -> Result<ResultRecord, EngineError> {
        let entry = self.store_module(module_key, false).await?;
        self.live_columns(&entry).await?;
        self.load_owned(actor, &entry, id).await
    }

    /// The actor's records matching `filter`, ordered by test date then
    /// insertion time.
    ///
    /// # Errors
    ///
    /// `ModuleNotFound`, `TableMissing`, `AccessDenied` when filtering on
    /// another psychologist's child, or a storage error.
    pub async fn find_results_by_tenant(
        &self,
        actor: &Actor,
        module_key: &str,
        filter: &ResultFilter,
    ) -> Result<Vec<ResultRecord>, EngineError> {
        let entry = self.store_module(module_key, false).await?;
        self.live_columns(&entry).await?;

        let mut params = vec![libsql::Value::Integer(actor.psychologist_id)];
        let mut conditions = vec!["psychologist_id = ?1".to_string()];
        if let Some(child_id) = filter.child_id {
            self.ensure_child_owned(actor, child_id).await?;
            params.push(libsql::Value::Integer(child_id));
            conditions.push(format!("child_id = ?{}", params.len()));
        }
        if let Some(from) = filter.date_from {
            params.push(libsql::Value::Text(from.format(DATE_FORMAT).to_string()));
            conditions.push(format!("test_date >= ?{}", params.len()));
        }
        if let Some(to) = filter.date_to {
            params.push(libsql::Value::Text(to.format(DATE_FORMAT).to_string()));
            conditions.push(format!("test_date <= ?{}", params.len()));
        }

        let order = filter.order.as_sql();
        let page = match (filter.limit, filter.offset) {
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (None, Some(offset)) => format!(" LIMIT -1 OFFSET {offset}"),
            (None, None) => String::new(),
        };
        let sql = format!(
            "SELECT * FROM {} WHERE {} ORDER BY test_date {order}, created_at {order}, id {order}{page}",
            quote_ident(entry.table()),
            conditions.join(" AND ")
        );
        self.query_records(module_key, &sql, params).await
    }

    /// All of a child's records in one module, oldest administration first.
    ///
    /// # Errors
    ///
    /// `AccessDenied` if the child does not belong to the actor, plus the
    /// errors of [`Self::find_result`].
    pub async fn find_results_by_child(
        &self,
        actor: &Actor,
        module_key: &str,
        child_id: i64,
    ) -> Result<Vec<ResultRecord>, EngineError> {
        self.find_results_by_tenant(
            actor,
            module_key,
            &ResultFilter {
                child_id: Some(child_id),
                ..ResultFilter::default()
            },
        )
        .await
    }

    /// Annotations from the module's interpret hook; empty when it has none.
    ///
    /// # Errors
    ///
    /// `ModuleNotActive`, `NotFound`, `LoadFailed`, or a storage error.
    pub async fn interpret_result(
        &self,
        actor: &Actor,
        module_key: &str,
        id: i64,
    ) -> Result<Vec<Annotation>, EngineError> {
        let entry = self.store_module(module_key, true).await?;
        self.live_columns(&entry).await?;
        let record = self.load_owned(actor, &entry, id).await?;
        let instance = self.instance_for(&entry)?;
        Ok(run_interpret(instance.as_ref(), &record))
    }

    /// Live columns of the module's result table, in table order.
    ///
    /// # Errors
    ///
    /// `ModuleNotFound`, `TableMissing`, or a storage error.
    pub async fn introspect_columns(&self, module_key: &str) -> Result<Vec<ColumnInfo>, EngineError> {
        let entry = self.store_module(module_key, false).await?;
        self.live_columns(&entry).await
    }

    /// Count, average, extremes, and value distribution of a numeric column
    /// over the actor's records.
    ///
    /// The column is checked against the live schema before any data is read.
    ///
    /// # Errors
    ///
    /// `UnknownField`, `ReservedField`, `NonNumericField`, `ModuleNotFound`,
    /// `TableMissing`, or a storage error.
    pub async fn aggregate(
        &self,
        actor: &Actor,
        module_key: &str,
        field: &str,
    ) -> Result<Aggregate, EngineError> {
        let entry = self.store_module(module_key, false).await?;
        let columns = self.live_columns(&entry).await?;
        if is_common_column(field) {
            return Err(EngineError::ReservedField {
                module: module_key.to_string(),
                field: field.to_string(),
            });
        }
        let column = columns
            .iter()
            .find(|c| c.name == field)
            .ok_or_else(|| EngineError::UnknownField {
                module: module_key.to_string(),
                field: field.to_string(),
            })?;
        if !column.is_numeric() {
            return Err(EngineError::NonNumericField {
                module: module_key.to_string(),
                field: field.to_string(),
                declared_type: column.declared_type.clone(),
            });
        }

        let table = quote_ident(entry.table());
        let col = quote_ident(field);
        let conn = self.db().conn();

        let mut rows = conn
            .query(
                &format!(
                    "SELECT COUNT({col}), AVG({col}), MIN({col}), MAX({col})
                     FROM {table} WHERE psychologist_id = ?1"
                ),
                [actor.psychologist_id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let count = u64::try_from(value_as_i64(&row.get_value(0)?, "count")?).unwrap_or(0);
        let average = from_sql_value(row.get_value(1)?).as_f64();
        let min = from_sql_value(row.get_value(2)?).as_f64();
        let max = from_sql_value(row.get_value(3)?).as_f64();
        drop(rows);

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {col}, COUNT(*) FROM {table}
                     WHERE psychologist_id = ?1 AND {col} IS NOT NULL
                     GROUP BY {col} ORDER BY {col}"
                ),
                [actor.psychologist_id],
            )
            .await?;
        let mut distribution = Vec::new();
        while let Some(row) = rows.next().await? {
            let value = from_sql_value(row.get_value(0)?);
            let n = u64::try_from(value_as_i64(&row.get_value(1)?, "count")?).unwrap_or(0);
            distribution.push((value, n));
        }

        Ok(Aggregate {
            field: field.to_string(),
            count,
            average,
            min,
            max,
            distribution,
        })
    }

    /// First and last administration for a child, or `None` when the child
    /// has no records. Ties on the date are broken by insertion time.
    ///
    /// # Errors
    ///
    /// `AccessDenied` for another psychologist's child, `ModuleNotFound`,
    /// `TableMissing`, or a storage error.
    pub async fn test_date_range(
        &self,
        actor: &Actor,
        module_key: &str,
        child_id: i64,
    ) -> Result<Option<TestDateRange>, EngineError> {
        let entry = self.store_module(module_key, false).await?;
        self.live_columns(&entry).await?;
        self.ensure_child_owned(actor, child_id).await?;

        let table = quote_ident(entry.table());
        let mut ends = Vec::with_capacity(2);
        for order in [SortOrder::Asc, SortOrder::Desc] {
            let order = order.as_sql();
            let sql = format!(
                "SELECT * FROM {table} WHERE psychologist_id = ?1 AND child_id = ?2
                 ORDER BY test_date {order}, created_at {order}, id {order} LIMIT 1"
            );
            let params = vec![
                libsql::Value::Integer(actor.psychologist_id),
                libsql::Value::Integer(child_id),
            ];
            ends.push(self.query_records(module_key, &sql, params).await?.pop());
        }

        let last = ends.pop().flatten();
        let first = ends.pop().flatten();
        Ok(first.zip(last).map(|(first, last)| TestDateRange { first, last }))
    }

    /// Registry row of a module whose records are being accessed.
    async fn store_module(
        &self,
        module_key: &str,
        require_active: bool,
    ) -> Result<RegistryEntry, EngineError> {
        let entry = self
            .registry_entry(module_key)
            .await?
            .ok_or_else(|| EngineError::ModuleNotFound {
                key: module_key.to_string(),
            })?;
        // Registered modules do not own a table yet, even when one by their
        // name exists.
        let usable = if require_active {
            entry.state == LifecycleState::Active
        } else {
            entry.state.is_installed()
        };
        if !usable {
            return Err(EngineError::ModuleNotActive {
                key: module_key.to_string(),
                state: entry.state,
            });
        }
        Ok(entry)
    }

    async fn live_columns(&self, entry: &RegistryEntry) -> Result<Vec<ColumnInfo>, EngineError> {
        let columns = table_columns(self.db().conn(), entry.table()).await?;
        if columns.is_empty() {
            return Err(EngineError::TableMissing {
                module: entry.key().to_string(),
                table: entry.table().to_string(),
            });
        }
        Ok(columns)
    }

    async fn ensure_child_owned(&self, actor: &Actor, child_id: i64) -> Result<(), EngineError> {
        if self
            .children()
            .child_belongs_to(self.db(), child_id, actor.psychologist_id)
            .await?
        {
            Ok(())
        } else {
            Err(EngineError::AccessDenied {
                psychologist_id: actor.psychologist_id,
                resource: format!("child {child_id}"),
            })
        }
    }

    fn instance_for(&self, entry: &RegistryEntry) -> Result<Arc<dyn ModuleInstance>, EngineError> {
        Ok(self
            .instances()
            .get_or_load(self.factories(), &entry.descriptor)?)
    }

    /// Whether the actor already has an administration for the child on
    /// `test_date`, ignoring record `except`.
    async fn administration_exists(
        &self,
        entry: &RegistryEntry,
        actor: &Actor,
        child_id: i64,
        test_date: NaiveDate,
        except: Option<i64>,
    ) -> Result<bool, EngineError> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE psychologist_id = ?1 AND child_id = ?2 AND test_date = ?3
             AND (?4 IS NULL OR id != ?4) LIMIT 1",
            quote_ident(entry.table())
        );
        let mut rows = self
            .db()
            .conn()
            .query(
                &sql,
                libsql::params![
                    actor.psychologist_id,
                    child_id,
                    test_date.format(DATE_FORMAT).to_string(),
                    except
                ],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    async fn load_owned(
        &self,
        actor: &Actor,
        entry: &RegistryEntry,
        id: i64,
    ) -> Result<ResultRecord, EngineError> {
        let sql = format!(
            "SELECT * FROM {} WHERE id = ?1 AND psychologist_id = ?2",
            quote_ident(entry.table())
        );
        let params = vec![
            libsql::Value::Integer(id),
            libsql::Value::Integer(actor.psychologist_id),
        ];
        self.query_records(entry.key(), &sql, params)
            .await?
            .pop()
            .ok_or_else(|| EngineError::NotFound {
                module: entry.key().to_string(),
                id,
            })
    }

    async fn query_records(
        &self,
        module_key: &str,
        sql: &str,
        params: Vec<libsql::Value>,
    ) -> Result<Vec<ResultRecord>, EngineError> {
        let mut rows = self
            .db()
            .conn()
            .query(sql, libsql::params_from_iter(params))
            .await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(row_to_record(module_key, &row)?);
        }
        Ok(records)
    }
}

fn compute(
    instance: &dyn ModuleInstance,
    module_key: &str,
    raw: &ModuleFields,
) -> Result<ModuleFields, EngineError> {
    run_compute(instance, raw).map_err(|e| EngineError::Hook {
        module: module_key.to_string(),
        message: e.to_string(),
    })
}
