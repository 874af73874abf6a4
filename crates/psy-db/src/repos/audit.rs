//! Audit log repository.
//!
//! Append-only entries recording every lifecycle transition and result
//! mutation. Audit writes that follow a committed change are best-effort: a
//! failure is logged and never undoes the change.

use chrono::{DateTime, Utc};
use psy_core::entities::AuditEntry;
use psy_core::enums::AuditAction;
use psy_core::identity::Actor;
use psy_core::ids::PREFIX_AUDIT;

use crate::error::DatabaseError;
use crate::helpers::{get_opt_string, parse_datetime, parse_enum, parse_optional_json};
use crate::service::PsyService;

/// Actor label for changes not triggered by a psychologist, such as catalog scans.
pub const SYSTEM_ACTOR: &str = "system";

/// Filter criteria for audit queries.
#[derive(Debug, Default)]
pub struct AuditFilter {
    pub module_key: Option<String>,
    pub record_id: Option<i64>,
    pub tenant_id: Option<i64>,
    pub action: Option<AuditAction>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// An audit entry about to be written.
#[derive(Debug)]
pub(crate) struct AuditEvent {
    module_key: String,
    record_id: Option<i64>,
    action: AuditAction,
    description: String,
    detail: Option<serde_json::Value>,
}

impl AuditEvent {
    pub(crate) fn new(
        module_key: impl Into<String>,
        action: AuditAction,
        description: impl Into<String>,
    ) -> Self {
        Self {
            module_key: module_key.into(),
            record_id: None,
            action,
            description: description.into(),
            detail: None,
        }
    }

    pub(crate) const fn record(mut self, id: i64) -> Self {
        self.record_id = Some(id);
        self
    }

    pub(crate) fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

fn row_to_entry(row: &libsql::Row) -> Result<AuditEntry, DatabaseError> {
    Ok(AuditEntry {
        id: row.get::<String>(0)?,
        tenant_id: row.get::<Option<i64>>(1)?,
        module_key: row.get::<String>(2)?,
        record_id: row.get::<Option<i64>>(3)?,
        action: parse_enum(&row.get::<String>(4)?)?,
        description: row.get::<String>(5)?,
        detail: parse_optional_json(get_opt_string(row, 6)?.as_deref())?,
        actor: row.get::<String>(7)?,
        ip: get_opt_string(row, 8)?,
        created_at: parse_datetime(&row.get::<String>(9)?)?,
    })
}

const AUDIT_COLUMNS: &str =
    "id, tenant_id, module_key, record_id, action, description, detail, actor, ip, created_at";

impl PsyService {
    /// Append an audit entry.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the INSERT fails.
    pub async fn append_audit(&self, entry: &AuditEntry) -> Result<(), DatabaseError> {
        self.db()
            .conn()
            .execute(
                "INSERT INTO audit_log (id, tenant_id, module_key, record_id, action, description, detail, actor, ip, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                libsql::params![
                    entry.id.as_str(),
                    entry.tenant_id,
                    entry.module_key.as_str(),
                    entry.record_id,
                    entry.action.as_str(),
                    entry.description.as_str(),
                    entry.detail.as_ref().map(std::string::ToString::to_string),
                    entry.actor.as_str(),
                    entry.ip.as_deref(),
                    entry.created_at.to_rfc3339()
                ],
            )
            .await?;
        Ok(())
    }

    /// Write `event` on behalf of `actor` (or the system), logging instead of
    /// failing when the write does not go through.
    pub(crate) async fn record_audit(&self, actor: Option<&Actor>, event: AuditEvent) {
        if let Err(e) = self.try_record_audit(actor, &event).await {
            tracing::warn!(
                module = %event.module_key,
                action = %event.action,
                error = %e,
                "Failed to write audit entry"
            );
        }
    }

    async fn try_record_audit(
        &self,
        actor: Option<&Actor>,
        event: &AuditEvent,
    ) -> Result<(), DatabaseError> {
        let entry = AuditEntry {
            id: self.db().generate_id(PREFIX_AUDIT).await?,
            tenant_id: actor.map(|a| a.psychologist_id),
            module_key: event.module_key.clone(),
            record_id: event.record_id,
            action: event.action,
            description: event.description.clone(),
            detail: event.detail.clone(),
            actor: actor.map_or_else(|| SYSTEM_ACTOR.to_string(), Actor::label),
            ip: actor.and_then(|a| a.ip.clone()),
            created_at: Utc::now(),
        };
        self.append_audit(&entry).await
    }

    /// Query audit entries with optional filters, newest first.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, DatabaseError> {
        let mut conditions = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();

        if let Some(ref key) = filter.module_key {
            params.push(libsql::Value::Text(key.clone()));
            conditions.push(format!("module_key = ?{}", params.len()));
        }
        if let Some(record_id) = filter.record_id {
            params.push(libsql::Value::Integer(record_id));
            conditions.push(format!("record_id = ?{}", params.len()));
        }
        if let Some(tenant_id) = filter.tenant_id {
            params.push(libsql::Value::Integer(tenant_id));
            conditions.push(format!("tenant_id = ?{}", params.len()));
        }
        if let Some(action) = filter.action {
            params.push(libsql::Value::Text(action.as_str().to_string()));
            conditions.push(format!("action = ?{}", params.len()));
        }
        if let Some(since) = filter.since {
            params.push(libsql::Value::Text(since.to_rfc3339()));
            conditions.push(format!("created_at >= ?{}", params.len()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit = filter.limit.unwrap_or(100);
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log {where_clause}
             ORDER BY created_at DESC, rowid DESC LIMIT {limit}"
        );

        let mut rows = self
            .db()
            .conn()
            .query(&sql, libsql::params_from_iter(params))
            .await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(row_to_entry(&row)?);
        }
        Ok(entries)
    }

    /// Most recent audit entries for a module, newest first.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn audit_history(
        &self,
        module_key: &str,
        limit: u32,
    ) -> Result<Vec<AuditEntry>, DatabaseError> {
        self.query_audit(&AuditFilter {
            module_key: Some(module_key.to_string()),
            limit: Some(limit),
            ..AuditFilter::default()
        })
        .await
    }
}
