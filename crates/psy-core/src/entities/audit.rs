use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::AuditAction;

/// An append-only audit log entry recording a lifecycle transition or a
/// result-record mutation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct AuditEntry {
    pub id: String,
    /// Tenant the entry belongs to. `None` for operator-level lifecycle work.
    pub tenant_id: Option<i64>,
    pub module_key: String,
    pub record_id: Option<i64>,
    pub action: AuditAction,
    pub description: String,
    pub detail: Option<serde_json::Value>,
    pub actor: String,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}
