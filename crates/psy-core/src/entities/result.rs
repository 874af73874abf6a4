use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::values::ModuleFields;

/// Identity of a result row within its module table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One test administration stored in a module's result table.
///
/// The common columns are typed; everything else the table carries is in
/// `fields`, in table column order.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ResultRecord {
    pub id: RecordId,
    pub module_key: String,
    pub child_id: i64,
    pub psychologist_id: i64,
    pub test_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub fields: ModuleFields,
}
