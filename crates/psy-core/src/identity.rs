use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Identity of the psychologist (tenant) performing an operation.
///
/// Passed explicitly into every lifecycle and result-store call; the engine
/// never reads the acting tenant from ambient state. Produced by the
/// session/authentication collaborator, which is outside this workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Actor {
    /// Tenant identity. All result data is partitioned by this value.
    pub psychologist_id: i64,
    /// Originating client address, recorded in the audit log when known.
    pub ip: Option<String>,
}

impl Actor {
    #[must_use]
    pub const fn new(psychologist_id: i64) -> Self {
        Self {
            psychologist_id,
            ip: None,
        }
    }

    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Label stored in the audit log `actor` column.
    #[must_use]
    pub fn label(&self) -> String {
        format!("psychologist:{}", self.psychologist_id)
    }
}
