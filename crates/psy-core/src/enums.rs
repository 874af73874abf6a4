//! Lifecycle states and audit actions for Psylab.
//!
//! All enums use `snake_case` serialization via `#[serde(rename_all = "snake_case")]`.
//! `LifecycleState` provides `allowed_next_states()` to enforce valid module
//! transitions at the application layer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// LifecycleState
// ---------------------------------------------------------------------------

/// Lifecycle state of a test module.
///
/// ```text
/// discovered → registered → active ⇄ inactive
///                  │           │        │
///                  └───────────┴────────┴──→ (uninstalled: row removed)
/// ```
///
/// `Discovered` modules exist only on disk; every other state is backed by a
/// row in the module registry. Uninstalling removes the row, so it is not a
/// state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Discovered,
    Registered,
    Active,
    Inactive,
}

impl LifecycleState {
    /// Valid next states from the current state.
    #[must_use]
    pub const fn allowed_next_states(self) -> &'static [Self] {
        match self {
            Self::Discovered => &[Self::Registered],
            Self::Registered => &[Self::Active],
            Self::Active => &[Self::Inactive],
            Self::Inactive => &[Self::Active],
        }
    }

    /// Check whether transitioning to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next_states().contains(&next)
    }

    /// Whether the module has a registry row that uninstall may remove.
    #[must_use]
    pub const fn can_uninstall(self) -> bool {
        !matches!(self, Self::Discovered)
    }

    /// Whether storage has been provisioned for this module.
    #[must_use]
    pub const fn is_installed(self) -> bool {
        matches!(self, Self::Active | Self::Inactive)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Registered => "registered",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AuditAction
// ---------------------------------------------------------------------------

/// Type of action recorded in the audit log.
///
/// The `*_error` variants record failed lifecycle attempts. They are written
/// outside the failed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Register,
    Install,
    Activate,
    Deactivate,
    Uninstall,
    Create,
    Update,
    Delete,
    InstallError,
    ActivateError,
    DeactivateError,
    UninstallError,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Install => "install",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Uninstall => "uninstall",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::InstallError => "install_error",
            Self::ActivateError => "activate_error",
            Self::DeactivateError => "deactivate_error",
            Self::UninstallError => "uninstall_error",
        }
    }

    /// The failure action recorded when this lifecycle action aborts.
    ///
    /// Returns `None` for actions without a failure counterpart.
    #[must_use]
    pub const fn error_variant(self) -> Option<Self> {
        match self {
            Self::Install => Some(Self::InstallError),
            Self::Activate => Some(Self::ActivateError),
            Self::Deactivate => Some(Self::DeactivateError),
            Self::Uninstall => Some(Self::UninstallError),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
