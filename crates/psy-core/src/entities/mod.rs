//! Entity structs for the Psylab module engine.
//!
//! All structs derive `Serialize`, `Deserialize`, and `JsonSchema` for JSON
//! roundtrip and schema validation.

mod audit;
mod module;
mod result;

pub use audit::AuditEntry;
pub use module::{ModuleDependencies, ModuleDescriptor, StorageContract};
pub use result::{RecordId, ResultRecord};
