use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Identity and metadata of one pluggable test module, as declared by its
/// manifest and validated by the manifest parser.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ModuleDescriptor {
    /// Stable slug; equals the module directory name.
    pub key: String,
    pub name: String,
    pub description: String,
    #[schemars(with = "String")]
    pub version: semver::Version,
    pub author: String,
    /// Key of a configured category.
    pub category: String,
    pub dependencies: ModuleDependencies,
    pub storage: StorageContract,
}

impl ModuleDescriptor {
    /// Stable serialization used to detect manifest changes between scans.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Host requirements a module declares.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ModuleDependencies {
    /// Minimum host-core version (`"1.2.0"`) or a semver requirement (`">=1.2, <2"`).
    pub core: Option<String>,
    /// Minimum language-runtime version or requirement.
    pub runtime: Option<String>,
    /// Host capabilities the module needs.
    pub capabilities: Vec<String>,
}

/// Storage a module owns.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct StorageContract {
    /// Result table name.
    pub table: String,
    /// SQL provisioning script, relative to the module directory.
    pub create_script: Option<String>,
}

impl StorageContract {
    /// Default table name for a module without an explicit `database.table`.
    #[must_use]
    pub fn default_table(key: &str) -> String {
        format!("{key}_results")
    }
}
