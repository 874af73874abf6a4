//! Module discovery and backup locations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("modules")]
}

fn default_manifest_file() -> String {
    "module.json".to_string()
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups/modules")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModulesConfig {
    /// Directories scanned for module subdirectories, in precedence order.
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,

    /// Manifest file name inside each module directory.
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    /// Where uninstall copies module files when a backup is requested.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            manifest_file: default_manifest_file(),
            backup_dir: default_backup_dir(),
        }
    }
}
