//! Module manifest parser.
//!
//! A manifest is a JSON document (`module.json`) in the module directory:
//!
//! ```json
//! {
//!   "module_key": "anxiety_test",
//!   "name": "Anxiety Scale",
//!   "description": "Self-report anxiety screening",
//!   "version": "1.0.0",
//!   "author": "Psylab",
//!   "category": "emotional",
//!   "dependencies": { "core": ">=1.0.0", "runtime": "1.80.0", "capabilities": ["scoring"] },
//!   "database": { "table": "anxiety_test_results", "create_script": "schema.sql" }
//! }
//! ```
//!
//! Validation runs in stages so each failure class gets its own error kind:
//! JSON syntax ([`ManifestError::Malformed`]), required fields
//! ([`ManifestError::MissingField`]), schema shape ([`ManifestError::Invalid`]),
//! then field semantics ([`ManifestError::InvalidField`]).

use std::path::{Component, Path};
use std::sync::LazyLock;

use psy_config::CategorySet;
use psy_core::entities::{ModuleDependencies, ModuleDescriptor, StorageContract};
use psy_core::ids::{is_engine_table, is_valid_identifier};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;

use crate::error::ManifestError;

/// On-disk manifest document.
#[derive(Debug, Deserialize, JsonSchema)]
struct ManifestDocument {
    module_key: String,
    name: String,
    #[serde(default)]
    description: String,
    version: String,
    #[serde(default)]
    author: String,
    category: String,
    #[serde(default)]
    dependencies: Option<DependenciesDocument>,
    #[serde(default)]
    database: Option<DatabaseDocument>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct DependenciesDocument {
    #[serde(default)]
    core: Option<String>,
    #[serde(default)]
    runtime: Option<String>,
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct DatabaseDocument {
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    create_script: Option<String>,
}

static MANIFEST_SCHEMA: LazyLock<serde_json::Value> = LazyLock::new(|| {
    serde_json::to_value(schema_for!(ManifestDocument)).unwrap_or(serde_json::Value::Null)
});

/// JSON Schema every manifest is validated against.
#[must_use]
pub fn manifest_schema() -> &'static serde_json::Value {
    &MANIFEST_SCHEMA
}

/// Top-level fields a manifest must declare, in schema order.
#[must_use]
pub fn required_fields() -> Vec<&'static str> {
    manifest_schema()
        .get("required")
        .and_then(serde_json::Value::as_array)
        .map(|fields| fields.iter().filter_map(serde_json::Value::as_str).collect())
        .unwrap_or_default()
}

/// Parse and validate manifest bytes read from `path`.
///
/// Does not compare the key with the directory name; the catalog does that
/// because only it knows which directory the manifest came from.
///
/// # Errors
///
/// Returns the first `ManifestError` found, in stage order.
pub fn parse_manifest(
    bytes: &[u8],
    path: &Path,
    categories: &CategorySet,
) -> Result<ModuleDescriptor, ManifestError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ManifestError::Malformed {
            path: path.to_path_buf(),
            line: e.line(),
            column: e.column(),
            message: e.to_string(),
        })?;

    let Some(object) = value.as_object() else {
        return Err(ManifestError::Invalid {
            path: path.to_path_buf(),
            errors: vec!["manifest must be a JSON object".into()],
        });
    };
    if let Some(missing) = required_fields()
        .into_iter()
        .find(|field| !object.contains_key(*field))
    {
        return Err(ManifestError::MissingField {
            path: path.to_path_buf(),
            field: missing.to_string(),
        });
    }

    validate_shape(&value, path)?;

    let doc: ManifestDocument =
        serde_json::from_value(value).map_err(|e| ManifestError::Invalid {
            path: path.to_path_buf(),
            errors: vec![e.to_string()],
        })?;

    into_descriptor(doc, path, categories)
}

fn validate_shape(value: &serde_json::Value, path: &Path) -> Result<(), ManifestError> {
    let validator =
        jsonschema::validator_for(manifest_schema()).map_err(|e| ManifestError::Invalid {
            path: path.to_path_buf(),
            errors: vec![format!("manifest schema failed to compile: {e}")],
        })?;

    let errors: Vec<String> = validator.iter_errors(value).map(|e| format!("{e}")).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ManifestError::Invalid {
            path: path.to_path_buf(),
            errors,
        })
    }
}

fn into_descriptor(
    doc: ManifestDocument,
    path: &Path,
    categories: &CategorySet,
) -> Result<ModuleDescriptor, ManifestError> {
    let invalid = |field: &str, reason: String| ManifestError::InvalidField {
        path: path.to_path_buf(),
        field: field.to_string(),
        reason,
    };

    if !is_valid_identifier(&doc.module_key) {
        return Err(invalid(
            "module_key",
            format!(
                "'{}' must contain only lowercase letters, digits and underscores",
                doc.module_key
            ),
        ));
    }
    if doc.name.trim().is_empty() {
        return Err(invalid("name", "must not be empty".into()));
    }
    let version = parse_strict_version(&doc.version).ok_or_else(|| {
        invalid(
            "version",
            format!("'{}' is not of the form major.minor.patch", doc.version),
        )
    })?;
    if !categories.contains(&doc.category) {
        let known: Vec<&str> = categories.keys().collect();
        return Err(invalid(
            "category",
            format!(
                "'{}' is not a configured category (known: {})",
                doc.category,
                known.join(", ")
            ),
        ));
    }

    let deps = doc.dependencies.unwrap_or_default();
    for (field, requirement) in [
        ("dependencies.core", deps.core.as_deref()),
        ("dependencies.runtime", deps.runtime.as_deref()),
    ] {
        if let Some(req) = requirement {
            parse_requirement(req).map_err(|reason| invalid(field, reason))?;
        }
    }

    let database = doc.database.unwrap_or_default();
    let table = database
        .table
        .unwrap_or_else(|| StorageContract::default_table(&doc.module_key));
    if !is_valid_identifier(&table) {
        return Err(invalid(
            "database.table",
            format!("'{table}' must contain only lowercase letters, digits and underscores"),
        ));
    }
    if is_engine_table(&table) {
        return Err(invalid(
            "database.table",
            format!("'{table}' is reserved for the engine"),
        ));
    }
    if let Some(script) = database.create_script.as_deref() {
        let confined = !script.is_empty()
            && Path::new(script)
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !confined {
            return Err(invalid(
                "database.create_script",
                format!("'{script}' must be a relative path inside the module directory"),
            ));
        }
    }

    Ok(ModuleDescriptor {
        key: doc.module_key,
        name: doc.name,
        description: doc.description,
        version,
        author: doc.author,
        category: doc.category,
        dependencies: ModuleDependencies {
            core: deps.core,
            runtime: deps.runtime,
            capabilities: deps.capabilities,
        },
        storage: StorageContract {
            table,
            create_script: database.create_script,
        },
    })
}

/// Parse `major.minor.patch` with exactly three numeric components.
///
/// Stricter than `semver::Version::parse`: pre-release and build suffixes are
/// rejected.
#[must_use]
pub fn parse_strict_version(s: &str) -> Option<semver::Version> {
    let mut parts = s.split('.');
    let mut next = || -> Option<u64> {
        let part = parts.next()?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        part.parse().ok()
    };
    let (major, minor, patch) = (next()?, next()?, next()?);
    if parts.next().is_some() {
        return None;
    }
    Some(semver::Version::new(major, minor, patch))
}

/// Interpret a dependency version string.
///
/// A bare version (`"1.2.0"`) is a minimum (`>=1.2.0`); anything else must be
/// a semver requirement (`">=1.2, <2"`).
///
/// # Errors
///
/// Returns a human-readable reason when the string is neither.
pub fn parse_requirement(s: &str) -> Result<semver::VersionReq, String> {
    let s = s.trim();
    if let Some(min) = parse_strict_version(s) {
        return Ok(semver::VersionReq {
            comparators: vec![semver::Comparator {
                op: semver::Op::GreaterEq,
                major: min.major,
                minor: Some(min.minor),
                patch: Some(min.patch),
                pre: semver::Prerelease::EMPTY,
            }],
        });
    }
    semver::VersionReq::parse(s).map_err(|e| format!("'{s}' is not a version requirement: {e}"))
}
