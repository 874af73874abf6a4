//! Serde roundtrip and JsonSchema validation tests for the stored entity types.

use chrono::{NaiveDate, Utc};
use schemars::schema_for;
use psy_core::entities::*;
use psy_core::enums::AuditAction;
use psy_core::values::ModuleFields;

/// Validate a JSON value against a schemars-generated schema.
fn validate_against_schema(
    schema: &serde_json::Value,
    instance: &serde_json::Value,
) -> Vec<String> {
    let validator = jsonschema::validator_for(schema).expect("schema should be valid");
    validator
        .iter_errors(instance)
        .map(|e| format!("{e}"))
        .collect()
}

macro_rules! roundtrip_and_validate {
    ($name:ident, $ty:ty, $instance:expr) => {
        #[test]
        fn $name() {
            let val: $ty = $instance;

            let json_str = serde_json::to_string_pretty(&val).unwrap();
            let recovered: $ty = serde_json::from_str(&json_str).unwrap();
            assert_eq!(
                recovered,
                val,
                "serde roundtrip failed for {}",
                stringify!($ty)
            );

            let schema = serde_json::to_value(schema_for!($ty)).unwrap();
            let instance = serde_json::to_value(&val).unwrap();
            let errors = validate_against_schema(&schema, &instance);
            assert!(
                errors.is_empty(),
                "Schema validation failed for {}: {:?}",
                stringify!($ty),
                errors
            );
        }
    };
}

roundtrip_and_validate!(
    descriptor_roundtrip,
    ModuleDescriptor,
    ModuleDescriptor {
        key: "anxiety_test".into(),
        name: "Anxiety Scale".into(),
        description: "Self-report anxiety screening".into(),
        version: semver::Version::new(1, 0, 0),
        author: "Psylab".into(),
        category: "emotional".into(),
        dependencies: ModuleDependencies {
            core: Some(">=1.0.0".into()),
            runtime: None,
            capabilities: vec!["scoring".into()],
        },
        storage: StorageContract {
            table: "anxiety_test_results".into(),
            create_script: Some("schema.sql".into()),
        },
    }
);

roundtrip_and_validate!(
    result_record_roundtrip,
    ResultRecord,
    ResultRecord {
        id: RecordId(7),
        module_key: "anxiety_test".into(),
        child_id: 42,
        psychologist_id: 3,
        test_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        created_at: Utc::now(),
        fields: ModuleFields::new()
            .with("raw_score", 18)
            .with("level", "moderate"),
    }
);

roundtrip_and_validate!(
    audit_entry_roundtrip,
    AuditEntry,
    AuditEntry {
        id: "aud-0a1b2c3d".into(),
        tenant_id: Some(3),
        module_key: "anxiety_test".into(),
        record_id: Some(7),
        action: AuditAction::Update,
        description: "Updated result 7".into(),
        detail: Some(serde_json::json!({"raw_score": {"old": 18, "new": 20}})),
        actor: "psychologist:3".into(),
        ip: Some("10.0.0.8".into()),
        created_at: Utc::now(),
    }
);

#[test]
fn fingerprint_changes_with_version() {
    let mut descriptor = ModuleDescriptor {
        key: "k".into(),
        name: "K".into(),
        description: String::new(),
        version: semver::Version::new(1, 0, 0),
        author: String::new(),
        category: "cognitive".into(),
        dependencies: ModuleDependencies::default(),
        storage: StorageContract {
            table: StorageContract::default_table("k"),
            create_script: None,
        },
    };
    let before = descriptor.fingerprint();
    assert_eq!(before, descriptor.clone().fingerprint());
    descriptor.version = semver::Version::new(1, 1, 0);
    assert_ne!(before, descriptor.fingerprint());
}
