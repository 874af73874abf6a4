//! Fixtures shared by the psy-db integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use psy_config::CategorySet;
use psy_core::values::{FieldValue, ModuleFields};
use psy_db::PsyDb;
use psy_db::children::{ChildDirectory, StaticChildDirectory};
use psy_db::service::{EngineSettings, PsyService};
use psy_modules::{Catalog, Computer, FactoryRegistry, HookError, ModuleInstance};
use tempfile::TempDir;

pub const ANXIETY_SCHEMA: &str = "CREATE TABLE anxiety_test_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    child_id INTEGER NOT NULL,
    psychologist_id INTEGER NOT NULL,
    test_date TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    raw_score INTEGER,
    anxiety_level TEXT,
    notes TEXT
);";

/// A module tree on disk plus a scratch directory for backups.
pub struct Fixture {
    pub modules: TempDir,
    pub backups: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            modules: TempDir::new().unwrap(),
            backups: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.modules.path()
    }

    /// Write a module directory with a manifest and optional schema script.
    pub fn write_module(
        &self,
        key: &str,
        version: &str,
        category: &str,
        schema: Option<&str>,
    ) -> PathBuf {
        let dir = self.root().join(key);
        std::fs::create_dir_all(&dir).unwrap();
        let database = schema.map_or_else(String::new, |_| {
            format!(r#", "database": {{"table": "{key}_results", "create_script": "schema.sql"}}"#)
        });
        std::fs::write(
            dir.join("module.json"),
            format!(
                r#"{{"module_key": "{key}", "name": "{key}", "version": "{version}",
                    "category": "{category}", "author": "Test Lab"{database}}}"#
            ),
        )
        .unwrap();
        if let Some(sql) = schema {
            std::fs::write(dir.join("schema.sql"), sql).unwrap();
        }
        dir
    }

    pub fn write_anxiety_module(&self) -> PathBuf {
        self.write_module("anxiety_test", "1.0.0", "emotional", Some(ANXIETY_SCHEMA))
    }

    pub fn settings(&self) -> EngineSettings {
        let catalog = Catalog::new(
            vec![self.root().to_path_buf()],
            "module.json",
            CategorySet::builtin(),
        );
        EngineSettings::for_catalog(catalog, self.backups.path().to_path_buf()).unwrap()
    }

    /// Service over an in-memory database.
    pub async fn service(&self, children: StaticChildDirectory) -> PsyService {
        self.service_at(":memory:", Arc::new(children)).await
    }

    pub async fn service_at(&self, db_path: &str, children: Arc<dyn ChildDirectory>) -> PsyService {
        let db = PsyDb::open_local(db_path, Duration::from_secs(5)).await.unwrap();
        PsyService::new(db, self.settings(), anxiety_factories(), children)
    }
}

/// Scores raw anxiety scores into a level.
pub struct AnxietyScorer;

impl Computer for AnxietyScorer {
    fn compute(&self, raw: &ModuleFields) -> Result<ModuleFields, HookError> {
        let Some(score) = raw.get("raw_score") else {
            return Ok(ModuleFields::new());
        };
        let score = score
            .as_i64()
            .ok_or_else(|| HookError::Compute(format!("raw_score '{score}' is not a number")))?;
        let level = match score {
            s if s < 10 => "low",
            s if s < 20 => "moderate",
            _ => "high",
        };
        Ok(ModuleFields::new().with("anxiety_level", level))
    }
}

impl ModuleInstance for AnxietyScorer {
    fn as_computer(&self) -> Option<&dyn Computer> {
        Some(self)
    }
}

pub fn anxiety_factories() -> FactoryRegistry {
    FactoryRegistry::new().with("anxiety_test", |_| {
        Ok(Arc::new(AnxietyScorer) as Arc<dyn ModuleInstance>)
    })
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn text(s: &str) -> FieldValue {
    FieldValue::Text(s.to_string())
}
