use std::error::Error;
use std::sync::Arc;

use changelog_core::{EntitySchema, FieldValue, Record};
use changelog_engine::{Engine, EngineConfig};
use changelog_history::{query, HistoryRecord, HistorySchema, HistoryTracker};
use changelog_storage::SqliteStorage;
use tempfile::TempDir;

use crate::models;

pub type TestResult<T = ()> = Result<T, Box<dyn Error>>;

/// An engine with history tracking installed for the standard test models.
pub struct TestApp {
    pub engine: Engine,
    pub tracker: HistoryTracker,
    dir: Option<TempDir>,
}

impl TestApp {
    /// In-memory app with `TestModel` and `Test2Model` tracked.
    pub fn new() -> TestResult<Self> {
        let mut app = Self::empty()?;
        app.define(models::timestamped())?;
        app.define(models::test_model())?;
        app.define(models::test2_model())?;
        Ok(app)
    }

    /// In-memory app with nothing defined.
    pub fn empty() -> TestResult<Self> {
        Ok(Self {
            engine: Engine::new(SqliteStorage::open_in_memory()?),
            tracker: HistoryTracker::new(),
            dir: None,
        })
    }

    /// In-memory app with nothing defined, using `config` for everything but the path.
    pub fn with_config(config: EngineConfig) -> TestResult<Self> {
        Ok(Self {
            engine: Engine::with_config(SqliteStorage::open_in_memory()?, config),
            tracker: HistoryTracker::new(),
            dir: None,
        })
    }

    /// App over a database file in `dir`. The directory is kept alive with the app.
    pub fn on_disk(dir: TempDir) -> TestResult<Self> {
        let config = Self::disk_config(&dir)?;
        Ok(Self {
            engine: Engine::open(config)?,
            tracker: HistoryTracker::new(),
            dir: Some(dir),
        })
    }

    pub fn disk_config(dir: &TempDir) -> TestResult<EngineConfig> {
        let yaml = format!(
            "storage:\n  path: {}\n  busy_timeout_ms: 2000\n",
            dir.path().join("app.db").display()
        );
        Ok(EngineConfig::parse(&yaml)?)
    }

    /// Give up the backing directory, e.g. to reopen it from a second app.
    pub fn into_dir(self) -> Option<TempDir> {
        self.dir
    }

    pub fn define(&mut self, schema: EntitySchema) -> TestResult<Option<Arc<HistorySchema>>> {
        Ok(self.tracker.define(&mut self.engine, schema)?)
    }

    pub fn history(&self, entity: &str) -> TestResult<Arc<HistorySchema>> {
        self.tracker
            .history_of(entity)
            .ok_or_else(|| format!("{entity} is not tracked").into())
    }

    /// Create and save a `TestModel`.
    pub fn create_test_model(&mut self, text: &str, integer: i64) -> TestResult<Record> {
        let mut record = Record::with_values(
            "TestModel",
            vec![("text", text.into()), ("integer", FieldValue::Integer(integer))],
        );
        self.engine.save(&mut record)?;
        Ok(record)
    }

    pub fn records_for(&self, entity: &str, id: &FieldValue) -> TestResult<Vec<HistoryRecord>> {
        let history = self.history(entity)?;
        Ok(query::records_for(self.engine.storage(), &history, id)?)
    }

    pub fn latest_for(&self, entity: &str, id: &FieldValue) -> TestResult<Option<HistoryRecord>> {
        let history = self.history(entity)?;
        Ok(query::latest_for(self.engine.storage(), &history, id)?)
    }

    pub fn count_for(&self, entity: &str, id: &FieldValue) -> TestResult<u64> {
        let history = self.history(entity)?;
        Ok(query::count_for(self.engine.storage(), &history, id)?)
    }

    pub fn count_all(&self, entity: &str) -> TestResult<u64> {
        let history = self.history(entity)?;
        Ok(query::count_all(self.engine.storage(), &history)?)
    }
}

/// Primary key of a saved record.
pub fn pk_of(record: &Record) -> TestResult<FieldValue> {
    record
        .get("id")
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| "record has no id".into())
}
