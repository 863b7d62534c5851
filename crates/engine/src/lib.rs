pub mod config;
pub mod error;
pub mod signals;

pub use config::{ConfigError, EngineConfig, HistoryConfig, StorageConfig};
pub use error::EngineError;
pub use signals::{LifecycleEvent, LifecycleHook, LifecycleSignals, Signal};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use changelog_core::{
    CoreError, EntitySchema, FieldValue, Generation, MonotonicClock, Record,
};
use changelog_storage::{Row, SqliteStorage, Storage};
use uuid::Uuid;

/// Entity persistence with post-commit lifecycle signals.
///
/// Types are registered once, then instances of them are saved and deleted as
/// [`Record`]s. Subscribers attached with [`Engine::subscribe`] run inline after
/// every successful write.
pub struct Engine {
    storage: SqliteStorage,
    clock: Arc<MonotonicClock>,
    types: HashMap<String, Arc<EntitySchema>>,
    signals: LifecycleSignals,
    config: EngineConfig,
}

impl Engine {
    pub fn new(storage: SqliteStorage) -> Self {
        Self::with_config(storage, EngineConfig::default())
    }

    pub fn with_config(storage: SqliteStorage, config: EngineConfig) -> Self {
        Self {
            storage,
            clock: Arc::new(MonotonicClock::new()),
            types: HashMap::new(),
            signals: LifecycleSignals::new(),
            config,
        }
    }

    /// Open the storage the config points at (in memory when no path is set).
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let storage = match &config.storage.path {
            Some(path) => SqliteStorage::open(&path.to_string_lossy())?,
            None => SqliteStorage::open_in_memory()?,
        };
        storage.set_busy_timeout(Duration::from_millis(config.storage.busy_timeout_ms))?;
        Ok(Self::with_config(storage, config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    pub fn clock(&self) -> &Arc<MonotonicClock> {
        &self.clock
    }

    // ========================================================================
    // Type catalog
    // ========================================================================

    /// Define a storable type. Concrete types get a table; abstract ones are
    /// only remembered so they can be looked up. Defining the same type twice
    /// returns the existing definition.
    pub fn register_type(&mut self, schema: EntitySchema) -> Result<Arc<EntitySchema>, EngineError> {
        let mut schema = schema;
        if let Some(meta) = self.config.history.meta_for(&schema.name) {
            schema.history = meta.clone();
        }
        schema.validate()?;

        let key = schema.name.to_lowercase();
        if let Some(existing) = self.types.get(&key) {
            if **existing == schema {
                return Ok(Arc::clone(existing));
            }
            return Err(EngineError::DuplicateType(schema.name));
        }

        if !schema.is_abstract {
            self.storage.register_type(&schema)?;
        }
        tracing::debug!(
            entity = %schema.name,
            table = %schema.table,
            is_abstract = schema.is_abstract,
            "entity type defined"
        );
        let schema = Arc::new(schema);
        self.types.insert(key, Arc::clone(&schema));
        Ok(schema)
    }

    /// Find a type by name, including types registered by an earlier process
    /// against the same database.
    pub fn lookup_type(&mut self, name: &str) -> Result<Option<Arc<EntitySchema>>, EngineError> {
        let key = name.to_lowercase();
        if let Some(schema) = self.types.get(&key) {
            return Ok(Some(Arc::clone(schema)));
        }
        match self.storage.lookup_type(name)? {
            Some(schema) => {
                let schema = Arc::new(schema);
                self.types.insert(key, Arc::clone(&schema));
                Ok(Some(schema))
            }
            None => Ok(None),
        }
    }

    pub fn schema(&self, name: &str) -> Result<Arc<EntitySchema>, EngineError> {
        self.types
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| EngineError::UnknownType(name.to_string()))
    }

    fn concrete_schema(&self, name: &str) -> Result<Arc<EntitySchema>, EngineError> {
        let schema = self.schema(name)?;
        if schema.is_abstract {
            return Err(EngineError::AbstractType(schema.name.clone()));
        }
        Ok(schema)
    }

    // ========================================================================
    // Signals
    // ========================================================================

    pub fn subscribe(
        &mut self,
        entity: &str,
        signal: Signal,
        hook: Arc<dyn LifecycleHook>,
    ) -> Result<(), EngineError> {
        let schema = self.concrete_schema(entity)?;
        self.signals.connect(&schema.name, signal, hook);
        tracing::debug!(entity = %schema.name, ?signal, "lifecycle hook subscribed");
        Ok(())
    }

    /// Subscribe `hook` under `key`, unless a hook with that key is already
    /// subscribed to this signal of `entity`. Returns whether it was added.
    pub fn subscribe_once(
        &mut self,
        entity: &str,
        signal: Signal,
        key: &str,
        hook: Arc<dyn LifecycleHook>,
    ) -> Result<bool, EngineError> {
        let schema = self.concrete_schema(entity)?;
        let added = self.signals.connect_once(&schema.name, signal, key, hook);
        if added {
            tracing::debug!(entity = %schema.name, ?signal, key, "lifecycle hook subscribed");
        }
        Ok(added)
    }

    pub fn is_subscribed(&self, entity: &str, signal: Signal, key: &str) -> bool {
        self.signals.is_connected(entity, signal, key)
    }

    pub fn subscriber_count(&self, entity: &str, signal: Signal) -> usize {
        self.signals.receiver_count(entity, signal)
    }

    fn dispatch(
        &mut self,
        signal: Signal,
        schema: &EntitySchema,
        record: &Record,
        created: bool,
    ) -> Result<(), EngineError> {
        let event = LifecycleEvent {
            signal,
            schema,
            record,
            created,
        };
        for hook in self.signals.receivers(&schema.name, signal) {
            hook.on_signal(&event, &mut self.storage)?;
        }
        Ok(())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert or update `record`. An instance without a primary key value is
    /// inserted and receives its generated key; one with a key updates the
    /// matching row, or is inserted when no row has that key yet.
    ///
    /// Generated timestamps are written back into `record`. `PostSave`
    /// subscribers run after the write commits.
    pub fn save(&mut self, record: &mut Record) -> Result<(), EngineError> {
        let schema = self.concrete_schema(record.entity())?;
        for name in record.values().keys() {
            if schema.field(name).is_none() {
                return Err(CoreError::UnknownField {
                    entity: schema.name.clone(),
                    field: name.clone(),
                }
                .into());
            }
        }

        let now = self.clock.tick()?;
        let existing_pk = record.pk(&schema).cloned();
        let mut created = existing_pk.is_none();

        for field in &schema.fields {
            match field.generation {
                Generation::NowOnSave => record.set(&field.name, FieldValue::Timestamp(now)),
                Generation::NowOnCreate if created && !has_value(record, &field.name) => {
                    record.set(&field.name, FieldValue::Timestamp(now));
                }
                Generation::UuidV7 if created && !has_value(record, &field.name) => {
                    record.set(&field.name, FieldValue::Uuid(Uuid::now_v7()));
                }
                _ => {}
            }
        }

        if let Some(pk) = &existing_pk {
            let key = schema.primary_key().map(|f| f.name.as_str());
            let changes: Row = record
                .values()
                .iter()
                .filter(|(name, _)| Some(name.as_str()) != key)
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            if !self.storage.update_row(&schema, pk, &changes)? {
                created = true;
            }
        }

        if created {
            // Creation-only timestamps were skipped above when the instance
            // arrived with a key but turned out to be new.
            for field in &schema.fields {
                if field.generation == Generation::NowOnCreate && !has_value(record, &field.name) {
                    record.set(&field.name, FieldValue::Timestamp(now));
                }
            }
            let values: Row = record
                .values()
                .iter()
                .filter(|(name, value)| {
                    !(value.is_null()
                        && schema.field(name).is_some_and(|f| f.is_auto_increment()))
                })
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            let pk = self.storage.insert_row(&schema, &values)?;
            if let Some(key) = schema.primary_key() {
                record.set(&key.name, pk);
            }
        }

        tracing::debug!(entity = %schema.name, created, "instance saved");
        self.dispatch(Signal::PostSave, &schema, record, created)
    }

    /// Delete the row behind `record`. `PostDelete` subscribers see the
    /// instance with its key and values intact; afterwards the key is cleared,
    /// so the instance no longer refers to a stored row.
    pub fn delete(&mut self, record: &mut Record) -> Result<(), EngineError> {
        let schema = self.concrete_schema(record.entity())?;
        let pk = record
            .pk(&schema)
            .cloned()
            .ok_or_else(|| EngineError::MissingKey(schema.name.clone()))?;

        if !self.storage.delete_row(&schema, &pk)? {
            return Err(EngineError::EntityNotFound(format!("{} {pk:?}", schema.name)));
        }
        tracing::debug!(entity = %schema.name, ?pk, "instance deleted");

        let dispatched = self.dispatch(Signal::PostDelete, &schema, record, false);
        if let Some(key) = schema.primary_key() {
            record.set(&key.name, FieldValue::Null);
        }
        dispatched
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, entity: &str, pk: &FieldValue) -> Result<Option<Record>, EngineError> {
        let schema = self.concrete_schema(entity)?;
        let row = self.storage.fetch_row(&schema, pk, None)?;
        Ok(row.map(|row| into_record(&schema, row)))
    }

    /// Load only the named fields (the primary key is always included).
    pub fn get_only(
        &self,
        entity: &str,
        pk: &FieldValue,
        fields: &[&str],
    ) -> Result<Option<Record>, EngineError> {
        let schema = self.concrete_schema(entity)?;
        let key = schema
            .primary_key()
            .map(|f| f.name.as_str())
            .ok_or_else(|| EngineError::MissingKey(schema.name.clone()))?;
        let mut columns = vec![key];
        for field in fields {
            if schema.field(field).is_none() {
                return Err(CoreError::UnknownField {
                    entity: schema.name.clone(),
                    field: (*field).to_string(),
                }
                .into());
            }
            if *field != key {
                columns.push(*field);
            }
        }
        let row = self.storage.fetch_row(&schema, pk, Some(columns.as_slice()))?;
        Ok(row.map(|row| into_record(&schema, row)))
    }

    pub fn all(&self, entity: &str) -> Result<Vec<Record>, EngineError> {
        let schema = self.concrete_schema(entity)?;
        let rows = self.storage.select_rows(&schema, None)?;
        Ok(rows.into_iter().map(|row| into_record(&schema, row)).collect())
    }

    pub fn count(&self, entity: &str) -> Result<u64, EngineError> {
        let schema = self.concrete_schema(entity)?;
        Ok(self.storage.count_rows(&schema, None)?)
    }
}

fn has_value(record: &Record, field: &str) -> bool {
    record.get(field).is_some_and(|v| !v.is_null())
}

fn into_record(schema: &EntitySchema, row: Row) -> Record {
    let mut record = Record::new(&schema.name);
    for (name, value) in row {
        record.set(&name, value);
    }
    record
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use changelog_core::{FieldDescriptor, HistoryMeta};

    use super::*;

    fn note() -> EntitySchema {
        EntitySchema::new("tests", "Note")
            .with_field(FieldDescriptor::auto_key("id"))
            .with_field(FieldDescriptor::text("body", Some(50)))
            .with_field(FieldDescriptor::timestamp("modified").generated(Generation::NowOnSave))
            .with_field(FieldDescriptor::timestamp("created").generated(Generation::NowOnCreate))
    }

    fn engine() -> Engine {
        Engine::new(SqliteStorage::open_in_memory().unwrap())
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(Signal, bool, Option<FieldValue>)>>,
    }

    impl LifecycleHook for Recorder {
        fn on_signal(
            &self,
            event: &LifecycleEvent<'_>,
            _storage: &mut dyn Storage,
        ) -> Result<(), EngineError> {
            self.seen.lock().unwrap().push((
                event.signal,
                event.created,
                event.record.pk(event.schema).cloned(),
            ));
            Ok(())
        }
    }

    struct Failing;

    impl LifecycleHook for Failing {
        fn on_signal(
            &self,
            event: &LifecycleEvent<'_>,
            _storage: &mut dyn Storage,
        ) -> Result<(), EngineError> {
            Err(EngineError::Hook {
                signal: event.signal,
                entity: event.schema.name.clone(),
                message: "refused".into(),
            })
        }
    }

    #[test]
    fn save_assigns_key_and_timestamps() {
        let mut engine = engine();
        engine.register_type(note()).unwrap();

        let mut record = Record::with_values("Note", vec![("body", "hello".into())]);
        engine.save(&mut record).unwrap();
        assert_eq!(record.get("id"), Some(&FieldValue::Integer(1)));
        let created = record.get("created").cloned().unwrap();
        let modified = record.get("modified").and_then(FieldValue::as_timestamp).unwrap();

        record.set("body", "again");
        engine.save(&mut record).unwrap();
        assert_eq!(record.get("created"), Some(&created));
        assert!(record.get("modified").and_then(FieldValue::as_timestamp).unwrap() > modified);

        let stored = engine.get("Note", &FieldValue::Integer(1)).unwrap().unwrap();
        assert_eq!(stored, record);
        assert_eq!(engine.count("Note").unwrap(), 1);
    }

    #[test]
    fn register_is_idempotent_but_rejects_redefinition() {
        let mut engine = engine();
        let first = engine.register_type(note()).unwrap();
        let second = engine.register_type(note()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let changed = note().with_field(FieldDescriptor::integer("extra"));
        assert!(matches!(
            engine.register_type(changed),
            Err(EngineError::DuplicateType(_))
        ));
    }

    #[test]
    fn config_overrides_history_meta() {
        let config = EngineConfig::parse(
            "history:\n  entities:\n    Note:\n      modified_timestamp_field: modified\n",
        )
        .unwrap();
        let mut engine = Engine::with_config(SqliteStorage::open_in_memory().unwrap(), config);
        let schema = engine.register_type(note()).unwrap();
        assert_eq!(schema.history, HistoryMeta::modified("modified"));
    }

    #[test]
    fn abstract_types_have_no_table_and_cannot_be_saved() {
        let mut engine = engine();
        let base = EntitySchema::new("tests", "Base")
            .with_field(FieldDescriptor::text("body", None))
            .mark_abstract();
        engine.register_type(base).unwrap();
        assert!(engine.storage().lookup_type("Base").unwrap().is_none());

        let mut record = Record::with_values("Base", vec![("body", "x".into())]);
        assert!(matches!(engine.save(&mut record), Err(EngineError::AbstractType(_))));
        assert!(matches!(
            engine.subscribe("Base", Signal::PostSave, Arc::new(Recorder::default())),
            Err(EngineError::AbstractType(_))
        ));
    }

    #[test]
    fn unknown_fields_are_rejected_before_writing() {
        let mut engine = engine();
        engine.register_type(note()).unwrap();
        let mut record = Record::with_values("Note", vec![("body", "x".into()), ("color", "red".into())]);
        assert!(matches!(
            engine.save(&mut record),
            Err(EngineError::Core(CoreError::UnknownField { .. }))
        ));
        assert_eq!(engine.count("Note").unwrap(), 0);
    }

    #[test]
    fn signals_fire_after_commit_with_created_flag() {
        let mut engine = engine();
        engine.register_type(note()).unwrap();
        let recorder = Arc::new(Recorder::default());
        engine.subscribe("Note", Signal::PostSave, recorder.clone()).unwrap();
        engine.subscribe("Note", Signal::PostDelete, recorder.clone()).unwrap();

        let mut record = Record::with_values("Note", vec![("body", "x".into())]);
        engine.save(&mut record).unwrap();
        engine.save(&mut record).unwrap();
        engine.delete(&mut record).unwrap();

        let seen = recorder.seen.lock().unwrap();
        let one = Some(FieldValue::Integer(1));
        assert_eq!(
            *seen,
            vec![
                (Signal::PostSave, true, one.clone()),
                (Signal::PostSave, false, one.clone()),
                (Signal::PostDelete, false, one),
            ]
        );
        assert_eq!(record.get("id"), Some(&FieldValue::Null));
        assert_eq!(record.get("body"), Some(&FieldValue::Text("x".into())));
    }

    #[test]
    fn keyed_subscription_dispatches_once() {
        let mut engine = engine();
        engine.register_type(note()).unwrap();
        let recorder = Arc::new(Recorder::default());
        assert!(engine
            .subscribe_once("Note", Signal::PostSave, "recorder", recorder.clone())
            .unwrap());
        assert!(!engine
            .subscribe_once("note", Signal::PostSave, "recorder", recorder.clone())
            .unwrap());
        assert!(engine.is_subscribed("Note", Signal::PostSave, "recorder"));
        assert!(!engine.is_subscribed("Note", Signal::PostDelete, "recorder"));

        let mut record = Record::with_values("Note", vec![("body", "x".into())]);
        engine.save(&mut record).unwrap();
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
        assert_eq!(engine.subscriber_count("Note", Signal::PostSave), 1);
    }

    #[test]
    fn failed_write_fires_nothing() {
        let mut engine = engine();
        engine.register_type(note()).unwrap();
        let recorder = Arc::new(Recorder::default());
        engine.subscribe("Note", Signal::PostSave, recorder.clone()).unwrap();

        let mut too_long = Record::with_values("Note", vec![("body", "x".repeat(51).into())]);
        assert!(engine.save(&mut too_long).is_err());
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn hook_error_reaches_caller_but_write_stays() {
        let mut engine = engine();
        engine.register_type(note()).unwrap();
        engine.subscribe("Note", Signal::PostSave, Arc::new(Failing)).unwrap();

        let mut record = Record::with_values("Note", vec![("body", "kept".into())]);
        assert!(matches!(engine.save(&mut record), Err(EngineError::Hook { .. })));
        assert_eq!(engine.count("Note").unwrap(), 1);
    }

    #[test]
    fn deleting_twice_is_an_error() {
        let mut engine = engine();
        engine.register_type(note()).unwrap();
        let mut record = Record::with_values("Note", vec![("body", "x".into())]);
        engine.save(&mut record).unwrap();
        let mut stale = record.clone();

        engine.delete(&mut record).unwrap();
        assert!(matches!(engine.delete(&mut record), Err(EngineError::MissingKey(_))));
        assert!(matches!(engine.delete(&mut stale), Err(EngineError::EntityNotFound(_))));
    }

    #[test]
    fn get_only_loads_a_subset() {
        let mut engine = engine();
        engine.register_type(note()).unwrap();
        let mut record = Record::with_values("Note", vec![("body", "x".into())]);
        engine.save(&mut record).unwrap();

        let partial = engine
            .get_only("Note", &FieldValue::Integer(1), &["body"])
            .unwrap()
            .unwrap();
        assert!(partial.contains("id"));
        assert!(partial.contains("body"));
        assert!(!partial.contains("modified"));
    }

    #[test]
    fn lookup_finds_types_from_an_earlier_process() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::parse(&format!(
            "storage:\n  path: {}\n",
            dir.path().join("app.db").display()
        ))
        .unwrap();
        {
            let mut engine = Engine::open(config.clone()).unwrap();
            engine.register_type(note()).unwrap();
        }
        let mut engine = Engine::open(config).unwrap();
        let found = engine.lookup_type("note").unwrap().unwrap();
        assert_eq!(*found, note());
        assert!(engine.lookup_type("Missing").unwrap().is_none());
    }

    #[test]
    fn reopening_with_history_override_keeps_the_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let plain = EngineConfig::parse(&format!("storage:\n  path: {}\n", path.display())).unwrap();
        {
            let mut engine = Engine::open(plain).unwrap();
            engine.register_type(note()).unwrap();
        }

        let overridden = EngineConfig::parse(&format!(
            "storage:\n  path: {}\nhistory:\n  entities:\n    Note:\n      modified_timestamp_field: modified\n",
            path.display()
        ))
        .unwrap();
        let mut engine = Engine::open(overridden).unwrap();
        let schema = engine.register_type(note()).unwrap();
        assert_eq!(schema.history, HistoryMeta::modified("modified"));
        assert_eq!(
            engine.storage().lookup_type("Note").unwrap().unwrap().history,
            HistoryMeta::modified("modified")
        );
    }
}
