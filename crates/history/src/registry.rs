use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use changelog_engine::Engine;

use crate::error::HistoryError;
use crate::schema::{derive, history_name, HistorySchema};

/// One history type per primary entity type, derived on first request and
/// shared afterwards.
///
/// A registry belongs to one database: the history types it hands out are
/// registered in that database's catalog.
#[derive(Debug, Default)]
pub struct HistoryRegistry {
    schemas: Mutex<HashMap<String, Arc<HistorySchema>>>,
}

impl HistoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// History type for `entity`, creating and registering it if needed.
    ///
    /// Abstract entity types resolve to `None`. A history type that is already
    /// in the engine's catalog (from an earlier process, say) is reused rather
    /// than derived again. The cache lock is held across derive and register,
    /// so racing first resolutions of one type produce a single definition.
    pub fn resolve(
        &self,
        engine: &mut Engine,
        entity: &str,
    ) -> Result<Option<Arc<HistorySchema>>, HistoryError> {
        let primary = engine
            .lookup_type(entity)?
            .ok_or_else(|| HistoryError::UnknownEntity(entity.to_string()))?;
        if primary.is_abstract {
            return Ok(None);
        }

        let key = primary.name.to_lowercase();
        let mut schemas = self
            .schemas
            .lock()
            .map_err(|_| HistoryError::RegistryPoisoned)?;
        if let Some(history) = schemas.get(&key) {
            return Ok(Some(Arc::clone(history)));
        }

        let history = match engine.lookup_type(&history_name(&primary.name))? {
            Some(existing) => {
                tracing::debug!(entity = %primary.name, "reusing registered history type");
                HistorySchema::from_stored(&primary.name, (*existing).clone())?
            }
            None => {
                let Some(derived) = derive(&primary)? else {
                    return Ok(None);
                };
                engine.register_type(derived.schema().clone())?;
                tracing::debug!(
                    entity = %primary.name,
                    history = %derived.name(),
                    table = %derived.table(),
                    "history type registered"
                );
                derived
            }
        };

        let history = Arc::new(history);
        schemas.insert(key, Arc::clone(&history));
        Ok(Some(history))
    }

    /// Cached history type, without resolving.
    pub fn get(&self, entity: &str) -> Option<Arc<HistorySchema>> {
        self.schemas
            .lock()
            .ok()
            .and_then(|schemas| schemas.get(&entity.to_lowercase()).cloned())
    }

    pub fn len(&self) -> usize {
        self.schemas.lock().map_or(0, |schemas| schemas.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use changelog_core::{EntitySchema, FieldDescriptor};
    use changelog_engine::EngineConfig;
    use changelog_storage::{SqliteStorage, Storage};

    use super::*;

    fn article() -> EntitySchema {
        EntitySchema::new("blog", "Article")
            .with_field(FieldDescriptor::auto_key("id"))
            .with_field(FieldDescriptor::text("title", Some(80)))
    }

    fn engine() -> Engine {
        Engine::new(SqliteStorage::open_in_memory().unwrap())
    }

    #[test]
    fn resolve_twice_returns_same_schema() {
        let mut engine = engine();
        engine.register_type(article()).unwrap();
        let registry = HistoryRegistry::new();

        let first = registry.resolve(&mut engine, "Article").unwrap().unwrap();
        let second = registry.resolve(&mut engine, "article").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            engine.storage().registered_types().unwrap(),
            vec!["Article".to_string(), "Article_history".to_string()]
        );
    }

    #[test]
    fn abstract_resolves_to_none_without_side_effects() {
        let mut engine = engine();
        engine
            .register_type(
                EntitySchema::new("blog", "Base")
                    .with_field(FieldDescriptor::text("title", None))
                    .mark_abstract(),
            )
            .unwrap();
        let registry = HistoryRegistry::new();

        assert!(registry.resolve(&mut engine, "Base").unwrap().is_none());
        assert!(registry.is_empty());
        assert!(engine.storage().registered_types().unwrap().is_empty());
    }

    #[test]
    fn unknown_entity_is_an_error() {
        let mut engine = engine();
        let registry = HistoryRegistry::new();
        assert!(matches!(
            registry.resolve(&mut engine, "Nope"),
            Err(HistoryError::UnknownEntity(_))
        ));
    }

    #[test]
    fn reuses_history_type_already_in_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::parse(&format!(
            "storage:\n  path: {}\n",
            dir.path().join("blog.db").display()
        ))
        .unwrap();

        let first = {
            let mut engine = Engine::open(config.clone()).unwrap();
            engine.register_type(article()).unwrap();
            HistoryRegistry::new()
                .resolve(&mut engine, "Article")
                .unwrap()
                .unwrap()
        };

        let mut engine = Engine::open(config).unwrap();
        engine.register_type(article()).unwrap();
        let again = HistoryRegistry::new()
            .resolve(&mut engine, "Article")
            .unwrap()
            .unwrap();
        assert_eq!(*again, *first);
        assert_eq!(engine.storage().registered_types().unwrap().len(), 2);
    }

    #[test]
    fn concurrent_first_resolution_registers_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::parse(&format!(
            "storage:\n  path: {}\n",
            dir.path().join("race.db").display()
        ))
        .unwrap();
        Engine::open(config.clone())
            .unwrap()
            .register_type(article())
            .unwrap();

        let registry = Arc::new(HistoryRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let config = config.clone();
                thread::spawn(move || {
                    let mut engine = Engine::open(config).unwrap();
                    registry.resolve(&mut engine, "Article").unwrap().unwrap()
                })
            })
            .collect();
        let resolved: Vec<Arc<HistorySchema>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        for schema in &resolved[1..] {
            assert!(Arc::ptr_eq(schema, &resolved[0]));
        }
        let engine = Engine::open(config).unwrap();
        assert_eq!(
            engine.storage().registered_types().unwrap(),
            vec!["Article".to_string(), "Article_history".to_string()]
        );
    }

    #[test]
    fn separate_engines_resolve_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::parse(&format!(
            "storage:\n  path: {}\n",
            dir.path().join("engines.db").display()
        ))
        .unwrap();

        for _ in 0..10 {
            let barrier = Arc::new(Barrier::new(4));
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let barrier = Arc::clone(&barrier);
                    let config = config.clone();
                    thread::spawn(move || -> Result<Option<Arc<HistorySchema>>, HistoryError> {
                        let mut engine = Engine::open(config).unwrap();
                        barrier.wait();
                        engine.register_type(article())?;
                        HistoryRegistry::new().resolve(&mut engine, "Article")
                    })
                })
                .collect();
            let resolved: Vec<HistorySchema> = handles
                .into_iter()
                .map(|h| (*h.join().unwrap().unwrap().unwrap()).clone())
                .collect();
            assert!(resolved.iter().all(|schema| *schema == resolved[0]));
        }

        let engine = Engine::open(config).unwrap();
        assert_eq!(
            engine.storage().registered_types().unwrap(),
            vec!["Article".to_string(), "Article_history".to_string()]
        );
    }
}
