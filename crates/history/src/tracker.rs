use std::sync::Arc;

use changelog_core::EntitySchema;
use changelog_engine::{Engine, Signal};

use crate::capture::HistoryCapture;
use crate::error::HistoryError;
use crate::registry::HistoryRegistry;
use crate::schema::HistorySchema;

/// Subscription key of the history capture hook. The engine connects at most
/// one hook per key to each signal of a type.
pub const CAPTURE_KEY: &str = "changelog_history.capture";

/// Wires history capture into an [`Engine`].
///
/// Each concrete entity type it tracks gets one [`HistoryCapture`] subscribed
/// to both lifecycle signals. The engine keeps that subscription, so trackers
/// sharing an engine never capture an event twice.
#[derive(Debug, Default)]
pub struct HistoryTracker {
    registry: Arc<HistoryRegistry>,
}

impl HistoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: Arc<HistoryRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<HistoryRegistry> {
        &self.registry
    }

    /// Define an entity type and start tracking it.
    pub fn define(
        &self,
        engine: &mut Engine,
        schema: EntitySchema,
    ) -> Result<Option<Arc<HistorySchema>>, HistoryError> {
        let schema = engine.register_type(schema)?;
        self.track(engine, &schema.name)
    }

    /// Resolve the history type of `entity` and subscribe capture for it.
    /// Calling this again for the same type subscribes nothing new. Abstract
    /// types are never subscribed and yield `None`.
    pub fn track(
        &self,
        engine: &mut Engine,
        entity: &str,
    ) -> Result<Option<Arc<HistorySchema>>, HistoryError> {
        let Some(history) = self.registry.resolve(engine, entity)? else {
            return Ok(None);
        };

        let capture = Arc::new(HistoryCapture::new(
            Arc::clone(&history),
            Arc::clone(engine.clock()),
        ));
        let mut added = false;
        for signal in [Signal::PostSave, Signal::PostDelete] {
            added |= engine.subscribe_once(history.source(), signal, CAPTURE_KEY, capture.clone())?;
        }
        if added {
            tracing::debug!(entity = %history.source(), "history capture subscribed");
        }
        Ok(Some(history))
    }

    /// History type of a tracked entity.
    pub fn history_of(&self, entity: &str) -> Option<Arc<HistorySchema>> {
        self.registry.get(entity)
    }

    /// Whether `engine` captures history for `entity`.
    pub fn is_tracked(&self, engine: &Engine, entity: &str) -> bool {
        engine.is_subscribed(entity, Signal::PostSave, CAPTURE_KEY)
    }
}

#[cfg(test)]
mod tests {
    use changelog_core::{FieldDescriptor, Record};
    use changelog_storage::SqliteStorage;

    use super::*;
    use crate::query;

    fn article() -> EntitySchema {
        EntitySchema::new("blog", "Article")
            .with_field(FieldDescriptor::auto_key("id"))
            .with_field(FieldDescriptor::text("title", None))
    }

    #[test]
    fn trackers_sharing_an_engine_capture_once() {
        let mut engine = Engine::new(SqliteStorage::open_in_memory().unwrap());
        let first = HistoryTracker::new();
        let history = first.define(&mut engine, article()).unwrap().unwrap();

        let shared = HistoryTracker::with_registry(Arc::clone(first.registry()));
        let separate = HistoryTracker::new();
        shared.track(&mut engine, "Article").unwrap().unwrap();
        separate.track(&mut engine, "Article").unwrap().unwrap();
        assert_eq!(engine.subscriber_count("Article", Signal::PostSave), 1);
        assert_eq!(engine.subscriber_count("Article", Signal::PostDelete), 1);
        assert!(separate.is_tracked(&engine, "article"));

        let mut record = Record::with_values("Article", vec![("title", "one".into())]);
        engine.save(&mut record).unwrap();
        assert_eq!(query::count_all(engine.storage(), &history).unwrap(), 1);
    }
}
