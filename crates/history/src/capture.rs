use std::sync::Arc;

use changelog_core::MonotonicClock;
use changelog_engine::{EngineError, LifecycleEvent, LifecycleHook};
use changelog_storage::Storage;

use crate::populate::populate;
use crate::schema::HistorySchema;

/// Lifecycle hook that records a history snapshot for every save and delete
/// of one entity type.
pub struct HistoryCapture {
    history: Arc<HistorySchema>,
    clock: Arc<MonotonicClock>,
}

impl HistoryCapture {
    pub fn new(history: Arc<HistorySchema>, clock: Arc<MonotonicClock>) -> Self {
        Self { history, clock }
    }
}

impl LifecycleHook for HistoryCapture {
    fn on_signal(
        &self,
        event: &LifecycleEvent<'_>,
        storage: &mut dyn Storage,
    ) -> Result<(), EngineError> {
        populate(storage, event.schema, &self.history, event.record, &self.clock)
            .map(|_| ())
            .map_err(|e| e.into_engine_error(event.signal, &event.schema.name))
    }
}
