use std::collections::HashMap;
use std::sync::Arc;

use changelog_core::{EntitySchema, Record};
use changelog_storage::Storage;

use crate::error::EngineError;

/// Lifecycle points at which the engine notifies subscribers. Both fire only
/// after the primary write has committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    PostSave,
    PostDelete,
}

/// What a subscriber sees when a signal fires.
#[derive(Debug)]
pub struct LifecycleEvent<'a> {
    pub signal: Signal,
    pub schema: &'a EntitySchema,
    /// The instance as it stood after the write. For deletes this still holds
    /// the primary key and every loaded value.
    pub record: &'a Record,
    /// True when a save inserted a new row.
    pub created: bool,
}

pub trait LifecycleHook: Send + Sync {
    /// Runs inline on the mutating thread. An error is returned to the caller
    /// of `save`/`delete`; the primary write stays committed.
    fn on_signal(
        &self,
        event: &LifecycleEvent<'_>,
        storage: &mut dyn Storage,
    ) -> Result<(), EngineError>;
}

/// Subscriptions keyed by (entity type, signal). A receiver may carry a
/// subscription key; at most one receiver per key is connected to a signal.
#[derive(Default)]
pub struct LifecycleSignals {
    receivers: HashMap<(String, Signal), Vec<Receiver>>,
}

struct Receiver {
    key: Option<String>,
    hook: Arc<dyn LifecycleHook>,
}

impl LifecycleSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, entity: &str, signal: Signal, hook: Arc<dyn LifecycleHook>) {
        self.slot(entity, signal).push(Receiver { key: None, hook });
    }

    /// Connect `hook` unless a receiver with the same `key` is already
    /// connected for this entity and signal. Returns whether it was connected.
    pub fn connect_once(
        &mut self,
        entity: &str,
        signal: Signal,
        key: &str,
        hook: Arc<dyn LifecycleHook>,
    ) -> bool {
        let slot = self.slot(entity, signal);
        if slot.iter().any(|r| r.key.as_deref() == Some(key)) {
            return false;
        }
        slot.push(Receiver {
            key: Some(key.to_string()),
            hook,
        });
        true
    }

    pub fn is_connected(&self, entity: &str, signal: Signal, key: &str) -> bool {
        self.receivers
            .get(&(entity.to_lowercase(), signal))
            .is_some_and(|slot| slot.iter().any(|r| r.key.as_deref() == Some(key)))
    }

    pub fn receiver_count(&self, entity: &str, signal: Signal) -> usize {
        self.receivers
            .get(&(entity.to_lowercase(), signal))
            .map_or(0, Vec::len)
    }

    /// Snapshot of the receivers, so dispatch can lend out storage mutably.
    pub fn receivers(&self, entity: &str, signal: Signal) -> Vec<Arc<dyn LifecycleHook>> {
        self.receivers
            .get(&(entity.to_lowercase(), signal))
            .map(|slot| slot.iter().map(|r| Arc::clone(&r.hook)).collect())
            .unwrap_or_default()
    }

    fn slot(&mut self, entity: &str, signal: Signal) -> &mut Vec<Receiver> {
        self.receivers
            .entry((entity.to_lowercase(), signal))
            .or_default()
    }
}
