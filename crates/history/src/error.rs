use changelog_core::CoreError;
use changelog_engine::{EngineError, Signal};
use changelog_storage::StorageError;
use thiserror::Error;

/// A primary schema that cannot have history derived from it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{0} has no primary key field")]
    MissingPrimaryKey(String),

    #[error("{entity} declares reserved field {field}")]
    ReservedField { entity: String, field: String },

    #[error("{entity} names {field} as its modified timestamp, but has no such scalar field")]
    UnknownTimestampField { entity: String, field: String },

    #[error("{entity}.{field} is used as the modified timestamp but is not a timestamp")]
    TimestampFieldKind { entity: String, field: String },

    #[error("registered type {0} is not a history type")]
    NotAHistoryType(String),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("instance of {0} has no primary key value")]
    MissingKey(String),

    #[error("malformed history row: {0}")]
    MalformedRow(String),

    #[error("history registry lock poisoned")]
    RegistryPoisoned,
}

impl HistoryError {
    /// Surface a capture failure through the signal dispatcher. Storage and
    /// engine errors pass through unchanged.
    pub fn into_engine_error(self, signal: Signal, entity: &str) -> EngineError {
        match self {
            Self::Persistence(e) => EngineError::Storage(e),
            Self::Engine(e) => e,
            Self::Core(e) => EngineError::Core(e),
            other => EngineError::Hook {
                signal,
                entity: entity.to_string(),
                message: other.to_string(),
            },
        }
    }
}
