use changelog_core::CoreError;
use changelog_storage::StorageError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::signals::Signal;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("unknown entity type: {0}")]
    UnknownType(String),

    #[error("entity type is abstract: {0}")]
    AbstractType(String),

    #[error("entity type already defined differently: {0}")]
    DuplicateType(String),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("instance of {0} has no primary key value")]
    MissingKey(String),

    #[error("{signal:?} handler for {entity} failed: {message}")]
    Hook {
        signal: Signal,
        entity: String,
        message: String,
    },
}
