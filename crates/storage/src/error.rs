use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("type {name} is already registered with a different definition")]
    SchemaMismatch { name: String },

    #[error("unknown column {column} on {table}")]
    UnknownColumn { table: String, column: String },

    #[error("value for {column} does not match its declared kind")]
    TypeMismatch { column: String },

    #[error("core error: {0}")]
    Core(#[from] changelog_core::CoreError),
}
