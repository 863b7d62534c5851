use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("unknown field {field} on {entity}")]
    UnknownField { entity: String, field: String },

    #[error("invalid data: {0}")]
    InvalidData(String),
}
