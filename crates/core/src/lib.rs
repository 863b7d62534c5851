pub mod clock;
pub mod error;
pub mod field_value;
pub mod record;
pub mod schema;

pub use clock::MonotonicClock;
pub use error::CoreError;
pub use field_value::FieldValue;
pub use record::Record;
pub use schema::{EntitySchema, FieldDescriptor, Generation, HistoryMeta, Relation, ValueKind};
