//! Append-only change history for engine entity types.
//!
//! For every concrete entity type it tracks, the crate derives a companion
//! `<Name>_history` type ([`derive`]), registers it once ([`HistoryRegistry`]),
//! and subscribes a [`HistoryCapture`] to the type's post-save and post-delete
//! signals. Each captured event stores one full snapshot ([`populate`]).
//!
//! ```ignore
//! let tracker = HistoryTracker::new();
//! let history = tracker.define(&mut engine, schema)?.expect("concrete type");
//! engine.save(&mut record)?;
//! let snapshots = query::records_for(engine.storage(), &history, record.pk(&schema).unwrap())?;
//! ```

pub mod capture;
pub mod error;
pub mod populate;
pub mod query;
pub mod registry;
pub mod schema;
pub mod tracker;

pub use capture::HistoryCapture;
pub use error::{HistoryError, SchemaError};
pub use populate::{populate, HistoryRecord};
pub use registry::HistoryRegistry;
pub use schema::{derive, history_name, HistorySchema, HISTORY_ID, HISTORY_PK, HISTORY_TIMESTAMP};
pub use tracker::{HistoryTracker, CAPTURE_KEY};
