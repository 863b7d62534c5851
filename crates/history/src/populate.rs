use std::collections::BTreeMap;

use changelog_core::{EntitySchema, FieldValue, MonotonicClock, Record};
use changelog_storage::{Row, Storage};

use crate::error::HistoryError;
use crate::schema::{HistorySchema, HISTORY_ID, HISTORY_PK, HISTORY_TIMESTAMP};

/// One stored snapshot of a primary instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub history_pk: i64,
    /// Primary key of the instance the snapshot was taken from.
    pub history_id: FieldValue,
    /// Milliseconds since Unix epoch.
    pub history_timestamp: i64,
    /// Mirrored field values. Fields the instance did not hold are `Null`.
    pub values: BTreeMap<String, FieldValue>,
}

impl HistoryRecord {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub(crate) fn from_row(mut row: Row) -> Result<Self, HistoryError> {
        let history_pk = row
            .remove(HISTORY_PK)
            .and_then(|v| v.as_integer())
            .ok_or_else(|| HistoryError::MalformedRow(format!("{HISTORY_PK} missing")))?;
        let history_id = row
            .remove(HISTORY_ID)
            .filter(|v| !v.is_null())
            .ok_or_else(|| HistoryError::MalformedRow(format!("{HISTORY_ID} missing")))?;
        let history_timestamp = row
            .remove(HISTORY_TIMESTAMP)
            .and_then(|v| v.as_timestamp())
            .ok_or_else(|| HistoryError::MalformedRow(format!("{HISTORY_TIMESTAMP} missing")))?;
        Ok(Self {
            history_pk,
            history_id,
            history_timestamp,
            values: row,
        })
    }
}

/// Snapshot `instance` into a new history row and store it.
///
/// The timestamp is the value of the primary's modified-timestamp field when
/// one is configured and the instance holds it, otherwise the capture time.
/// Every mirrored field the instance holds is copied; the rest are left to the
/// column default. `history_id` is taken from the instance as it is, so a
/// delete records the key the instance had before the row went away.
///
/// Each call inserts exactly one row. Storage failures are returned unchanged.
pub fn populate(
    storage: &mut dyn Storage,
    primary: &EntitySchema,
    history: &HistorySchema,
    instance: &Record,
    clock: &MonotonicClock,
) -> Result<HistoryRecord, HistoryError> {
    let history_id = instance
        .pk(primary)
        .cloned()
        .ok_or_else(|| HistoryError::MissingKey(primary.name.clone()))?;

    let configured = primary
        .history
        .modified_timestamp_field
        .as_deref()
        .and_then(|field| instance.get(field))
        .and_then(FieldValue::as_timestamp);
    let history_timestamp = match configured {
        Some(ms) => ms,
        None => clock.tick()?,
    };

    let mut values = Row::new();
    for field in history.mirrored_fields() {
        if let Some(value) = instance.get(&field.name) {
            values.insert(field.name.clone(), value.clone());
        }
    }
    let mut row = values.clone();
    row.insert(HISTORY_ID.to_string(), history_id.clone());
    row.insert(
        HISTORY_TIMESTAMP.to_string(),
        FieldValue::Timestamp(history_timestamp),
    );

    let pk = storage.insert_row(history.schema(), &row).map_err(|e| {
        tracing::warn!(
            entity = %primary.name,
            history = %history.name(),
            error = %e,
            "history write failed"
        );
        e
    })?;
    let history_pk = pk
        .as_integer()
        .ok_or_else(|| HistoryError::MalformedRow(format!("{HISTORY_PK} is not an integer")))?;

    for field in history.mirrored_fields() {
        values.entry(field.name.clone()).or_insert(FieldValue::Null);
    }
    tracing::debug!(
        entity = %primary.name,
        ?history_id,
        history_pk,
        "history snapshot stored"
    );
    Ok(HistoryRecord {
        history_pk,
        history_id,
        history_timestamp,
        values,
    })
}
