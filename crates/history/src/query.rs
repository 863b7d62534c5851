//! Read access to stored history. Records come back in the order they were
//! captured.

use changelog_core::FieldValue;
use changelog_storage::{Filter, Storage};

use crate::error::HistoryError;
use crate::populate::HistoryRecord;
use crate::schema::{HistorySchema, HISTORY_ID};

pub fn records_for(
    storage: &dyn Storage,
    history: &HistorySchema,
    history_id: &FieldValue,
) -> Result<Vec<HistoryRecord>, HistoryError> {
    storage
        .select_rows(history.schema(), Some(Filter::new(HISTORY_ID, history_id)))?
        .into_iter()
        .map(HistoryRecord::from_row)
        .collect()
}

/// Most recent snapshot of one instance.
pub fn latest_for(
    storage: &dyn Storage,
    history: &HistorySchema,
    history_id: &FieldValue,
) -> Result<Option<HistoryRecord>, HistoryError> {
    Ok(records_for(storage, history, history_id)?.pop())
}

pub fn count_for(
    storage: &dyn Storage,
    history: &HistorySchema,
    history_id: &FieldValue,
) -> Result<u64, HistoryError> {
    Ok(storage.count_rows(history.schema(), Some(Filter::new(HISTORY_ID, history_id)))?)
}

pub fn count_all(storage: &dyn Storage, history: &HistorySchema) -> Result<u64, HistoryError> {
    Ok(storage.count_rows(history.schema(), None)?)
}

pub fn all_records(
    storage: &dyn Storage,
    history: &HistorySchema,
) -> Result<Vec<HistoryRecord>, HistoryError> {
    storage
        .select_rows(history.schema(), None)?
        .into_iter()
        .map(HistoryRecord::from_row)
        .collect()
}
