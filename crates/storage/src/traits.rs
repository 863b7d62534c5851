use std::collections::BTreeMap;

use changelog_core::{EntitySchema, FieldValue};

use crate::error::StorageError;

/// Column values of one stored row, keyed by field name.
pub type Row = BTreeMap<String, FieldValue>;

/// Equality filter on a single column.
#[derive(Debug, Clone, Copy)]
pub struct Filter<'a> {
    pub column: &'a str,
    pub value: &'a FieldValue,
}

impl<'a> Filter<'a> {
    pub fn new(column: &'a str, value: &'a FieldValue) -> Self {
        Self { column, value }
    }
}

/// Persistence backend for entity types described by [`EntitySchema`].
///
/// Every write is durable when the call returns `Ok`.
pub trait Storage {
    /// Create the type's table and record its definition in the type catalog.
    /// Registering a structurally identical definition again is a no-op,
    /// apart from storing changed history options.
    fn register_type(&mut self, schema: &EntitySchema) -> Result<(), StorageError>;

    /// Definition previously registered under `name`, compared case-insensitively.
    fn lookup_type(&self, name: &str) -> Result<Option<EntitySchema>, StorageError>;

    /// Names of every registered type, in registration order.
    fn registered_types(&self) -> Result<Vec<String>, StorageError>;

    /// Insert a row. Columns missing from `values` take the table default.
    /// Returns the primary key value of the new row.
    fn insert_row(&mut self, schema: &EntitySchema, values: &Row)
    -> Result<FieldValue, StorageError>;

    /// Overwrite the given columns of the row keyed by `pk`. Returns false when no row matched.
    fn update_row(
        &mut self,
        schema: &EntitySchema,
        pk: &FieldValue,
        values: &Row,
    ) -> Result<bool, StorageError>;

    /// Returns false when no row matched.
    fn delete_row(&mut self, schema: &EntitySchema, pk: &FieldValue) -> Result<bool, StorageError>;

    /// Load one row. When `columns` is given only those columns are read.
    fn fetch_row(
        &self,
        schema: &EntitySchema,
        pk: &FieldValue,
        columns: Option<&[&str]>,
    ) -> Result<Option<Row>, StorageError>;

    /// Rows in insertion order, optionally filtered.
    fn select_rows(
        &self,
        schema: &EntitySchema,
        filter: Option<Filter<'_>>,
    ) -> Result<Vec<Row>, StorageError>;

    fn count_rows(
        &self,
        schema: &EntitySchema,
        filter: Option<Filter<'_>>,
    ) -> Result<u64, StorageError>;
}
