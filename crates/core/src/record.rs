use std::collections::BTreeMap;

use crate::field_value::FieldValue;
use crate::schema::EntitySchema;

/// An in-memory entity instance: a type name plus whatever field values it
/// currently holds. Fields that were never loaded are simply absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    entity: String,
    values: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_values(entity: &str, values: Vec<(&str, FieldValue)>) -> Self {
        let mut record = Self::new(entity);
        for (key, value) in values {
            record.set(key, value);
        }
        record
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) {
        self.values.insert(field.to_string(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.values.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn values(&self) -> &BTreeMap<String, FieldValue> {
        &self.values
    }

    /// Primary key value, if the schema has one and it is set to something non-null.
    pub fn pk(&self, schema: &EntitySchema) -> Option<&FieldValue> {
        let key = schema.primary_key()?;
        self.values.get(&key.name).filter(|v| !v.is_null())
    }
}
