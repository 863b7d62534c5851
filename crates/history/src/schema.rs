//! Derivation of a history type from a primary entity type.
//!
//! A history type mirrors every scalar field of its primary (relational fields
//! are left out) and adds three fields of its own:
//!
//! - `history_id`: the primary key of the tracked instance. Indexed, never unique.
//! - `history_timestamp`: when the captured state was current.
//! - `history_pk`: auto-increment key of the history row itself.
//!
//! Mirrored fields drop every generation policy, key and uniqueness flag, so
//! copying a historical value never triggers key or timestamp generation. They
//! are nullable, so an instance that was only partly loaded can still be
//! captured.

use changelog_core::{EntitySchema, FieldDescriptor, Generation, HistoryMeta, ValueKind};

use crate::error::SchemaError;

pub const HISTORY_ID: &str = "history_id";
pub const HISTORY_TIMESTAMP: &str = "history_timestamp";
pub const HISTORY_PK: &str = "history_pk";

const RESERVED: [&str; 3] = [HISTORY_ID, HISTORY_TIMESTAMP, HISTORY_PK];

pub fn history_name(primary: &str) -> String {
    format!("{primary}_history")
}

/// A derived history type, bound to the primary it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySchema {
    source: String,
    schema: EntitySchema,
}

impl HistorySchema {
    /// Wrap a definition found in the type catalog, checking it really is a
    /// history type.
    pub fn from_stored(source: &str, schema: EntitySchema) -> Result<Self, SchemaError> {
        let is_history = schema.name.eq_ignore_ascii_case(&history_name(source))
            && RESERVED.iter().all(|name| schema.field(name).is_some())
            && schema
                .primary_key()
                .is_some_and(|f| f.name == HISTORY_PK);
        if !is_history {
            return Err(SchemaError::NotAHistoryType(schema.name));
        }
        Ok(Self {
            source: source.to_string(),
            schema,
        })
    }

    /// Name of the primary entity type.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn table(&self) -> &str {
        &self.schema.table
    }

    pub fn namespace(&self) -> &str {
        &self.schema.namespace
    }

    /// The storable definition, as registered with the engine.
    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Fields copied from the primary.
    pub fn mirrored_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.schema
            .fields
            .iter()
            .filter(|f| !RESERVED.contains(&f.name.as_str()))
    }
}

/// Derive the history type for `primary`. Abstract types have no history and
/// yield `None`.
///
/// Pure: nothing is registered or stored.
pub fn derive(primary: &EntitySchema) -> Result<Option<HistorySchema>, SchemaError> {
    if primary.is_abstract {
        return Ok(None);
    }
    let key = primary
        .primary_key()
        .ok_or_else(|| SchemaError::MissingPrimaryKey(primary.name.clone()))?;

    if let Some(field) = primary
        .fields
        .iter()
        .find(|f| RESERVED.contains(&f.name.as_str()))
    {
        return Err(SchemaError::ReservedField {
            entity: primary.name.clone(),
            field: field.name.clone(),
        });
    }
    check_timestamp_field(primary)?;

    let mut fields: Vec<FieldDescriptor> = primary.scalar_fields().map(mirror).collect();
    fields.push(FieldDescriptor::new(HISTORY_ID, key.kind.clone()).indexed());
    fields.push(FieldDescriptor::timestamp(HISTORY_TIMESTAMP));
    fields.push(FieldDescriptor::auto_key(HISTORY_PK));

    let schema = EntitySchema {
        name: history_name(&primary.name),
        namespace: primary.namespace.clone(),
        table: format!("{}_history", primary.table),
        verbose_name: format!("{} History", primary.verbose_name),
        is_abstract: false,
        fields,
        history: HistoryMeta::default(),
    };
    Ok(Some(HistorySchema {
        source: primary.name.clone(),
        schema,
    }))
}

fn mirror(field: &FieldDescriptor) -> FieldDescriptor {
    if field.generation == Generation::AutoIncrement {
        return FieldDescriptor::integer(&field.name).nullable();
    }
    let mut copy = field.clone();
    copy.generation = Generation::None;
    copy.primary_key = false;
    copy.unique = false;
    copy.indexed = false;
    copy.nullable = true;
    copy
}

fn check_timestamp_field(primary: &EntitySchema) -> Result<(), SchemaError> {
    let Some(name) = &primary.history.modified_timestamp_field else {
        return Ok(());
    };
    let field = primary
        .field(name)
        .filter(|f| !f.is_relational())
        .ok_or_else(|| SchemaError::UnknownTimestampField {
            entity: primary.name.clone(),
            field: name.clone(),
        })?;
    if field.kind != ValueKind::Timestamp {
        return Err(SchemaError::TimestampFieldKind {
            entity: primary.name.clone(),
            field: name.clone(),
        });
    }
    Ok(())
}
