use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Storage-level value kind of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Text { max_length: Option<u32> },
    Integer,
    Float,
    Boolean,
    Timestamp,
    Uuid,
    Bytes,
}

/// How the persistence layer fills a field on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Generation {
    #[default]
    None,
    /// Surrogate integer key assigned by storage on insert.
    AutoIncrement,
    /// Surrogate uuid key assigned by the engine on insert.
    UuidV7,
    /// Set to the current time on insert only.
    NowOnCreate,
    /// Set to the current time on every save.
    NowOnSave,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: ValueKind,
    pub relation: Option<Relation>,
    pub generation: Generation,
    pub primary_key: bool,
    pub unique: bool,
    pub nullable: bool,
    pub indexed: bool,
}

impl FieldDescriptor {
    pub fn new(name: &str, kind: ValueKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            relation: None,
            generation: Generation::None,
            primary_key: false,
            unique: false,
            nullable: false,
            indexed: false,
        }
    }

    /// Auto-incrementing integer primary key.
    pub fn auto_key(name: &str) -> Self {
        Self::new(name, ValueKind::Integer)
            .primary_key()
            .generated(Generation::AutoIncrement)
    }

    /// Uuid primary key generated on first save.
    pub fn uuid_key(name: &str) -> Self {
        Self::new(name, ValueKind::Uuid)
            .primary_key()
            .generated(Generation::UuidV7)
    }

    pub fn text(name: &str, max_length: Option<u32>) -> Self {
        Self::new(name, ValueKind::Text { max_length })
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, ValueKind::Integer)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, ValueKind::Float)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, ValueKind::Boolean)
    }

    pub fn timestamp(name: &str) -> Self {
        Self::new(name, ValueKind::Timestamp)
    }

    pub fn uuid(name: &str) -> Self {
        Self::new(name, ValueKind::Uuid)
    }

    pub fn bytes(name: &str) -> Self {
        Self::new(name, ValueKind::Bytes)
    }

    /// Foreign-key style reference to another entity's integer key.
    pub fn reference(name: &str, target: &str) -> Self {
        Self {
            relation: Some(Relation {
                target: target.to_string(),
            }),
            indexed: true,
            ..Self::new(name, ValueKind::Integer)
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.unique = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn generated(mut self, generation: Generation) -> Self {
        self.generation = generation;
        self
    }

    pub fn is_relational(&self) -> bool {
        self.relation.is_some()
    }

    pub fn is_generated(&self) -> bool {
        self.generation != Generation::None
    }

    /// Whether storage assigns this field's value on insert.
    pub fn is_auto_increment(&self) -> bool {
        self.generation == Generation::AutoIncrement
    }
}

/// Per-entity history options supplied by the entity author.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMeta {
    /// Field whose value stamps each history record. Capture time is used when unset.
    pub modified_timestamp_field: Option<String>,
}

impl HistoryMeta {
    pub fn modified(field: &str) -> Self {
        Self {
            modified_timestamp_field: Some(field.to_string()),
        }
    }
}

/// Definition of a storable entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    pub namespace: String,
    pub table: String,
    pub verbose_name: String,
    pub is_abstract: bool,
    pub fields: Vec<FieldDescriptor>,
    pub history: HistoryMeta,
}

impl EntitySchema {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            table: format!("{namespace}_{}", name.to_lowercase()),
            verbose_name: name.to_string(),
            is_abstract: false,
            fields: Vec::new(),
            history: HistoryMeta::default(),
        }
    }

    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    pub fn with_verbose_name(mut self, verbose_name: &str) -> Self {
        self.verbose_name = verbose_name.to_string();
        self
    }

    pub fn with_history(mut self, history: HistoryMeta) -> Self {
        self.history = history;
        self
    }

    pub fn mark_abstract(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Prepend the fields of an abstract base. Options the base sets and this
    /// schema leaves at their default are inherited too.
    pub fn inherit(mut self, base: &EntitySchema) -> Self {
        let mut fields = base.fields.clone();
        fields.retain(|f| !self.fields.iter().any(|own| own.name == f.name));
        fields.append(&mut self.fields);
        self.fields = fields;
        if self.history.modified_timestamp_field.is_none() {
            self.history = base.history.clone();
        }
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_key(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.primary_key)
    }

    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| !f.is_relational())
    }

    /// Equal in everything that shapes storage. History options are not
    /// compared, so they may change between runs against one database.
    pub fn same_structure(&self, other: &EntitySchema) -> bool {
        self.name == other.name
            && self.namespace == other.namespace
            && self.table == other.table
            && self.verbose_name == other.verbose_name
            && self.is_abstract == other.is_abstract
            && self.fields == other.fields
    }

    /// Structural checks every storable type must pass.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.is_empty() || self.table.is_empty() {
            return Err(CoreError::InvalidSchema("entity name and table must be set".into()));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if !is_identifier(&field.name) {
                return Err(CoreError::InvalidSchema(format!(
                    "{}: invalid field name {:?}",
                    self.name, field.name
                )));
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(CoreError::InvalidSchema(format!(
                    "{}: duplicate field {}",
                    self.name, field.name
                )));
            }
        }
        if !is_identifier(&self.table) {
            return Err(CoreError::InvalidSchema(format!(
                "{}: invalid table name {:?}",
                self.name, self.table
            )));
        }
        let keys = self.fields.iter().filter(|f| f.primary_key).count();
        if keys > 1 {
            return Err(CoreError::InvalidSchema(format!(
                "{}: {keys} primary key fields",
                self.name
            )));
        }
        if keys == 0 && !self.is_abstract {
            return Err(CoreError::InvalidSchema(format!(
                "{}: no primary key field",
                self.name
            )));
        }
        Ok(())
    }
}

/// Names end up in SQL verbatim, so they are restricted to `[A-Za-z_][A-Za-z0-9_]*`.
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
