use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use changelog_core::{EntitySchema, FieldValue, ValueKind};

use crate::error::StorageError;
use crate::schema::{create_index_sql, create_table_sql};
use crate::traits::{Filter, Row, Storage};

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), StorageError> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn to_sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Text(s) => Value::Text(s.clone()),
        FieldValue::Integer(n) | FieldValue::Timestamp(n) => Value::Integer(*n),
        FieldValue::Float(f) => Value::Real(*f),
        FieldValue::Boolean(b) => Value::Integer(i64::from(*b)),
        FieldValue::Uuid(u) => Value::Blob(u.as_bytes().to_vec()),
        FieldValue::Bytes(b) => Value::Blob(b.clone()),
    }
}

fn from_sql_value(value: Value, kind: &ValueKind, column: &str) -> Result<FieldValue, StorageError> {
    let mismatch = || StorageError::TypeMismatch {
        column: column.to_string(),
    };
    Ok(match (value, kind) {
        (Value::Null, _) => FieldValue::Null,
        (Value::Text(s), ValueKind::Text { .. }) => FieldValue::Text(s),
        (Value::Integer(n), ValueKind::Integer) => FieldValue::Integer(n),
        (Value::Integer(n), ValueKind::Timestamp) => FieldValue::Timestamp(n),
        (Value::Integer(n), ValueKind::Boolean) => FieldValue::Boolean(n != 0),
        (Value::Real(f), ValueKind::Float) => FieldValue::Float(f),
        (Value::Integer(n), ValueKind::Float) => FieldValue::Float(n as f64),
        (Value::Blob(b), ValueKind::Uuid) => {
            let bytes: [u8; 16] = b.try_into().map_err(|_| mismatch())?;
            FieldValue::Uuid(Uuid::from_bytes(bytes))
        }
        (Value::Blob(b), ValueKind::Bytes) => FieldValue::Bytes(b),
        _ => return Err(mismatch()),
    })
}

/// Map a failed write, reporting constraint failures as such.
fn map_write_error(e: rusqlite::Error, table: &str) -> StorageError {
    match e {
        rusqlite::Error::SqliteFailure(err, msg)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StorageError::ConstraintViolation(format!(
                "{table}: {}",
                msg.unwrap_or_else(|| err.to_string())
            ))
        }
        e => StorageError::Sqlite(e),
    }
}

fn check_values(schema: &EntitySchema, values: &Row) -> Result<(), StorageError> {
    for (column, value) in values {
        let field = schema
            .field(column)
            .ok_or_else(|| StorageError::UnknownColumn {
                table: schema.table.clone(),
                column: column.clone(),
            })?;
        if !value.fits(&field.kind) {
            return Err(StorageError::TypeMismatch {
                column: column.clone(),
            });
        }
    }
    Ok(())
}

fn key_column(schema: &EntitySchema) -> Result<&str, StorageError> {
    schema
        .primary_key()
        .map(|f| f.name.as_str())
        .ok_or_else(|| StorageError::NotFound(format!("primary key of {}", schema.name)))
}

fn where_clause(schema: &EntitySchema, filter: Option<Filter<'_>>) -> Result<(String, Vec<Value>), StorageError> {
    match filter {
        None => Ok((String::new(), Vec::new())),
        Some(f) => {
            if schema.field(f.column).is_none() {
                return Err(StorageError::UnknownColumn {
                    table: schema.table.clone(),
                    column: f.column.to_string(),
                });
            }
            Ok((
                format!(" WHERE \"{}\" = ?1", f.column),
                vec![to_sql_value(f.value)],
            ))
        }
    }
}

/// Decode a result row whose columns are `columns`, in order.
fn read_row(
    schema: &EntitySchema,
    columns: &[&str],
    row: &rusqlite::Row,
) -> Result<Row, StorageError> {
    let mut out = Row::new();
    for (i, column) in columns.iter().enumerate() {
        let field = schema
            .field(column)
            .ok_or_else(|| StorageError::UnknownColumn {
                table: schema.table.clone(),
                column: column.to_string(),
            })?;
        let raw: Value = row.get(i)?;
        out.insert(column.to_string(), from_sql_value(raw, &field.kind, column)?);
    }
    Ok(out)
}

fn read_definition(conn: &Connection, name: &str) -> Result<Option<EntitySchema>, StorageError> {
    let definition: Option<Vec<u8>> = conn
        .query_row(
            "SELECT definition FROM type_catalog WHERE name = ?1",
            rusqlite::params![name],
            |row| row.get(0),
        )
        .optional()?;
    definition
        .map(|bytes| {
            rmp_serde::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
        })
        .transpose()
}

fn quoted(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Storage for SqliteStorage {
    fn register_type(&mut self, schema: &EntitySchema) -> Result<(), StorageError> {
        schema.validate()?;
        let definition =
            rmp_serde::to_vec(schema).map_err(|e| StorageError::Serialization(e.to_string()))?;

        // The catalog check and the insert run under one write lock, so
        // connections registering the same type concurrently serialize here.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some(existing) = read_definition(&tx, &schema.name)? {
            if !existing.same_structure(schema) {
                return Err(StorageError::SchemaMismatch {
                    name: schema.name.clone(),
                });
            }
            if existing.history != schema.history {
                tx.execute(
                    "UPDATE type_catalog SET definition = ?1 WHERE name = ?2",
                    rusqlite::params![definition, schema.name],
                )?;
                tx.commit()?;
                tracing::debug!(name = %schema.name, "updated history options of storable type");
            }
            return Ok(());
        }

        tx.execute_batch(&create_table_sql(schema))?;
        for field in &schema.fields {
            if field.indexed && !field.unique {
                tx.execute_batch(&create_index_sql(schema, &field.name))?;
            }
        }
        tx.execute(
            "INSERT INTO type_catalog (name, namespace, table_name, definition) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![schema.name, schema.namespace, schema.table, definition],
        )
        .map_err(|e| map_write_error(e, "type_catalog"))?;
        tx.commit()?;

        tracing::debug!(name = %schema.name, table = %schema.table, "registered storable type");
        Ok(())
    }

    fn lookup_type(&self, name: &str) -> Result<Option<EntitySchema>, StorageError> {
        read_definition(&self.conn, name)
    }

    fn registered_types(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM type_catalog ORDER BY seq")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn insert_row(
        &mut self,
        schema: &EntitySchema,
        values: &Row,
    ) -> Result<FieldValue, StorageError> {
        check_values(schema, values)?;
        let key = key_column(schema)?;

        let columns: Vec<&str> = values.keys().map(String::as_str).collect();
        let params: Vec<Value> = values.values().map(to_sql_value).collect();
        let sql = if columns.is_empty() {
            format!("INSERT INTO \"{}\" DEFAULT VALUES", schema.table)
        } else {
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
            format!(
                "INSERT INTO \"{}\" ({}) VALUES ({})",
                schema.table,
                quoted(&columns),
                placeholders.join(", ")
            )
        };
        self.conn
            .execute(&sql, rusqlite::params_from_iter(params))
            .map_err(|e| map_write_error(e, &schema.table))?;

        match values.get(key) {
            Some(pk) if !pk.is_null() => Ok(pk.clone()),
            _ => Ok(FieldValue::Integer(self.conn.last_insert_rowid())),
        }
    }

    fn update_row(
        &mut self,
        schema: &EntitySchema,
        pk: &FieldValue,
        values: &Row,
    ) -> Result<bool, StorageError> {
        check_values(schema, values)?;
        let key = key_column(schema)?;
        if values.is_empty() {
            return Ok(self.fetch_row(schema, pk, Some(&[key][..]))?.is_some());
        }

        let assignments: Vec<String> = values
            .keys()
            .enumerate()
            .map(|(i, c)| format!("\"{c}\" = ?{}", i + 1))
            .collect();
        let mut params: Vec<Value> = values.values().map(to_sql_value).collect();
        params.push(to_sql_value(pk));
        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE \"{key}\" = ?{}",
            schema.table,
            assignments.join(", "),
            params.len()
        );
        let changed = self
            .conn
            .execute(&sql, rusqlite::params_from_iter(params))
            .map_err(|e| map_write_error(e, &schema.table))?;
        Ok(changed > 0)
    }

    fn delete_row(&mut self, schema: &EntitySchema, pk: &FieldValue) -> Result<bool, StorageError> {
        let key = key_column(schema)?;
        let sql = format!("DELETE FROM \"{}\" WHERE \"{key}\" = ?1", schema.table);
        let changed = self
            .conn
            .execute(&sql, [to_sql_value(pk)])
            .map_err(|e| map_write_error(e, &schema.table))?;
        Ok(changed > 0)
    }

    fn fetch_row(
        &self,
        schema: &EntitySchema,
        pk: &FieldValue,
        columns: Option<&[&str]>,
    ) -> Result<Option<Row>, StorageError> {
        let key = key_column(schema)?;
        let all: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        let columns = columns.unwrap_or(&all);
        if columns.is_empty() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {} FROM \"{}\" WHERE \"{key}\" = ?1",
            quoted(columns),
            schema.table
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([to_sql_value(pk)])?;
        match rows.next()? {
            Some(row) => Ok(Some(read_row(schema, columns, row)?)),
            None => Ok(None),
        }
    }

    fn select_rows(
        &self,
        schema: &EntitySchema,
        filter: Option<Filter<'_>>,
    ) -> Result<Vec<Row>, StorageError> {
        let columns: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        let (clause, params) = where_clause(schema, filter)?;
        let sql = format!(
            "SELECT {} FROM \"{}\"{clause} ORDER BY rowid",
            quoted(&columns),
            schema.table
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params))?;

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            result.push(read_row(schema, &columns, row)?);
        }
        Ok(result)
    }

    fn count_rows(
        &self,
        schema: &EntitySchema,
        filter: Option<Filter<'_>>,
    ) -> Result<u64, StorageError> {
        let (clause, params) = where_clause(schema, filter)?;
        let sql = format!("SELECT COUNT(*) FROM \"{}\"{clause}", schema.table);
        let count: i64 = self
            .conn
            .query_row(&sql, rusqlite::params_from_iter(params), |row| row.get(0))?;
        Ok(count as u64)
    }
}
