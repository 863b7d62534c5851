use rusqlite::Connection;

use changelog_core::{EntitySchema, FieldDescriptor, Generation, ValueKind};

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(CATALOG_SQL)?;
    Ok(())
}

const CATALOG_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS type_catalog (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    namespace TEXT NOT NULL,
    table_name TEXT NOT NULL UNIQUE,
    definition BLOB NOT NULL,
    registered_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
";

/// `CREATE TABLE` statement for an entity type. Field and table names are
/// validated identifiers, so quoting them is enough.
pub fn create_table_sql(schema: &EntitySchema) -> String {
    let columns: Vec<String> = schema.fields.iter().map(column_sql).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n)",
        schema.table,
        columns.join(",\n    ")
    )
}

fn column_sql(field: &FieldDescriptor) -> String {
    let mut sql = format!("\"{}\" {}", field.name, sql_type(&field.kind));
    if field.primary_key {
        sql.push_str(" PRIMARY KEY");
        if field.generation == Generation::AutoIncrement {
            sql.push_str(" AUTOINCREMENT");
        }
    } else {
        if !field.nullable {
            sql.push_str(" NOT NULL");
        }
        if field.unique {
            sql.push_str(" UNIQUE");
        }
    }
    if let ValueKind::Text {
        max_length: Some(max),
    } = field.kind
    {
        sql.push_str(&format!(" CHECK (length(\"{}\") <= {max})", field.name));
    }
    sql
}

fn sql_type(kind: &ValueKind) -> &'static str {
    match kind {
        ValueKind::Text { .. } => "TEXT",
        ValueKind::Integer | ValueKind::Boolean | ValueKind::Timestamp => "INTEGER",
        ValueKind::Float => "REAL",
        ValueKind::Uuid | ValueKind::Bytes => "BLOB",
    }
}

/// Index on a non-unique lookup column.
pub fn create_index_sql(schema: &EntitySchema, column: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS \"idx_{table}_{column}\" ON \"{table}\" (\"{column}\")",
        table = schema.table
    )
}

#[cfg(test)]
mod tests {
    use changelog_core::FieldDescriptor;

    use super::*;

    #[test]
    fn auto_key_becomes_autoincrement_primary_key() {
        let schema = EntitySchema::new("tests", "TestModel")
            .with_field(FieldDescriptor::auto_key("id"))
            .with_field(FieldDescriptor::text("text", Some(200)))
            .with_field(FieldDescriptor::integer("integer").nullable());
        let sql = create_table_sql(&schema);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"tests_testmodel\""));
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("\"text\" TEXT NOT NULL CHECK (length(\"text\") <= 200)"));
        assert!(sql.contains("\"integer\" INTEGER,") || sql.ends_with("\"integer\" INTEGER\n)"));
    }

    #[test]
    fn plain_integer_key_has_no_autoincrement() {
        let schema = EntitySchema::new("tests", "Plain")
            .with_field(FieldDescriptor::integer("id").primary_key());
        let sql = create_table_sql(&schema);
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY\n"));
        assert!(!sql.contains("AUTOINCREMENT"));
    }

    #[test]
    fn catalog_initializes_twice() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
