use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use rowbind_core::{FieldKind, Schema, SqlKind};

use crate::error::StorageError;

/// Connection settings applied as PRAGMAs when a store is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub journal_mode: String,
    pub synchronous: String,
    pub foreign_keys: bool,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            journal_mode: "WAL".into(),
            synchronous: "NORMAL".into(),
            foreign_keys: true,
            busy_timeout_ms: 5000,
        }
    }
}

pub fn init_connection(conn: &Connection, config: &StoreConfig) -> Result<(), StorageError> {
    conn.execute_batch(&format!(
        "
        PRAGMA journal_mode = {};
        PRAGMA synchronous = {};
        PRAGMA foreign_keys = {};
        PRAGMA busy_timeout = {};
    ",
        config.journal_mode,
        config.synchronous,
        if config.foreign_keys { "ON" } else { "OFF" },
        config.busy_timeout_ms,
    ))?;
    Ok(())
}

/// Double-quotes an SQL identifier.
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn column_type(kind: &FieldKind) -> Option<&'static str> {
    kind.storage_kind().map(|k| match k {
        SqlKind::Integer => "INTEGER",
        SqlKind::Real => "REAL",
        SqlKind::Text => "TEXT",
        SqlKind::Blob => "BLOB",
        SqlKind::Null => "NULL",
    })
}

/// `CREATE TABLE IF NOT EXISTS` statement for a derived schema. Serializer-backed
/// columns are declared without a type so any storage class is accepted.
pub fn create_table_sql(schema: &Schema) -> String {
    let mut definitions = Vec::with_capacity(schema.fields().len());

    for field in schema.fields() {
        let mut definition = quote(&field.column);
        if field.primary_key {
            definition.push_str(" INTEGER PRIMARY KEY AUTOINCREMENT");
            definitions.push(definition);
            continue;
        }
        if let Some(ty) = column_type(&field.kind) {
            definition.push(' ');
            definition.push_str(ty);
        }
        if field.not_null {
            definition.push_str(" NOT NULL");
        }
        if let Some(action) = field.unique {
            definition.push_str(" UNIQUE ON CONFLICT ");
            definition.push_str(action.as_sql());
        }
        if let FieldKind::Reference(target) = &field.kind {
            let description = target.describe();
            definition.push_str(&format!(
                " REFERENCES {}({}) ON DELETE SET NULL",
                quote(&description.resolved_table(target.name())),
                quote(&description.resolved_id_column()),
            ));
        }
        definitions.push(definition);
    }

    for group in schema.group_constraints() {
        let columns: Vec<String> = schema.group_members(group).map(|f| quote(&f.column)).collect();
        definitions.push(format!(
            "UNIQUE ({}) ON CONFLICT {}",
            columns.join(", "),
            group.action.as_sql()
        ));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(schema.table()),
        definitions.join(", ")
    )
}
