use parking_lot::Mutex;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tracing::trace;

use rowbind_core::{RowImage, Schema, SqlValue};

use crate::error::StorageError;
use crate::schema::{create_table_sql, init_connection, quote, StoreConfig};
use crate::traits::{Row, Store};

fn to_sqlite(value: &SqlValue) -> SqliteValue {
    match value {
        SqlValue::Null => SqliteValue::Null,
        SqlValue::Integer(n) => SqliteValue::Integer(*n),
        SqlValue::Real(n) => SqliteValue::Real(*n),
        SqlValue::Text(s) => SqliteValue::Text(s.clone()),
        SqlValue::Blob(b) => SqliteValue::Blob(b.clone()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Result<SqlValue, StorageError> {
    Ok(match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(n) => SqlValue::Integer(n),
        ValueRef::Real(n) => SqlValue::Real(n),
        ValueRef::Text(bytes) => SqlValue::Text(
            std::str::from_utf8(bytes)
                .map_err(|e| StorageError::Sqlite(rusqlite::Error::Utf8Error(e)))?
                .to_string(),
        ),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    })
}

/// Maps SQLite constraint failures to [`StorageError::ConstraintViolation`].
fn classify(error: rusqlite::Error) -> StorageError {
    match error {
        rusqlite::Error::SqliteFailure(err, message)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StorageError::ConstraintViolation(message.unwrap_or_else(|| err.to_string()))
        }
        other => StorageError::Sqlite(other),
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::open_with(path, &StoreConfig::default())
    }

    pub fn open_with(path: &str, config: &StoreConfig) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        init_connection(&conn, config)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        init_connection(&conn, &StoreConfig::default())?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn run(&self, sql: &str, args: &[SqlValue]) -> Result<usize, StorageError> {
        trace!(sql, args = args.len(), "execute");
        let conn = self.conn.lock();
        conn.execute(sql, params_from_iter(args.iter().map(to_sqlite)))
            .map_err(classify)
    }
}

impl Store for SqliteStore {
    fn insert(&self, table: &str, row: &RowImage) -> Result<i64, StorageError> {
        let sql = if row.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote(table))
        } else {
            let columns: Vec<String> = row.columns().map(quote).collect();
            let placeholders = vec!["?"; row.len()].join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(table),
                columns.join(", "),
                placeholders
            )
        };
        trace!(sql = %sql, args = row.len(), "insert");

        let conn = self.conn.lock();
        conn.execute(&sql, params_from_iter(row.values().map(to_sqlite)))
            .map_err(classify)?;
        Ok(conn.last_insert_rowid())
    }

    fn update(
        &self,
        table: &str,
        row: &RowImage,
        predicate: &str,
        args: &[SqlValue],
    ) -> Result<usize, StorageError> {
        if row.is_empty() {
            return Ok(0);
        }
        let assignments: Vec<String> = row.columns().map(|c| format!("{} = ?", quote(c))).collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote(table),
            assignments.join(", "),
            predicate
        );
        let bound: Vec<SqlValue> = row.values().chain(args.iter()).cloned().collect();
        self.run(&sql, &bound)
    }

    fn delete(&self, table: &str, predicate: &str, args: &[SqlValue]) -> Result<usize, StorageError> {
        let sql = format!("DELETE FROM {} WHERE {}", quote(table), predicate);
        self.run(&sql, args)
    }

    fn raw_query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>, StorageError> {
        trace!(sql, args = args.len(), "query");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = stmt.query(params_from_iter(args.iter().map(to_sqlite)))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_sqlite(row.get_ref(i)?)?);
            }
            result.push(Row::new(columns.clone(), values));
        }
        Ok(result)
    }

    fn scalar_int_query(&self, sql: &str, args: &[SqlValue]) -> Result<i64, StorageError> {
        trace!(sql, args = args.len(), "scalar query");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(args.iter().map(to_sqlite)))?;
        match rows.next()? {
            Some(row) => match from_sqlite(row.get_ref(0)?)? {
                SqlValue::Integer(n) => Ok(n),
                SqlValue::Null => Ok(0),
                other => Err(StorageError::ColumnType {
                    column: "0".into(),
                    expected: "integer",
                    actual: other.kind().as_str(),
                }),
            },
            None => Err(StorageError::NoRows(sql.to_string())),
        }
    }

    fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<usize, StorageError> {
        self.run(sql, args)
    }

    fn create_table(&self, schema: &Schema) -> Result<(), StorageError> {
        let sql = create_table_sql(schema);
        trace!(sql = %sql, "create table");
        self.conn.lock().execute_batch(&sql)?;
        Ok(())
    }
}
