use std::sync::Arc;

use rowbind_core::{RowImage, Schema, SqlValue};

use crate::error::StorageError;

/// One result row. Column lookup by name returns the first matching column, so
/// joined rows with repeated names resolve to the leftmost table.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn value(&self, column: &str) -> Option<&SqlValue> {
        self.index_of(column).and_then(|i| self.values.get(i))
    }

    /// Missing columns count as null.
    pub fn is_null(&self, column: &str) -> bool {
        self.value(column).is_none_or(SqlValue::is_null)
    }

    pub fn get_i64(&self, column: &str) -> Result<Option<i64>, StorageError> {
        match self.value(column) {
            None | Some(SqlValue::Null) => Ok(None),
            Some(SqlValue::Integer(n)) => Ok(Some(*n)),
            Some(other) => Err(column_type(column, "integer", other)),
        }
    }

    pub fn get_f64(&self, column: &str) -> Result<Option<f64>, StorageError> {
        match self.value(column) {
            None | Some(SqlValue::Null) => Ok(None),
            Some(SqlValue::Real(n)) => Ok(Some(*n)),
            Some(SqlValue::Integer(n)) => Ok(Some(*n as f64)),
            Some(other) => Err(column_type(column, "real", other)),
        }
    }

    pub fn get_text(&self, column: &str) -> Result<Option<&str>, StorageError> {
        match self.value(column) {
            None | Some(SqlValue::Null) => Ok(None),
            Some(SqlValue::Text(s)) => Ok(Some(s)),
            Some(other) => Err(column_type(column, "text", other)),
        }
    }

    pub fn get_blob(&self, column: &str) -> Result<Option<&[u8]>, StorageError> {
        match self.value(column) {
            None | Some(SqlValue::Null) => Ok(None),
            Some(SqlValue::Blob(b)) => Ok(Some(b)),
            Some(other) => Err(column_type(column, "blob", other)),
        }
    }
}

fn column_type(column: &str, expected: &'static str, actual: &SqlValue) -> StorageError {
    StorageError::ColumnType {
        column: column.to_string(),
        expected,
        actual: actual.kind().as_str(),
    }
}

/// Relational store the mapper writes through. Placeholders are positional `?`.
pub trait Store: Send + Sync {
    /// Inserts `row` and returns the key the store assigned.
    fn insert(&self, table: &str, row: &RowImage) -> Result<i64, StorageError>;

    fn update(
        &self,
        table: &str,
        row: &RowImage,
        predicate: &str,
        args: &[SqlValue],
    ) -> Result<usize, StorageError>;

    fn delete(&self, table: &str, predicate: &str, args: &[SqlValue]) -> Result<usize, StorageError>;

    fn raw_query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>, StorageError>;

    fn scalar_int_query(&self, sql: &str, args: &[SqlValue]) -> Result<i64, StorageError>;

    /// Runs a statement that returns no rows and reports the affected row count.
    fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<usize, StorageError>;

    fn create_table(&self, schema: &Schema) -> Result<(), StorageError>;
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn insert(&self, table: &str, row: &RowImage) -> Result<i64, StorageError> {
        (**self).insert(table, row)
    }

    fn update(
        &self,
        table: &str,
        row: &RowImage,
        predicate: &str,
        args: &[SqlValue],
    ) -> Result<usize, StorageError> {
        (**self).update(table, row, predicate, args)
    }

    fn delete(&self, table: &str, predicate: &str, args: &[SqlValue]) -> Result<usize, StorageError> {
        (**self).delete(table, predicate, args)
    }

    fn raw_query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>, StorageError> {
        (**self).raw_query(sql, args)
    }

    fn scalar_int_query(&self, sql: &str, args: &[SqlValue]) -> Result<i64, StorageError> {
        (**self).scalar_int_query(sql, args)
    }

    fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<usize, StorageError> {
        (**self).execute(sql, args)
    }

    fn create_table(&self, schema: &Schema) -> Result<(), StorageError> {
        (**self).create_table(schema)
    }
}
