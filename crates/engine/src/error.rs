use rowbind_core::CoreError;
use rowbind_storage::StorageError;
use thiserror::Error;

/// Statement-construction failures, reported when a query is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("{open} group(s) not closed in query: {sql}")]
    UnclosedGroup { open: usize, sql: String },

    #[error("group closed without any condition")]
    EmptyGroup,

    #[error("end_group called without an open group")]
    UnbalancedGroup,

    #[error("query has no table")]
    MissingTable,

    #[error("query is not a SELECT")]
    NotASelect,

    #[error("query is not a DELETE")]
    NotADelete,

    #[error("query targets {actual}, expected {expected}")]
    WrongTarget { expected: String, actual: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("query error: {0}")]
    Query(#[from] QueryError),

    #[error("entity has no primary key: {0}")]
    NotPersisted(String),

    #[error("no serializer registered for {0}")]
    UnknownSerializer(String),

    #[error("serializer {name} failed: {reason}")]
    Serializer { name: String, reason: String },

    #[error("cannot store {value} in field {field}: {reason}")]
    Coercion {
        field: String,
        value: String,
        reason: String,
    },

    #[error("no link from {link} to {target}")]
    MissingLink { link: String, target: String },

    #[error("row materialized as {actual}, expected {expected}")]
    WrongEntity {
        expected: &'static str,
        actual: &'static str,
    },
}
