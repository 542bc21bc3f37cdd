use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no resolvable primary key column for {entity}")]
    MissingPrimaryKey { entity: String },

    #[error("invalid schema for {entity}: {reason}")]
    InvalidSchema { entity: String, reason: String },

    #[error("unknown field {field} on {entity}")]
    UnknownField { entity: String, field: String },

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("value {value} out of range for {target}")]
    OutOfRange { target: &'static str, value: i64 },

    #[error("invalid data: {0}")]
    InvalidData(String),
}
