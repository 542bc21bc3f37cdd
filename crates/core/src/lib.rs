pub mod entity;
pub mod error;
pub mod schema;
pub mod value;

pub use entity::{Entity, EntityType, Model, Persisted};
pub use error::CoreError;
pub use schema::{
    ColumnDescription, ConflictAction, FieldDescriptor, FieldKind, Schema, SchemaRegistry,
    TableDescription, UniqueGroup, DEFAULT_ID_COLUMN,
};
pub use value::{FromValue, RowImage, SqlKind, SqlValue, Value};
