pub mod error;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::StorageError;
pub use schema::{create_table_sql, quote, StoreConfig};
pub use sqlite::SqliteStore;
pub use traits::*;
