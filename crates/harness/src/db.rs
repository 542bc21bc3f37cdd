use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use rowbind_core::{Entity, SchemaRegistry};
use rowbind_engine::{Engine, EngineConfig, EngineError, IdentityCache};
use rowbind_storage::SqliteStore;

use crate::fixtures::{Author, Book, BookTag, Contact, Parcel, Tag, User};
use crate::recorder::RecordingObserver;

/// Installs a test-friendly subscriber driven by `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An engine over a fresh SQLite database with every fixture table created and a
/// recording observer attached.
pub struct TestDb {
    pub engine: Engine<Arc<SqliteStore>>,
    pub changes: RecordingObserver,
}

impl TestDb {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        Self::over(Arc::new(SqliteStore::open_in_memory()?), config)
    }

    /// File-backed database at `path`.
    pub fn open(path: &str) -> Result<Self, EngineError> {
        Self::over(Arc::new(SqliteStore::open(path)?), EngineConfig::default())
    }

    fn over(store: Arc<SqliteStore>, config: EngineConfig) -> Result<Self, EngineError> {
        init_tracing();
        let changes = RecordingObserver::new();
        let engine = Engine::with_config(store, config).with_observer(changes.clone());
        let db = Self { engine, changes };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<(), EngineError> {
        self.engine.create_table::<User>()?;
        self.engine.create_table::<Contact>()?;
        self.engine.create_table::<Author>()?;
        self.engine.create_table::<Book>()?;
        self.engine.create_table::<Tag>()?;
        self.engine.create_table::<BookTag>()?;
        self.engine.create_table::<Parcel>()?;
        Ok(())
    }

    /// A second engine over the same store and services, as another component of
    /// the same process would hold.
    pub fn sibling(&self) -> Engine<Arc<SqliteStore>> {
        Engine::with_services(
            self.engine.store().clone(),
            Arc::clone(self.engine.schemas()),
            Arc::clone(self.engine.cache()),
            self.engine.config().clone(),
        )
    }

    /// A second engine over the same store with its own empty registry and cache.
    pub fn detached(&self) -> Engine<Arc<SqliteStore>> {
        Engine::with_services(
            self.engine.store().clone(),
            Arc::new(SchemaRegistry::new()),
            Arc::new(IdentityCache::new()),
            self.engine.config().clone(),
        )
    }

    pub fn row_count<T: Entity>(&self) -> Result<i64, EngineError> {
        self.engine.count(&self.engine.select::<T>()?)
    }
}
