pub mod codec;
pub mod config;
pub mod error;
pub mod identity;
pub mod notify;
pub mod query;
pub mod serializer;

pub use codec::{ReferenceResolver, TypeSerializer, ValueCodec};
pub use config::EngineConfig;
pub use error::{EngineError, QueryError};
pub use identity::{IdentityCache, DEFAULT_SWEEP_THRESHOLD};
pub use notify::{Change, ChangeObserver, NoopObserver};
pub use query::{JoinBuilder, JoinKind, Query, Statement, NO_ARGS};
pub use serializer::{MsgpackSerializer, PathSerializer, TimestampSerializer, UuidSerializer};

use std::cell::RefCell;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use rowbind_core::{
    Entity, EntityType, FieldDescriptor, FieldKind, Model, Persisted, RowImage, Schema,
    SchemaRegistry, SqlValue, Value,
};
use rowbind_storage::{quote, Row, StorageError, Store};

fn key_predicate(schema: &Schema) -> String {
    format!("{} = ?", quote(schema.id_column()))
}

/// Rejects a query built for another entity type, or over another table when it
/// carries no entity type.
fn check_target<T: Entity>(query: &Query, schema: &Schema) -> Result<(), QueryError> {
    let expected = EntityType::of::<T>();
    match (query.entity(), query.table()) {
        (Some(target), _) if *target != expected => Err(QueryError::WrongTarget {
            expected: expected.name().to_string(),
            actual: target.name().to_string(),
        }),
        (None, Some(table)) if table.trim_matches('"') != schema.table() => Err(QueryError::WrongTarget {
            expected: schema.table().to_string(),
            actual: table.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Maps entities to rows of a [`Store`].
///
/// Owns the schema registry and identity cache it uses; both can be shared between
/// engines with [`Engine::with_services`].
pub struct Engine<S: Store> {
    store: S,
    schemas: Arc<SchemaRegistry>,
    cache: Arc<IdentityCache>,
    codec: ValueCodec,
    observer: Arc<dyn ChangeObserver>,
    config: EngineConfig,
}

impl<S: Store> Engine<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        let cache = Arc::new(IdentityCache::with_sweep_threshold(config.cache_sweep_threshold));
        Self::with_services(store, Arc::new(SchemaRegistry::new()), cache, config)
    }

    pub fn with_services(
        store: S,
        schemas: Arc<SchemaRegistry>,
        cache: Arc<IdentityCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            schemas,
            cache,
            codec: ValueCodec::with_defaults(),
            observer: Arc::new(NoopObserver),
            config,
        }
    }

    pub fn with_observer(mut self, observer: impl ChangeObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn with_codec(mut self, codec: ValueCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn register_serializer(&mut self, name: &'static str, serializer: impl TypeSerializer + 'static) {
        self.codec.register(name, serializer);
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    pub fn codec(&self) -> &ValueCodec {
        &self.codec
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn schema<T: Entity>(&self) -> Result<Arc<Schema>, EngineError> {
        Ok(self.schemas.schema_for::<T>()?)
    }

    /// Creates the table for `T` if it does not exist yet.
    pub fn create_table<T: Entity>(&self) -> Result<(), EngineError> {
        let schema = self.schema::<T>()?;
        self.store.create_table(&schema)?;
        Ok(())
    }

    /// `SELECT *` over the table of `T`.
    pub fn select<T: Entity>(&self) -> Result<Query, EngineError> {
        let schema = self.schema::<T>()?;
        Ok(Query::select_all()
            .from(quote(schema.table()))
            .for_entity(EntityType::of::<T>()))
    }

    /// `DELETE` over the table of `T`.
    pub fn delete_from<T: Entity>(&self) -> Result<Query, EngineError> {
        let schema = self.schema::<T>()?;
        Ok(Query::delete()
            .from(quote(schema.table()))
            .for_entity(EntityType::of::<T>()))
    }

    fn log_statement(&self, statement: &Statement) {
        if self.config.log_sql {
            trace!(sql = statement.sql(), args = ?statement.arguments(), "statement");
        }
    }

    fn notify(&self, schema: &Schema, id: Option<i64>) {
        self.observer.changed(&Change {
            entity: schema.entity(),
            table: schema.table().to_string(),
            id,
        });
    }

    fn query_rows(&self, statement: &Statement) -> Result<Vec<Row>, EngineError> {
        self.log_statement(statement);
        Ok(self.store.raw_query(statement.sql(), statement.arguments())?)
    }

    fn query_scalar(&self, statement: &Statement) -> Result<i64, EngineError> {
        self.log_statement(statement);
        Ok(self.store.scalar_int_query(statement.sql(), statement.arguments())?)
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Loads the row with primary key `id`. A live instance for that row is reused
    /// and refreshed from storage.
    pub fn load<T: Entity>(&self, id: i64) -> Result<Option<Model<T>>, EngineError> {
        let entity_type = EntityType::of::<T>();
        let schema = self.schemas.schema_of(&entity_type)?;
        let scope = Materializer::new(self);
        scope
            .load(&entity_type, &schema, id)?
            .map(|entity| downcast(&entity_type, entity))
            .transpose()
    }

    pub fn fetch<T: Entity>(&self, query: &Query) -> Result<Vec<Model<T>>, EngineError> {
        if !query.is_select() {
            return Err(QueryError::NotASelect.into());
        }
        let entity_type = EntityType::of::<T>();
        let schema = self.schemas.schema_of(&entity_type)?;
        check_target::<T>(query, &schema)?;
        let rows = self.query_rows(&query.to_sql()?)?;

        let scope = Materializer::new(self);
        rows.iter()
            .map(|row| {
                let entity = scope.materialize(&entity_type, &schema, row)?;
                downcast(&entity_type, entity)
            })
            .collect()
    }

    /// Runs `query` with its limit forced to one row.
    pub fn fetch_single<T: Entity>(&self, query: &Query) -> Result<Option<Model<T>>, EngineError> {
        Ok(self.fetch(&query.clone().limit(1))?.into_iter().next())
    }

    pub fn count(&self, query: &Query) -> Result<i64, EngineError> {
        self.query_scalar(&query.to_count_sql()?)
    }

    pub fn exists(&self, query: &Query) -> Result<bool, EngineError> {
        Ok(self.query_scalar(&query.to_exists_sql()?)? != 0)
    }

    /// Rows of `T` whose `foreign_key` field references `owner`.
    pub fn many<T: Entity, O: Entity>(
        &self,
        owner: &Model<O>,
        foreign_key: &str,
    ) -> Result<Vec<Model<T>>, EngineError> {
        let owner_id = owner.id().ok_or_else(|| EngineError::NotPersisted(owner.to_string()))?;
        let schema = self.schema::<T>()?;
        let column = schema.column_for(foreign_key).unwrap_or(foreign_key);
        let query = Query::select_all()
            .from(quote(schema.table()))
            .for_entity(EntityType::of::<T>())
            .filter(format!("{}.{} = ?", quote(schema.table()), quote(column)), [owner_id]);
        self.fetch(&query)
    }

    /// Rows of `T` linked to `owner` through the link table of `L`. `link_to_owner`
    /// and `link_to_target` name the fields of `L` referencing `O` and `T`.
    pub fn many_to_many<T: Entity, L: Entity, O: Entity>(
        &self,
        owner: &Model<O>,
        link_to_owner: &str,
        link_to_target: &str,
    ) -> Result<Vec<Model<T>>, EngineError> {
        let owner_id = owner.id().ok_or_else(|| EngineError::NotPersisted(owner.to_string()))?;
        let target = self.schema::<T>()?;
        let link = self.schema::<L>()?;
        let target_table = quote(target.table());
        let link_table = quote(link.table());
        let owner_column = quote(link.column_for(link_to_owner).unwrap_or(link_to_owner));
        let target_column = quote(link.column_for(link_to_target).unwrap_or(link_to_target));

        let query = Query::select([format!("{target_table}.*")])
            .from(target_table.clone())
            .for_entity(EntityType::of::<T>())
            .inner_join(link_table.clone())
            .on(
                format!("{link_table}.{target_column} = {target_table}.{}", quote(target.id_column())),
                NO_ARGS,
            )
            .filter(format!("{link_table}.{owner_column} = ?"), [owner_id]);
        self.fetch(&query)
    }

    /// [`Engine::many_to_many`] with the link fields found from the reference
    /// kinds declared on `L`.
    pub fn linked<T: Entity, L: Entity, O: Entity>(
        &self,
        owner: &Model<O>,
    ) -> Result<Vec<Model<T>>, EngineError> {
        let link = self.schema::<L>()?;
        let owner_type = EntityType::of::<O>();
        let target_type = EntityType::of::<T>();

        let references = |wanted: &EntityType, skip: Option<&str>| {
            link.fields()
                .iter()
                .find(|f| {
                    matches!(&f.kind, FieldKind::Reference(t) if t == wanted)
                        && Some(f.name.as_str()) != skip
                })
                .map(|f| f.name.clone())
        };
        let missing = |target: &EntityType| EngineError::MissingLink {
            link: link.table().to_string(),
            target: target.name().to_string(),
        };

        let to_owner = references(&owner_type, None).ok_or_else(|| missing(&owner_type))?;
        let to_target = references(&target_type, Some(to_owner.as_str())).ok_or_else(|| missing(&target_type))?;
        self.many_to_many::<T, L, O>(owner, &to_owner, &to_target)
    }

    // ========================================================================
    // Saving
    // ========================================================================

    /// Inserts or updates `model` and returns its primary key.
    ///
    /// A transient entity whose update-on-conflict unique fields match an existing
    /// row adopts that row's key and updates it in place.
    pub fn save<T: Entity>(&self, model: &Model<T>) -> Result<i64, EngineError> {
        self.save_erased(&model.erased())
    }

    fn save_erased(&self, entity: &Arc<dyn Persisted>) -> Result<i64, EngineError> {
        let schema = self.schemas.schema_of(&entity.entity_type())?;
        let mut row = self.row_image(&schema, entity.as_ref());

        let mut id = entity.primary_key();
        if id.is_none() && self.config.resolve_unique_conflicts && schema.has_update_on_conflict() {
            id = self.find_by_natural_key(&schema, &row)?;
        }

        let id = match id {
            Some(id) => {
                row.put(schema.id_column(), SqlValue::Integer(id));
                let updated = self.store.update(
                    schema.table(),
                    &row,
                    &key_predicate(&schema),
                    &[SqlValue::Integer(id)],
                )?;
                if updated == 0 {
                    debug!(table = schema.table(), id, "update matched no row, inserting");
                    self.insert_row(&schema, &row)?
                } else {
                    id
                }
            }
            None => self.insert_row(&schema, &row)?,
        };

        entity.assign_primary_key(id);
        self.cache.put(schema.table(), id, entity);
        self.notify(&schema, Some(id));
        Ok(id)
    }

    /// Encodes every field of `entity`. Fields that cannot be read or encoded are
    /// left out of the row.
    fn row_image(&self, schema: &Schema, entity: &dyn Persisted) -> RowImage {
        let mut row = RowImage::new();
        row.put(schema.id_column(), SqlValue::from(entity.primary_key()));

        for field in schema.fields().iter().filter(|f| !f.primary_key) {
            let encoded = entity
                .read_field(&field.name)
                .map_err(EngineError::from)
                .and_then(|value| self.codec.encode(field, value));
            match encoded {
                Ok(value) => row.put(field.column.as_str(), value),
                Err(error) => warn!(
                    entity = schema.entity(),
                    field = %field.name,
                    %error,
                    "skipping field on save"
                ),
            }
        }
        row
    }

    fn insert_row(&self, schema: &Schema, row: &RowImage) -> Result<i64, EngineError> {
        match self.store.insert(schema.table(), row) {
            Ok(id) => Ok(id),
            Err(StorageError::ConstraintViolation(reason))
                if self.config.retry_on_constraint_violation && schema.has_update_on_conflict() =>
            {
                debug!(table = schema.table(), %reason, "insert hit a unique constraint, retrying lookup");
                let Some(id) = self.find_by_natural_key(schema, row)? else {
                    return Err(StorageError::ConstraintViolation(reason).into());
                };
                let mut row = row.clone();
                row.put(schema.id_column(), SqlValue::Integer(id));
                self.store
                    .update(schema.table(), &row, &key_predicate(schema), &[SqlValue::Integer(id)])?;
                Ok(id)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Looks up the key of an existing row sharing a natural key with `row`: any
    /// non-null update-on-conflict unique field, or any update-on-conflict group
    /// whose members are all non-null.
    fn find_by_natural_key(&self, schema: &Schema, row: &RowImage) -> Result<Option<i64>, EngineError> {
        let present = |field: &FieldDescriptor| row.get(&field.column).filter(|v| !v.is_null()).cloned();
        let condition = |field: &FieldDescriptor| format!("{} = ?", quote(&field.column));

        let mut query = Query::select([quote(schema.id_column())]).from(quote(schema.table()));
        let mut conditions = 0;

        for field in schema.unique_fields() {
            if let Some(value) = present(field) {
                query = query.or(condition(field), [value]);
                conditions += 1;
            }
        }

        for group in schema.unique_groups() {
            let members: Vec<&FieldDescriptor> = schema.group_members(group).collect();
            let Some(values) = members.iter().map(|&f| present(f)).collect::<Option<Vec<_>>>() else {
                continue;
            };
            query = query.start_group_or();
            for (&field, value) in members.iter().zip(values) {
                query = query.and(condition(field), [value]);
            }
            query = query.end_group();
            conditions += 1;
        }

        if conditions == 0 {
            return Ok(None);
        }

        let rows = self.query_rows(&query.limit(1).to_sql()?)?;
        let id = rows
            .first()
            .map(|row| row.get_i64(schema.id_column()))
            .transpose()?
            .flatten();
        if let Some(id) = id {
            debug!(table = schema.table(), id, "matched existing row by natural key");
        }
        Ok(id)
    }

    // ========================================================================
    // Deleting
    // ========================================================================

    /// Deletes the row of `model` and drops it from the identity cache. The model
    /// keeps its key. Returns whether a row was removed.
    pub fn delete<T: Entity>(&self, model: &Model<T>) -> Result<bool, EngineError> {
        let id = model.id().ok_or_else(|| EngineError::NotPersisted(model.to_string()))?;
        let schema = self.schema::<T>()?;
        let removed = self
            .store
            .delete(schema.table(), &key_predicate(&schema), &[SqlValue::Integer(id)])?;
        self.cache.remove(schema.table(), id);
        self.notify(&schema, Some(id));
        Ok(removed > 0)
    }

    /// Deletes a row by key without loading it. Observers get a table-wide change.
    pub fn delete_by_id<T: Entity>(&self, id: i64) -> Result<bool, EngineError> {
        let schema = self.schema::<T>()?;
        let removed = self
            .store
            .delete(schema.table(), &key_predicate(&schema), &[SqlValue::Integer(id)])?;
        self.cache.remove(schema.table(), id);
        self.notify(&schema, None);
        Ok(removed > 0)
    }

    /// Loads the first row a DELETE query matches and deletes it as an entity.
    pub fn delete_single<T: Entity>(&self, query: &Query) -> Result<Option<Model<T>>, EngineError> {
        if !query.is_delete() {
            return Err(QueryError::NotADelete.into());
        }
        check_target::<T>(query, &*self.schema::<T>()?)?;
        let Some(model) = self.fetch_single::<T>(&query.as_select())? else {
            return Ok(None);
        };
        self.delete(&model)?;
        Ok(Some(model))
    }

    /// Runs a statement-level DELETE. Cached instances of the matched rows are
    /// evicted and observers get a table-wide change.
    pub fn execute<T: Entity>(&self, query: &Query) -> Result<usize, EngineError> {
        if !query.is_delete() {
            return Err(QueryError::NotADelete.into());
        }
        let schema = self.schema::<T>()?;
        check_target::<T>(query, &schema)?;
        let statement = query.to_sql()?;

        let matched = self.query_rows(&query.projected(vec![quote(schema.id_column())]).to_sql()?)?;
        let mut ids = Vec::with_capacity(matched.len());
        for row in &matched {
            if let Some(id) = row.get_i64(schema.id_column())? {
                ids.push(id);
            }
        }

        self.log_statement(&statement);
        let removed = self.store.execute(statement.sql(), statement.arguments())?;
        for id in ids {
            self.cache.remove(schema.table(), id);
        }
        debug!(table = schema.table(), removed, "bulk delete");
        self.notify(&schema, None);
        Ok(removed)
    }
}

impl<S: Store> ReferenceResolver for Engine<S> {
    fn resolve(&self, target: &EntityType, id: i64) -> Result<Option<Arc<dyn Persisted>>, EngineError> {
        Materializer::new(self).resolve(target, id)
    }
}

fn downcast<T: Entity>(entity_type: &EntityType, entity: Arc<dyn Persisted>) -> Result<Model<T>, EngineError> {
    let actual = entity.entity_type().name();
    Model::from_erased(entity).ok_or(EngineError::WrongEntity {
        expected: entity_type.name(),
        actual,
    })
}

struct Pending {
    table: String,
    id: i64,
    entity: Arc<dyn Persisted>,
}

/// Materializes rows for one load call. Instances still being filled in are visible
/// to nested reference resolution, so cyclic references resolve to the same
/// instance instead of loading again.
struct Materializer<'a, S: Store> {
    engine: &'a Engine<S>,
    pending: RefCell<Vec<Pending>>,
}

impl<'a, S: Store> Materializer<'a, S> {
    fn new(engine: &'a Engine<S>) -> Self {
        Self {
            engine,
            pending: RefCell::new(Vec::new()),
        }
    }

    fn load(
        &self,
        entity_type: &EntityType,
        schema: &Schema,
        id: i64,
    ) -> Result<Option<Arc<dyn Persisted>>, EngineError> {
        let query = Query::select_all()
            .from(quote(schema.table()))
            .filter(key_predicate(schema), [id])
            .limit(1);
        let rows = self.engine.query_rows(&query.to_sql()?)?;
        rows.first()
            .map(|row| self.materialize(entity_type, schema, row))
            .transpose()
    }

    fn pending(&self, entity_type: &EntityType, table: &str, id: i64) -> Option<Arc<dyn Persisted>> {
        self.pending
            .borrow()
            .iter()
            .find(|p| p.id == id && p.table == table && p.entity.entity_type() == *entity_type)
            .map(|p| p.entity.clone())
    }

    fn materialize(
        &self,
        entity_type: &EntityType,
        schema: &Schema,
        row: &Row,
    ) -> Result<Arc<dyn Persisted>, EngineError> {
        let engine = self.engine;
        let id = row.get_i64(schema.id_column())?;

        let live = id
            .and_then(|id| engine.cache.get(schema.table(), id))
            .filter(|entity| entity.entity_type() == *entity_type);
        let reused = live.is_some();
        let entity = live.unwrap_or_else(|| entity_type.instantiate());

        if let Some(id) = id {
            if !reused {
                entity.assign_primary_key(id);
            }
            self.pending.borrow_mut().push(Pending {
                table: schema.table().to_string(),
                id,
                entity: entity.clone(),
            });
        }

        let decoded = self.decode_fields(schema, row, reused);
        if id.is_some() {
            self.pending.borrow_mut().pop();
        }

        for (field, value) in decoded {
            if let Err(error) = entity.write_field(&field.name, value) {
                warn!(entity = schema.entity(), field = %field.name, %error, "skipping field on load");
            }
        }

        if let Some(id) = id {
            engine.cache.put(schema.table(), id, &entity);
        }
        Ok(entity)
    }

    /// Decodes the non-key columns of `row`. Null columns are skipped on a fresh
    /// instance. On a reused instance they are passed on as `Value::Null`, which
    /// clears optional fields; a field that cannot hold null keeps its value.
    fn decode_fields<'s>(&self, schema: &'s Schema, row: &Row, reused: bool) -> Vec<(&'s FieldDescriptor, Value)> {
        let mut decoded = Vec::with_capacity(schema.fields().len());
        for field in schema.fields().iter().filter(|f| !f.primary_key) {
            let Some(stored) = row.value(&field.column) else {
                continue;
            };
            if stored.is_null() {
                if reused {
                    decoded.push((field, Value::Null));
                }
                continue;
            }
            match self.engine.codec.decode(field, stored.clone(), self) {
                Ok(value) => decoded.push((field, value)),
                Err(error) => warn!(
                    entity = schema.entity(),
                    field = %field.name,
                    %error,
                    "skipping undecodable column"
                ),
            }
        }
        decoded
    }
}

impl<S: Store> ReferenceResolver for Materializer<'_, S> {
    fn resolve(&self, target: &EntityType, id: i64) -> Result<Option<Arc<dyn Persisted>>, EngineError> {
        let schema = self.engine.schemas.schema_of(target)?;
        let cached = self
            .engine
            .cache
            .get(schema.table(), id)
            .filter(|entity| entity.entity_type() == *target);
        if let Some(entity) = cached.or_else(|| self.pending(target, schema.table(), id)) {
            return Ok(Some(entity));
        }
        self.load(target, &schema, id)
    }
}
