use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::CoreError;
use crate::schema::TableDescription;
use crate::value::Value;

/// A plain data type mapped to one table row.
///
/// Field access goes through logical field names declared in [`Entity::describe`];
/// the primary key is kept apart from the declared fields.
pub trait Entity: Default + Send + Sync + 'static {
    fn describe() -> TableDescription;

    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);

    fn get(&self, field: &str) -> Result<Value, CoreError>;

    fn set(&mut self, field: &str, value: Value) -> Result<(), CoreError>;
}

/// Object-safe view of a shared entity, used where the concrete type is not known
/// (identity cache, entity-reference fields, row materialization).
pub trait Persisted: Send + Sync {
    fn entity_type(&self) -> EntityType;

    fn primary_key(&self) -> Option<i64>;

    fn assign_primary_key(&self, id: i64);

    fn read_field(&self, field: &str) -> Result<Value, CoreError>;

    fn write_field(&self, field: &str, value: Value) -> Result<(), CoreError>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Entity> Persisted for RwLock<T> {
    fn entity_type(&self) -> EntityType {
        EntityType::of::<T>()
    }

    fn primary_key(&self) -> Option<i64> {
        self.read().id()
    }

    fn assign_primary_key(&self, id: i64) {
        self.write().set_id(id);
    }

    fn read_field(&self, field: &str) -> Result<Value, CoreError> {
        self.read().get(field)
    }

    fn write_field(&self, field: &str, value: Value) -> Result<(), CoreError> {
        self.write().set(field, value)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

fn instantiate_erased<T: Entity>() -> Arc<dyn Persisted> {
    Arc::new(RwLock::new(T::default()))
}

/// Runtime handle to an entity type: identity, description and an erased
/// constructor.
#[derive(Clone, Copy)]
pub struct EntityType {
    type_id: fn() -> TypeId,
    type_name: fn() -> &'static str,
    describe: fn() -> TableDescription,
    instantiate: fn() -> Arc<dyn Persisted>,
}

impl EntityType {
    pub fn of<T: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<T>,
            type_name: std::any::type_name::<T>,
            describe: T::describe,
            instantiate: instantiate_erased::<T>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        (self.type_id)()
    }

    /// Short type name, without module path or generic arguments.
    pub fn name(&self) -> &'static str {
        let full = (self.type_name)();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base)
    }

    pub fn describe(&self) -> TableDescription {
        (self.describe)()
    }

    pub fn table_name(&self) -> String {
        self.describe().resolved_table(self.name())
    }

    pub fn instantiate(&self) -> Arc<dyn Persisted> {
        (self.instantiate)()
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id() == other.type_id()
    }
}

impl Eq for EntityType {}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityType({})", self.name())
    }
}

/// Shared handle to a live entity instance.
///
/// Two handles are equal when they point at the same instance, or when both carry
/// the same non-null primary key for the same table.
pub struct Model<T: Entity> {
    inner: Arc<RwLock<T>>,
}

impl<T: Entity> Model<T> {
    pub fn new(entity: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(entity)),
        }
    }

    pub fn from_erased(handle: Arc<dyn Persisted>) -> Option<Self> {
        handle
            .into_any()
            .downcast::<RwLock<T>>()
            .ok()
            .map(|inner| Self { inner })
    }

    pub fn erased(&self) -> Arc<dyn Persisted> {
        self.inner.clone()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write()
    }

    pub fn id(&self) -> Option<i64> {
        self.inner.read().id()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl<T: Entity> Clone for Model<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Entity> From<T> for Model<T> {
    fn from(entity: T) -> Self {
        Self::new(entity)
    }
}

impl<T: Entity, U: Entity> PartialEq<Model<U>> for Model<T> {
    fn eq(&self, other: &Model<U>) -> bool {
        if self.address() == other.address() {
            return true;
        }
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => {
                a == b && EntityType::of::<T>().table_name() == EntityType::of::<U>().table_name()
            }
            _ => false,
        }
    }
}

impl<T: Entity> Eq for Model<T> {}

impl<T: Entity> Hash for Model<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.id() {
            Some(id) => id.hash(state),
            None => self.address().hash(state),
        }
        EntityType::of::<T>().table_name().hash(state);
    }
}

impl<T: Entity> fmt::Display for Model<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = EntityType::of::<T>().table_name();
        match self.id() {
            Some(id) => write!(f, "{table}@{id}"),
            None => write!(f, "{table}@null"),
        }
    }
}

impl<T: Entity + fmt::Debug> fmt::Debug for Model<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Model").field(&*self.inner.read()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescription, FieldKind};

    #[derive(Debug, Default)]
    struct Note {
        id: Option<i64>,
        body: String,
    }

    impl Entity for Note {
        fn describe() -> TableDescription {
            TableDescription::new()
                .table("Notes")
                .column(ColumnDescription::new("body", FieldKind::Text))
        }

        fn id(&self) -> Option<i64> {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = Some(id);
        }

        fn get(&self, field: &str) -> Result<Value, CoreError> {
            match field {
                "body" => Ok(self.body.clone().into()),
                _ => Err(CoreError::UnknownField {
                    entity: "Note".into(),
                    field: field.into(),
                }),
            }
        }

        fn set(&mut self, field: &str, value: Value) -> Result<(), CoreError> {
            match field {
                "body" => self.body = value.extract()?,
                _ => {
                    return Err(CoreError::UnknownField {
                        entity: "Note".into(),
                        field: field.into(),
                    });
                }
            }
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct NoteCopy {
        id: Option<i64>,
    }

    impl Entity for NoteCopy {
        fn describe() -> TableDescription {
            TableDescription::new().table("Notes")
        }

        fn id(&self) -> Option<i64> {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = Some(id);
        }

        fn get(&self, field: &str) -> Result<Value, CoreError> {
            Err(CoreError::UnknownField {
                entity: "NoteCopy".into(),
                field: field.into(),
            })
        }

        fn set(&mut self, field: &str, _value: Value) -> Result<(), CoreError> {
            Err(CoreError::UnknownField {
                entity: "NoteCopy".into(),
                field: field.into(),
            })
        }
    }

    #[test]
    fn transient_models_are_only_equal_to_themselves() {
        let a = Model::new(Note::default());
        let b = Model::new(Note::default());
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn persisted_models_compare_by_key_and_table() {
        let a = Model::new(Note {
            id: Some(7),
            body: "one".into(),
        });
        let b = Model::new(Note {
            id: Some(7),
            body: "two".into(),
        });
        let c = Model::new(Note {
            id: Some(8),
            body: "one".into(),
        });
        assert_eq!(a, b);
        assert_ne!(a, c);

        let same_table = Model::new(NoteCopy { id: Some(7) });
        assert!(a == same_table);
    }

    #[test]
    fn display_renders_table_and_key() {
        let a = Model::new(Note::default());
        assert_eq!(a.to_string(), "Notes@null");
        a.write().set_id(3);
        assert_eq!(a.to_string(), "Notes@3");
    }

    #[test]
    fn erased_handle_downcasts_back() {
        let a = Model::new(Note {
            id: Some(1),
            body: "x".into(),
        });
        let erased = a.erased();
        assert_eq!(erased.primary_key(), Some(1));
        assert_eq!(erased.entity_type(), EntityType::of::<Note>());
        let back: Model<Note> = Model::from_erased(erased.clone()).unwrap();
        assert!(back.ptr_eq(&a));
        assert!(Model::<NoteCopy>::from_erased(erased).is_none());
    }

    #[test]
    fn entity_type_short_name() {
        assert_eq!(EntityType::of::<Note>().name(), "Note");
        assert_eq!(EntityType::of::<Note>().table_name(), "Notes");
    }

    #[test]
    fn erased_field_access() {
        let erased = EntityType::of::<Note>().instantiate();
        erased.write_field("body", Value::Text("hi".into())).unwrap();
        assert_eq!(erased.read_field("body").unwrap(), Value::Text("hi".into()));
        assert!(erased.read_field("missing").is_err());
        erased.assign_primary_key(4);
        assert_eq!(erased.primary_key(), Some(4));
    }
}
