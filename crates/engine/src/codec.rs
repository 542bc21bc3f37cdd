use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use rowbind_core::{CoreError, EntityType, FieldDescriptor, FieldKind, Persisted, SqlKind, SqlValue, Value};

use crate::error::EngineError;
use crate::serializer::{PathSerializer, TimestampSerializer, UuidSerializer};

/// Converts values of a custom field type to and from one storage class.
pub trait TypeSerializer: Send + Sync {
    /// Storage class `serialize` is expected to produce.
    fn serialized_kind(&self) -> SqlKind;

    fn serialize(&self, value: &Value) -> Result<SqlValue, EngineError>;

    fn deserialize(&self, stored: SqlValue) -> Result<Value, EngineError>;
}

/// Finds the live instance behind an entity-reference column.
pub trait ReferenceResolver {
    fn resolve(&self, target: &EntityType, id: i64) -> Result<Option<Arc<dyn Persisted>>, EngineError>;
}

fn kind_label(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::I8 => "i8",
        FieldKind::I16 => "i16",
        FieldKind::I32 => "i32",
        FieldKind::I64 => "i64",
        FieldKind::F32 => "f32",
        FieldKind::F64 => "f64",
        FieldKind::Bool => "bool",
        FieldKind::Char => "char",
        FieldKind::Text => "text",
        FieldKind::Blob => "blob",
        FieldKind::Enum => "enum",
        FieldKind::Reference(_) => "reference",
        FieldKind::Custom(_) => "custom",
    }
}

fn integer_bounds(kind: &FieldKind) -> (i64, i64) {
    match kind {
        FieldKind::I8 => (i64::from(i8::MIN), i64::from(i8::MAX)),
        FieldKind::I16 => (i64::from(i16::MIN), i64::from(i16::MAX)),
        FieldKind::I32 => (i64::from(i32::MIN), i64::from(i32::MAX)),
        _ => (i64::MIN, i64::MAX),
    }
}

#[derive(Clone, Default)]
pub struct ValueCodec {
    serializers: HashMap<&'static str, Arc<dyn TypeSerializer>>,
}

impl ValueCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec with the stock `uuid`, `path` and `timestamp` serializers.
    pub fn with_defaults() -> Self {
        let mut codec = Self::new();
        codec.register("uuid", UuidSerializer);
        codec.register("path", PathSerializer);
        codec.register("timestamp", TimestampSerializer);
        codec
    }

    pub fn register(&mut self, name: &'static str, serializer: impl TypeSerializer + 'static) {
        self.serializers.insert(name, Arc::new(serializer));
    }

    pub fn serializer(&self, name: &str) -> Option<&Arc<dyn TypeSerializer>> {
        self.serializers.get(name)
    }

    fn serializer_for(&self, name: &str) -> Result<&Arc<dyn TypeSerializer>, EngineError> {
        self.serializer(name)
            .ok_or_else(|| EngineError::UnknownSerializer(name.to_string()))
    }

    pub fn encode(&self, field: &FieldDescriptor, value: Value) -> Result<SqlValue, EngineError> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }

        let stored = match (&field.kind, value) {
            (FieldKind::Custom(name), value) => {
                let serializer = self.serializer_for(name)?;
                let stored = serializer.serialize(&value)?;
                let expected = serializer.serialized_kind();
                if !stored.is_null() && stored.kind() != expected {
                    warn!(
                        field = %field.name,
                        serializer = name,
                        expected = %expected,
                        actual = %stored.kind(),
                        "serializer returned an unexpected storage class"
                    );
                }
                stored
            }
            (FieldKind::I8 | FieldKind::I16 | FieldKind::I32 | FieldKind::I64, value) => {
                let n = value.as_i64().ok_or_else(|| mismatch(field, &value))?;
                SqlValue::Integer(self.check_width(field, n)?)
            }
            (FieldKind::F32 | FieldKind::F64, Value::F32(n)) => SqlValue::Real(f64::from(n)),
            (FieldKind::F32 | FieldKind::F64, Value::F64(n)) => SqlValue::Real(n),
            (FieldKind::Bool, Value::Bool(b)) => SqlValue::Integer(i64::from(b)),
            (FieldKind::Char, Value::Char(c)) => SqlValue::Text(c.to_string()),
            (FieldKind::Text, Value::Text(s)) => SqlValue::Text(s),
            (FieldKind::Blob, Value::Blob(b)) => SqlValue::Blob(b),
            (FieldKind::Enum, Value::Enum(name) | Value::Text(name)) => SqlValue::Text(name),
            (FieldKind::Reference(target), Value::Reference(handle)) => {
                let actual = handle.entity_type();
                if actual != *target {
                    return Err(CoreError::TypeMismatch {
                        expected: target.name(),
                        actual: actual.name(),
                    }
                    .into());
                }
                SqlValue::from(handle.primary_key())
            }
            (_, value) => return Err(mismatch(field, &value)),
        };
        Ok(stored)
    }

    pub fn decode(
        &self,
        field: &FieldDescriptor,
        stored: SqlValue,
        resolver: &dyn ReferenceResolver,
    ) -> Result<Value, EngineError> {
        if stored.is_null() {
            return Ok(Value::Null);
        }

        let value = match (&field.kind, stored) {
            (FieldKind::Custom(name), stored) => self.serializer_for(name)?.deserialize(stored)?,
            (FieldKind::I8, SqlValue::Integer(n)) => Value::I8(self.check_width(field, n)? as i8),
            (FieldKind::I16, SqlValue::Integer(n)) => Value::I16(self.check_width(field, n)? as i16),
            (FieldKind::I32, SqlValue::Integer(n)) => Value::I32(self.check_width(field, n)? as i32),
            (FieldKind::I64, SqlValue::Integer(n)) => Value::I64(n),
            (FieldKind::F32, SqlValue::Real(n)) => Value::F32(n as f32),
            (FieldKind::F32, SqlValue::Integer(n)) => Value::F32(n as f32),
            (FieldKind::F64, SqlValue::Real(n)) => Value::F64(n),
            (FieldKind::F64, SqlValue::Integer(n)) => Value::F64(n as f64),
            (FieldKind::Bool, SqlValue::Integer(n)) => Value::Bool(n != 0),
            (FieldKind::Char, SqlValue::Text(s)) => match s.chars().next() {
                Some(c) => Value::Char(c),
                None => {
                    return Err(EngineError::Coercion {
                        field: field.name.clone(),
                        value: "''".into(),
                        reason: "empty text for a char field".into(),
                    });
                }
            },
            (FieldKind::Text, SqlValue::Text(s)) => Value::Text(s),
            (FieldKind::Text, SqlValue::Integer(n)) => Value::Text(n.to_string()),
            (FieldKind::Text, SqlValue::Real(n)) => Value::Text(n.to_string()),
            (FieldKind::Blob, SqlValue::Blob(b)) => Value::Blob(b),
            (FieldKind::Blob, SqlValue::Text(s)) => Value::Blob(s.into_bytes()),
            (FieldKind::Enum, SqlValue::Text(name)) => Value::Enum(name),
            (FieldKind::Reference(target), SqlValue::Integer(id)) => {
                match resolver.resolve(target, id)? {
                    Some(handle) => Value::Reference(handle),
                    None => Value::Null,
                }
            }
            (kind, stored) => {
                return Err(CoreError::TypeMismatch {
                    expected: kind_label(kind),
                    actual: stored.kind().as_str(),
                }
                .into());
            }
        };
        Ok(value)
    }

    fn check_width(&self, field: &FieldDescriptor, n: i64) -> Result<i64, EngineError> {
        let (min, max) = integer_bounds(&field.kind);
        if n < min || n > max {
            return Err(EngineError::Coercion {
                field: field.name.clone(),
                value: n.to_string(),
                reason: format!("outside the range of {}", kind_label(&field.kind)),
            });
        }
        Ok(n)
    }
}

fn mismatch(field: &FieldDescriptor, value: &Value) -> EngineError {
    CoreError::TypeMismatch {
        expected: kind_label(&field.kind),
        actual: value.kind_name(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowbind_core::{ColumnDescription, CoreError, Entity, Model, TableDescription};

    #[derive(Debug, Default)]
    struct Owner {
        id: Option<i64>,
    }

    impl Entity for Owner {
        fn describe() -> TableDescription {
            TableDescription::new().table("Owners")
        }

        fn id(&self) -> Option<i64> {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = Some(id);
        }

        fn get(&self, field: &str) -> Result<Value, CoreError> {
            Err(CoreError::UnknownField {
                entity: "Owner".into(),
                field: field.into(),
            })
        }

        fn set(&mut self, field: &str, _value: Value) -> Result<(), CoreError> {
            Err(CoreError::UnknownField {
                entity: "Owner".into(),
                field: field.into(),
            })
        }
    }

    struct Fixed(Model<Owner>);

    impl ReferenceResolver for Fixed {
        fn resolve(&self, _target: &EntityType, id: i64) -> Result<Option<Arc<dyn Persisted>>, EngineError> {
            Ok((self.0.id() == Some(id)).then(|| self.0.erased()))
        }
    }

    fn field(kind: FieldKind) -> FieldDescriptor {
        FieldDescriptor {
            name: "value".into(),
            column: "value".into(),
            kind,
            primary_key: false,
            not_null: false,
            unique: None,
        }
    }

    fn nobody() -> Fixed {
        Fixed(Model::new(Owner { id: Some(1) }))
    }

    fn roundtrip(kind: FieldKind, value: Value) -> (SqlValue, Value) {
        let codec = ValueCodec::with_defaults();
        let f = field(kind);
        let stored = codec.encode(&f, value).unwrap();
        let back = codec.decode(&f, stored.clone(), &nobody()).unwrap();
        (stored, back)
    }

    #[test]
    fn builtin_coercions() {
        assert_eq!(roundtrip(FieldKind::I8, Value::I8(-7)), (SqlValue::Integer(-7), Value::I8(-7)));
        assert_eq!(
            roundtrip(FieldKind::I16, Value::I16(1200)),
            (SqlValue::Integer(1200), Value::I16(1200))
        );
        assert_eq!(
            roundtrip(FieldKind::I64, Value::I64(i64::MAX)),
            (SqlValue::Integer(i64::MAX), Value::I64(i64::MAX))
        );
        assert_eq!(roundtrip(FieldKind::F32, Value::F32(1.5)), (SqlValue::Real(1.5), Value::F32(1.5)));
        assert_eq!(roundtrip(FieldKind::Bool, Value::Bool(true)), (SqlValue::Integer(1), Value::Bool(true)));
        assert_eq!(
            roundtrip(FieldKind::Char, Value::Char('λ')),
            (SqlValue::Text("λ".into()), Value::Char('λ'))
        );
        assert_eq!(
            roundtrip(FieldKind::Enum, Value::Enum("Active".into())),
            (SqlValue::Text("Active".into()), Value::Enum("Active".into()))
        );
        assert_eq!(
            roundtrip(FieldKind::Blob, Value::Blob(vec![9, 0, 9])),
            (SqlValue::Blob(vec![9, 0, 9]), Value::Blob(vec![9, 0, 9]))
        );
    }

    #[test]
    fn null_encodes_to_null() {
        let codec = ValueCodec::new();
        assert_eq!(codec.encode(&field(FieldKind::I32), Value::Null).unwrap(), SqlValue::Null);
    }

    #[test]
    fn narrow_integers_are_range_checked() {
        let codec = ValueCodec::new();
        assert!(matches!(
            codec.encode(&field(FieldKind::I8), Value::I32(400)),
            Err(EngineError::Coercion { .. })
        ));
        assert!(matches!(
            codec.decode(&field(FieldKind::I16), SqlValue::Integer(70_000), &nobody()),
            Err(EngineError::Coercion { .. })
        ));
    }

    #[test]
    fn any_nonzero_integer_decodes_as_true() {
        let codec = ValueCodec::new();
        assert_eq!(
            codec.decode(&field(FieldKind::Bool), SqlValue::Integer(5), &nobody()).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn mismatched_values_are_rejected() {
        let codec = ValueCodec::new();
        assert!(codec.encode(&field(FieldKind::Text), Value::I32(1)).is_err());
        assert!(codec.decode(&field(FieldKind::Blob), SqlValue::Integer(1), &nobody()).is_err());
    }

    #[test]
    fn references_store_the_primary_key() {
        let codec = ValueCodec::new();
        let resolver = nobody();
        let f = field(FieldKind::Reference(EntityType::of::<Owner>()));

        let stored = codec.encode(&f, Value::reference(&resolver.0)).unwrap();
        assert_eq!(stored, SqlValue::Integer(1));

        match codec.decode(&f, stored, &resolver).unwrap() {
            Value::Reference(handle) => assert!(Arc::ptr_eq(&handle, &resolver.0.erased())),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(codec.decode(&f, SqlValue::Integer(99), &resolver).unwrap(), Value::Null);
    }

    #[test]
    fn unsaved_reference_encodes_null() {
        let codec = ValueCodec::new();
        let f = field(FieldKind::Reference(EntityType::of::<Owner>()));
        let unsaved = Model::new(Owner::default());
        assert_eq!(codec.encode(&f, Value::reference(&unsaved)).unwrap(), SqlValue::Null);
    }

    struct Lying;

    impl TypeSerializer for Lying {
        fn serialized_kind(&self) -> SqlKind {
            SqlKind::Integer
        }

        fn serialize(&self, value: &Value) -> Result<SqlValue, EngineError> {
            Ok(SqlValue::Text(format!("{value:?}")))
        }

        fn deserialize(&self, stored: SqlValue) -> Result<Value, EngineError> {
            Ok(Value::Text(stored.to_string()))
        }
    }

    #[test]
    fn serializer_kind_mismatch_keeps_actual_value() {
        let mut codec = ValueCodec::new();
        codec.register("lying", Lying);
        let stored = codec.encode(&field(FieldKind::Custom("lying")), Value::I32(3)).unwrap();
        assert_eq!(stored, SqlValue::Text("I32(3)".into()));
    }

    #[test]
    fn unknown_serializer_is_an_error() {
        let codec = ValueCodec::new();
        assert!(matches!(
            codec.encode(&field(FieldKind::Custom("missing")), Value::I32(3)),
            Err(EngineError::UnknownSerializer(_))
        ));
    }

    #[test]
    fn column_descriptions_feed_the_codec() {
        let description = TableDescription::new().column(ColumnDescription::new("flag", FieldKind::Bool));
        let schema = rowbind_core::Schema::derive("Flagged", &description).unwrap();
        let codec = ValueCodec::new();
        let flag = schema.field("flag").unwrap();
        assert_eq!(codec.encode(flag, Value::Bool(false)).unwrap(), SqlValue::Integer(0));
    }
}
