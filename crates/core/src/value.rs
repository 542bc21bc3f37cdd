use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, Model, Persisted};
use crate::error::CoreError;

/// A value as the store holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlKind {
    Null,
    Integer,
    Real,
    Text,
    Blob,
}

impl SqlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Blob => "blob",
        }
    }
}

impl fmt::Display for SqlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a.total_cmp(b).is_eq(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for SqlValue {}

impl SqlValue {
    pub fn kind(&self) -> SqlKind {
        match self {
            Self::Null => SqlKind::Null,
            Self::Integer(_) => SqlKind::Integer,
            Self::Real(_) => SqlKind::Real,
            Self::Text(_) => SqlKind::Text,
            Self::Blob(_) => SqlKind::Blob,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(n) => Some(*n),
            Self::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Real(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

macro_rules! sql_integer_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(value: $ty) -> Self {
                    Self::Integer(value as i64)
                }
            }
        )*
    };
}

sql_integer_from!(i8, i16, i32, i64, u8, u16, u32);

// Booleans bind as the same 1/0 integers the codec stores.
impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f32> for SqlValue {
    fn from(value: f32) -> Self {
        Self::Real(f64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<char> for SqlValue {
    fn from(value: char) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl From<&[u8]> for SqlValue {
    fn from(value: &[u8]) -> Self {
        Self::Blob(value.to_vec())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Ordered column/value pairs written by a single insert or update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowImage {
    entries: Vec<(String, SqlValue)>,
}

impl RowImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `column`, replacing an earlier value for the same column in place.
    pub fn put(&mut self, column: impl Into<String>, value: SqlValue) {
        let column = column.into();
        match self.entries.iter_mut().find(|(c, _)| *c == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.entries
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, column: &str) -> Option<SqlValue> {
        let pos = self.entries.iter().position(|(c, _)| c == column)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &SqlValue> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.entries.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A field value as the entity sees it, before storage coercion.
#[derive(Clone)]
pub enum Value {
    Null,
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Char(char),
    Text(String),
    Blob(Vec<u8>),
    /// Enumerated value carried by its symbolic name.
    Enum(String),
    Reference(Arc<dyn Persisted>),
    Custom(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn reference<T: Entity>(model: &Model<T>) -> Self {
        Self::Reference(model.erased())
    }

    pub fn custom<T: Any + Send + Sync>(value: T) -> Self {
        Self::Custom(Arc::new(value))
    }

    pub fn enumeration(name: impl Into<String>) -> Self {
        Self::Enum(name.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::I8(_) => "i8",
            Self::I16(_) => "i16",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Bool(_) => "bool",
            Self::Char(_) => "char",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::Enum(_) => "enum",
            Self::Reference(_) => "reference",
            Self::Custom(_) => "custom",
        }
    }

    /// Widens any integer variant to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I8(n) => Some(i64::from(*n)),
            Self::I16(n) => Some(i64::from(*n)),
            Self::I32(n) => Some(i64::from(*n)),
            Self::I64(n) => Some(*n),
            _ => None,
        }
    }

    pub fn extract<T: FromValue>(self) -> Result<T, CoreError> {
        T::from_value(self)
    }

    pub fn extract_custom<T: Any + Clone>(self) -> Result<T, CoreError> {
        match self {
            Self::Custom(inner) => inner.downcast_ref::<T>().cloned().ok_or(CoreError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: "custom",
            }),
            other => Err(CoreError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: other.kind_name(),
            }),
        }
    }

    pub fn extract_custom_opt<T: Any + Clone>(self) -> Result<Option<T>, CoreError> {
        match self {
            Self::Null => Ok(None),
            other => other.extract_custom().map(Some),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::I8(a), Self::I8(b)) => a == b,
            (Self::I16(a), Self::I16(b)) => a == b,
            (Self::I32(a), Self::I32(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            (Self::F32(a), Self::F32(b)) => a.total_cmp(b).is_eq(),
            (Self::F64(a), Self::F64(b)) => a.total_cmp(b).is_eq(),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            (Self::Enum(a), Self::Enum(b)) => a == b,
            (Self::Reference(a), Self::Reference(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                match (a.primary_key(), b.primary_key()) {
                    (Some(x), Some(y)) => x == y && a.entity_type().table_name() == b.entity_type().table_name(),
                    _ => false,
                }
            }
            (Self::Custom(a), Self::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::I8(n) => write!(f, "I8({n})"),
            Self::I16(n) => write!(f, "I16({n})"),
            Self::I32(n) => write!(f, "I32({n})"),
            Self::I64(n) => write!(f, "I64({n})"),
            Self::F32(n) => write!(f, "F32({n})"),
            Self::F64(n) => write!(f, "F64({n})"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Char(c) => write!(f, "Char({c:?})"),
            Self::Text(s) => write!(f, "Text({s:?})"),
            Self::Blob(b) => write!(f, "Blob({} bytes)", b.len()),
            Self::Enum(name) => write!(f, "Enum({name})"),
            Self::Reference(r) => match r.primary_key() {
                Some(id) => write!(f, "Reference({}@{id})", r.entity_type().name()),
                None => write!(f, "Reference({}@null)", r.entity_type().name()),
            },
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

value_from!(
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    bool => Bool,
    char => Char,
    String => Text,
    Vec<u8> => Blob,
);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl<T: Entity> From<&Model<T>> for Value {
    fn from(value: &Model<T>) -> Self {
        Self::reference(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Conversion out of a decoded [`Value`] into an entity field.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, CoreError>;
}

fn mismatch(expected: &'static str, value: &Value) -> CoreError {
    CoreError::TypeMismatch {
        expected,
        actual: value.kind_name(),
    }
}

macro_rules! integer_from_value {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, CoreError> {
                    let n = value.as_i64().ok_or_else(|| mismatch(stringify!($ty), &value))?;
                    <$ty>::try_from(n).map_err(|_| CoreError::OutOfRange {
                        target: stringify!($ty),
                        value: n,
                    })
                }
            }
        )*
    };
}

integer_from_value!(i8, i16, i32, i64);

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::F32(n) => Ok(n),
            Value::F64(n) => Ok(n as f32),
            other => Err(mismatch("f32", &other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::F64(n) => Ok(n),
            Value::F32(n) => Ok(f64::from(n)),
            other => Err(mismatch("f64", &other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl FromValue for char {
    fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Char(c) => Ok(c),
            other => Err(mismatch("char", &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Text(s) | Value::Enum(s) => Ok(s),
            other => Err(mismatch("text", &other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Blob(b) => Ok(b),
            other => Err(mismatch("blob", &other)),
        }
    }
}

impl<T: Entity> FromValue for Model<T> {
    fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Reference(handle) => Model::from_erased(handle).ok_or(CoreError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: "reference",
            }),
            other => Err(mismatch("reference", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_binds_as_integer() {
        assert_eq!(SqlValue::from(true), SqlValue::Integer(1));
        assert_eq!(SqlValue::from(false), SqlValue::Integer(0));
    }

    #[test]
    fn option_maps_none_to_null() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some(5i32)), Value::I32(5));
    }

    #[test]
    fn integer_extract_checks_range() {
        assert_eq!(Value::I64(12).extract::<i8>().unwrap(), 12);
        assert!(matches!(
            Value::I64(300).extract::<i8>(),
            Err(CoreError::OutOfRange { target: "i8", value: 300 })
        ));
        assert!(Value::Text("x".into()).extract::<i32>().is_err());
    }

    #[test]
    fn string_accepts_enum_names() {
        assert_eq!(Value::Enum("Red".into()).extract::<String>().unwrap(), "Red");
        assert_eq!(Value::Null.extract::<Option<String>>().unwrap(), None);
    }

    #[test]
    fn custom_values_downcast() {
        let value = Value::custom(42u64);
        assert_eq!(value.clone().extract_custom::<u64>().unwrap(), 42);
        assert!(value.extract_custom::<String>().is_err());
        assert_eq!(Value::Null.extract_custom_opt::<u64>().unwrap(), None);
    }

    #[test]
    fn row_image_replaces_in_place() {
        let mut row = RowImage::new();
        row.put("Id", SqlValue::Null);
        row.put("name", "a".into());
        row.put("Id", SqlValue::Integer(3));
        let columns: Vec<&str> = row.columns().collect();
        assert_eq!(columns, vec!["Id", "name"]);
        assert_eq!(row.get("Id"), Some(&SqlValue::Integer(3)));
        assert_eq!(row.remove("name"), Some(SqlValue::Text("a".into())));
        assert_eq!(row.len(), 1);
    }

    #[test]
    fn real_comparison_is_total() {
        assert_eq!(SqlValue::Real(f64::NAN), SqlValue::Real(f64::NAN));
        assert_ne!(SqlValue::Real(0.0), SqlValue::Integer(0));
    }
}
