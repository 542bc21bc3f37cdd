use std::any::Any;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use rowbind_core::{SqlKind, SqlValue, Value};

use crate::codec::TypeSerializer;
use crate::error::EngineError;

fn failed(name: &str, reason: impl ToString) -> EngineError {
    EngineError::Serializer {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn custom<T: Any + Clone>(name: &str, value: &Value) -> Result<T, EngineError> {
    value.clone().extract_custom::<T>().map_err(|e| failed(name, e))
}

fn stored_text<'a>(name: &str, stored: &'a SqlValue) -> Result<&'a str, EngineError> {
    stored
        .as_text()
        .ok_or_else(|| failed(name, format!("expected text, found {}", stored.kind())))
}

/// [`Uuid`] stored as its hyphenated text form.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidSerializer;

impl TypeSerializer for UuidSerializer {
    fn serialized_kind(&self) -> SqlKind {
        SqlKind::Text
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue, EngineError> {
        Ok(SqlValue::Text(custom::<Uuid>("uuid", value)?.to_string()))
    }

    fn deserialize(&self, stored: SqlValue) -> Result<Value, EngineError> {
        let uuid = Uuid::parse_str(stored_text("uuid", &stored)?).map_err(|e| failed("uuid", e))?;
        Ok(Value::custom(uuid))
    }
}

/// [`PathBuf`] stored as text. Paths that are not valid UTF-8 are rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathSerializer;

impl TypeSerializer for PathSerializer {
    fn serialized_kind(&self) -> SqlKind {
        SqlKind::Text
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue, EngineError> {
        let path = custom::<PathBuf>("path", value)?;
        let text = path
            .to_str()
            .ok_or_else(|| failed("path", "path is not valid UTF-8"))?;
        Ok(SqlValue::Text(text.to_string()))
    }

    fn deserialize(&self, stored: SqlValue) -> Result<Value, EngineError> {
        Ok(Value::custom(PathBuf::from(stored_text("path", &stored)?)))
    }
}

/// [`SystemTime`] stored as milliseconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampSerializer;

impl TypeSerializer for TimestampSerializer {
    fn serialized_kind(&self) -> SqlKind {
        SqlKind::Integer
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue, EngineError> {
        let time = custom::<SystemTime>("timestamp", value)?;
        let millis = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => i64::try_from(after.as_millis()).map_err(|e| failed("timestamp", e))?,
            Err(before) => {
                let before = i64::try_from(before.duration().as_millis()).map_err(|e| failed("timestamp", e))?;
                -before
            }
        };
        Ok(SqlValue::Integer(millis))
    }

    fn deserialize(&self, stored: SqlValue) -> Result<Value, EngineError> {
        let millis = stored
            .as_integer()
            .ok_or_else(|| failed("timestamp", format!("expected integer, found {}", stored.kind())))?;
        let offset = Duration::from_millis(millis.unsigned_abs());
        let time = if millis >= 0 {
            UNIX_EPOCH.checked_add(offset)
        } else {
            UNIX_EPOCH.checked_sub(offset)
        }
        .ok_or_else(|| failed("timestamp", "out of range"))?;
        Ok(Value::custom(time))
    }
}

/// Any serde type stored as a MessagePack blob.
pub struct MsgpackSerializer<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> MsgpackSerializer<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }
}

impl<T> TypeSerializer for MsgpackSerializer<T>
where
    T: Serialize + DeserializeOwned + Any + Clone + Send + Sync,
{
    fn serialized_kind(&self) -> SqlKind {
        SqlKind::Blob
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue, EngineError> {
        let inner = custom::<T>(self.name, value)?;
        let bytes = rmp_serde::to_vec_named(&inner).map_err(|e| failed(self.name, e))?;
        Ok(SqlValue::Blob(bytes))
    }

    fn deserialize(&self, stored: SqlValue) -> Result<Value, EngineError> {
        let bytes = stored
            .as_blob()
            .ok_or_else(|| failed(self.name, format!("expected blob, found {}", stored.kind())))?;
        let inner: T = rmp_serde::from_slice(bytes).map_err(|e| failed(self.name, e))?;
        Ok(Value::custom(inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn uuid_roundtrips_through_text() {
        let id = Uuid::now_v7();
        let stored = UuidSerializer.serialize(&Value::custom(id)).unwrap();
        assert_eq!(stored, SqlValue::Text(id.to_string()));
        let back = UuidSerializer.deserialize(stored).unwrap();
        assert_eq!(back.extract_custom::<Uuid>().unwrap(), id);
    }

    #[test]
    fn uuid_rejects_garbage() {
        assert!(matches!(
            UuidSerializer.deserialize(SqlValue::Text("not-a-uuid".into())),
            Err(EngineError::Serializer { .. })
        ));
        assert!(UuidSerializer.serialize(&Value::I32(1)).is_err());
    }

    #[test]
    fn path_roundtrips() {
        let path = PathBuf::from("/var/lib/rowbind/data.db");
        let stored = PathSerializer.serialize(&Value::custom(path.clone())).unwrap();
        assert_eq!(stored, SqlValue::Text("/var/lib/rowbind/data.db".into()));
        assert_eq!(
            PathSerializer.deserialize(stored).unwrap().extract_custom::<PathBuf>().unwrap(),
            path
        );
    }

    #[test]
    fn timestamps_keep_millisecond_precision() {
        let time = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let stored = TimestampSerializer.serialize(&Value::custom(time)).unwrap();
        assert_eq!(stored, SqlValue::Integer(1_700_000_000_123));
        let back: SystemTime = TimestampSerializer.deserialize(stored).unwrap().extract_custom().unwrap();
        assert_eq!(back, time);
    }

    #[test]
    fn timestamps_before_epoch() {
        let time = UNIX_EPOCH - Duration::from_millis(5_000);
        let stored = TimestampSerializer.serialize(&Value::custom(time)).unwrap();
        assert_eq!(stored, SqlValue::Integer(-5_000));
        let back: SystemTime = TimestampSerializer.deserialize(stored).unwrap().extract_custom().unwrap();
        assert_eq!(back, time);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Settings {
        theme: String,
        columns: Vec<u16>,
    }

    #[test]
    fn msgpack_roundtrips_structs() {
        let serializer = MsgpackSerializer::<Settings>::new("settings");
        let settings = Settings {
            theme: "dark".into(),
            columns: vec![80, 120],
        };
        let stored = serializer.serialize(&Value::custom(settings.clone())).unwrap();
        assert_eq!(stored.kind(), SqlKind::Blob);
        let back: Settings = serializer.deserialize(stored).unwrap().extract_custom().unwrap();
        assert_eq!(back, settings);
    }
}
