//! Records yielded by queries and entity identifier extraction

use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;

/// Field holding an entity's identifier in DSIS records
pub const NATIVE_UID_FIELD: &str = "native_uid";

/// A record produced by a model cast
pub struct TypedRecord {
    model: String,
    raw: Value,
    value: Box<dyn Any + Send + Sync>,
}

impl TypedRecord {
    pub(crate) fn new(model: &str, raw: Value, value: Box<dyn Any + Send + Sync>) -> Self {
        Self {
            model: model.to_string(),
            raw,
            value,
        }
    }

    /// Name of the model the record was cast to
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The mapping the record was cast from
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Take the typed value; returns the record unchanged on a type mismatch
    pub fn into_inner<T: 'static>(self) -> Result<T, Self> {
        let Self { model, raw, value } = self;
        value
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|value| Self { model, raw, value })
    }
}

impl fmt::Debug for TypedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedRecord")
            .field("model", &self.model)
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}

/// A record yielded by a query
#[derive(Debug)]
pub enum Record {
    Raw(Value),
    Typed(TypedRecord),
}

impl Record {
    /// The underlying JSON mapping, for raw and typed records alike
    pub fn raw(&self) -> &Value {
        match self {
            Record::Raw(value) => value,
            Record::Typed(typed) => typed.raw(),
        }
    }

    pub fn is_typed(&self) -> bool {
        matches!(self, Record::Typed(_))
    }

    pub fn as_typed<T: 'static>(&self) -> Option<&T> {
        match self {
            Record::Typed(typed) => typed.downcast_ref::<T>(),
            Record::Raw(_) => None,
        }
    }

    pub fn into_raw(self) -> Value {
        match self {
            Record::Raw(value) => value,
            Record::Typed(typed) => typed.raw,
        }
    }
}

/// Anything that can name an entity by its native identifier
pub trait NativeUid {
    fn native_uid(&self) -> Option<String>;
}

impl NativeUid for str {
    fn native_uid(&self) -> Option<String> {
        let id = self.trim();
        (!id.is_empty()).then(|| id.to_string())
    }
}

impl NativeUid for String {
    fn native_uid(&self) -> Option<String> {
        self.as_str().native_uid()
    }
}

impl NativeUid for Map<String, Value> {
    fn native_uid(&self) -> Option<String> {
        match self.get(NATIVE_UID_FIELD)? {
            Value::String(id) => id.native_uid(),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

impl NativeUid for Value {
    fn native_uid(&self) -> Option<String> {
        match self {
            Value::Object(map) => map.native_uid(),
            Value::String(id) => id.native_uid(),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

impl NativeUid for TypedRecord {
    fn native_uid(&self) -> Option<String> {
        self.raw.native_uid()
    }
}

impl NativeUid for Record {
    fn native_uid(&self) -> Option<String> {
        self.raw().native_uid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_native_uid_shapes() {
        assert_eq!("46075".native_uid(), Some("46075".to_string()));
        assert_eq!(String::from(" 7 ").native_uid(), Some("7".to_string()));
        assert_eq!("".native_uid(), None);

        let record = json!({"native_uid": "abc", "name": "Well A"});
        assert_eq!(record.native_uid(), Some("abc".to_string()));
        assert_eq!(json!({"native_uid": 12}).native_uid(), Some("12".to_string()));
        assert_eq!(json!({"name": "no id"}).native_uid(), None);
        assert_eq!(json!(null).native_uid(), None);

        let map = record.as_object().unwrap();
        assert_eq!(map.native_uid(), Some("abc".to_string()));
    }

    #[test]
    fn test_record_accessors() {
        let typed = TypedRecord::new("Count", json!({"native_uid": "1"}), Box::new(5u32));
        assert_eq!(typed.downcast_ref::<u32>(), Some(&5));
        assert!(typed.downcast_ref::<String>().is_none());

        let record = Record::Typed(typed);
        assert!(record.is_typed());
        assert_eq!(record.as_typed::<u32>(), Some(&5));
        assert_eq!(record.native_uid(), Some("1".to_string()));
        assert_eq!(record.into_raw(), json!({"native_uid": "1"}));
    }

    #[test]
    fn test_into_inner_mismatch_keeps_record() {
        let typed = TypedRecord::new("Count", json!({}), Box::new(5u32));
        let typed = typed.into_inner::<String>().unwrap_err();
        assert_eq!(typed.into_inner::<u32>().unwrap(), 5);
    }
}
