//! Structured values attached to spans as debug annotations

use std::collections::BTreeMap;

use crate::args::TypeRef;

/// A value the engine wants to show next to a span
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DebugValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// A symbolic name, rendered with a leading colon
    Symbol(String),
    List(Vec<DebugValue>),
    Map(BTreeMap<String, DebugValue>),
    /// An application object: its class name and an inspected representation
    Object { class_name: String, repr: String },
    /// A schema type; its name is interned by handle
    Type(TypeRef),
}

impl DebugValue {
    pub fn object(class_name: impl Into<String>, repr: impl Into<String>) -> Self {
        DebugValue::Object {
            class_name: class_name.into(),
            repr: repr.into(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DebugValue::Null)
    }
}

impl From<bool> for DebugValue {
    fn from(v: bool) -> Self {
        DebugValue::Bool(v)
    }
}

impl From<i64> for DebugValue {
    fn from(v: i64) -> Self {
        DebugValue::Int(v)
    }
}

impl From<i32> for DebugValue {
    fn from(v: i32) -> Self {
        DebugValue::Int(v.into())
    }
}

impl From<usize> for DebugValue {
    fn from(v: usize) -> Self {
        DebugValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for DebugValue {
    fn from(v: f64) -> Self {
        DebugValue::Float(v)
    }
}

impl From<&str> for DebugValue {
    fn from(v: &str) -> Self {
        DebugValue::String(v.to_string())
    }
}

impl From<String> for DebugValue {
    fn from(v: String) -> Self {
        DebugValue::String(v)
    }
}

impl<T: Into<DebugValue>> From<Vec<T>> for DebugValue {
    fn from(v: Vec<T>) -> Self {
        DebugValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<DebugValue>> From<Option<T>> for DebugValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(DebugValue::Null)
    }
}

impl From<serde_json::Value> for DebugValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => DebugValue::Null,
            serde_json::Value::Bool(b) => DebugValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => DebugValue::Int(i),
                None => DebugValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => DebugValue::String(s),
            serde_json::Value::Array(items) => {
                DebugValue::List(items.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(map) => {
                DebugValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        let value: DebugValue = serde_json::json!({
            "id": 7,
            "score": 1.5,
            "tags": ["a", null],
            "ok": true
        })
        .into();

        let DebugValue::Map(map) = value else {
            panic!("expected map");
        };
        assert_eq!(map["id"], DebugValue::Int(7));
        assert_eq!(map["score"], DebugValue::Float(1.5));
        assert_eq!(
            map["tags"],
            DebugValue::List(vec![DebugValue::from("a"), DebugValue::Null])
        );
        assert_eq!(map["ok"], DebugValue::Bool(true));
    }

    #[test]
    fn test_option_conversion() {
        assert!(DebugValue::from(None::<i64>).is_null());
        assert_eq!(DebugValue::from(Some(3)), DebugValue::Int(3));
    }
}
