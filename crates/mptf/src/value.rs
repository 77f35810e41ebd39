//! value representation
//!
//! Output model of evaluated expressions, used to print results as YAML or JSON. It contains
//! - null
//! - boolean (true/false)
//! - integer (signed, i64)
//! - decimal (f64)
//! - string (utf-8)
//! - array ("list" of values)
//! - object (order-preserving "map"/"dictionary", where the key is of type string)
//!
//! Integers outside of the i64 range become decimals.
use serde::{
    ser::{SerializeMap, SerializeSeq},
    Serializer,
};

/// All possible value types
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    String(String),
    Array(Vec<Value>),
    Object(indexmap::IndexMap<String, Value>),
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<hcl::Number> for Value {
    fn from(value: hcl::Number) -> Self {
        if let Some(int) = value.as_i64() {
            return Value::Integer(int);
        }

        value.as_f64().map(Value::Decimal).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

impl<K: ToString, V: Into<Value>> From<hcl::value::Map<K, V>> for Value {
    fn from(value: hcl::value::Map<K, V>) -> Self {
        Value::Object(
            value
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.into()))
                .collect(),
        )
    }
}

impl From<hcl::Value> for Value {
    fn from(value: hcl::Value) -> Value {
        match value {
            hcl::Value::Null => Value::Null,
            hcl::Value::Bool(b) => b.into(),
            hcl::Value::Number(n) => n.into(),
            hcl::Value::String(s) => s.into(),
            hcl::Value::Array(a) => a.into(),
            hcl::Value::Object(o) => o.into(),
        }
    }
}

impl serde::ser::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Boolean(value) => serializer.serialize_bool(*value),
            Value::Integer(value) => serializer.serialize_i64(*value),
            Value::Decimal(value) => serializer.serialize_f64(*value),
            Value::String(value) => serializer.serialize_str(value),
            Value::Array(value) => {
                let mut ser = serializer.serialize_seq(Some(value.len()))?;
                for element in value {
                    ser.serialize_element(element)?;
                }
                ser.end()
            }
            Value::Object(value) => {
                let mut ser = serializer.serialize_map(Some(value.len()))?;
                for (element_key, element_value) in value {
                    ser.serialize_entry(element_key, element_value)?;
                }
                ser.end()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn from_hcl_value() {
        let value = hcl::Value::Object(
            [
                ("name", hcl::Value::from("x")),
                ("count", hcl::Value::from(2u64)),
                ("ratio", hcl::Value::from(0.5)),
                ("enabled", hcl::Value::from(true)),
                ("nothing", hcl::Value::Null),
                ("tags", hcl::Value::from(vec!["a", "b"])),
            ]
            .into_iter()
            .map(|(key, value)| (key.to_owned(), value))
            .collect(),
        );

        let Value::Object(object) = Value::from(value) else {
            panic!("must be an object");
        };
        assert_eq!(object["name"], Value::from("x"));
        assert_eq!(object["count"], Value::Integer(2));
        assert_eq!(object["ratio"], Value::Decimal(0.5));
        assert_eq!(object["enabled"], Value::Boolean(true));
        assert_eq!(object["nothing"], Value::Null);
        assert_eq!(object["tags"], Value::from(vec!["a", "b"]));
    }

    #[test]
    fn serializes_in_order() {
        let value = Value::Object(
            [
                ("b".to_owned(), Value::Integer(1)),
                ("a".to_owned(), Value::Null),
            ]
            .into_iter()
            .collect(),
        );

        assert_eq!(serde_json::to_string(&value).unwrap(), r#"{"b":1,"a":null}"#);
        assert_eq!(serde_yaml::to_string(&value).unwrap(), "b: 1\na: null\n");
    }
}
