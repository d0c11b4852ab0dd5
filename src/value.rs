//! Dynamic resource values and their timestamps.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value carried by a resource, a metadata entry or an action result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// Declared type of a resource.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Any,
    Boolean,
    Integer,
    Float,
    String,
    List,
    Map,
}

impl Value {
    /// Type tag of this value. `Null` reports [`ValueType::Any`].
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Any,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::List(_) => ValueType::List,
            Value::Map(_) => ValueType::Map,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Converts the value so it conforms to `expected`, returning `None` when
    /// no lossless conversion exists. Integers widen to floats; `Null` fits
    /// every type.
    pub fn coerce(self, expected: ValueType) -> Option<Value> {
        match (expected, self) {
            (_, Value::Null) => Some(Value::Null),
            (ValueType::Any, v) => Some(v),
            (ValueType::Float, Value::Integer(i)) => Some(Value::Float(i as f64)),
            (expected, v) if v.value_type() == expected => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            other => match serde_json::to_string(other) {
                Ok(json) => write!(f, "{}", json),
                Err(_) => write!(f, "{:?}", other),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

/// Immutable pair of an optional value and the instant it was observed.
///
/// A missing timestamp means the resource has never been set. Instances are
/// never mutated in place; updates replace the whole pair.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimedValue {
    value: Option<Value>,
    timestamp: Option<DateTime<Utc>>,
}

impl TimedValue {
    pub fn new(value: impl Into<Value>, timestamp: DateTime<Utc>) -> Self {
        Self {
            value: Some(value.into()),
            timestamp: Some(timestamp),
        }
    }

    /// A value that has never been set.
    pub fn unset() -> Self {
        Self::default()
    }

    /// Initial cache entry for a freshly created resource: the declared
    /// default, without a timestamp.
    pub fn initial(default: Option<Value>) -> Self {
        Self {
            value: default,
            timestamp: None,
        }
    }

    pub fn with_parts(value: Option<Value>, timestamp: Option<DateTime<Utc>>) -> Self {
        Self { value, timestamp }
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn is_set(&self) -> bool {
        self.timestamp.is_some()
    }

    pub fn into_value(self) -> Option<Value> {
        self.value
    }

    /// Fills a missing timestamp with `now`.
    pub fn stamped(self, now: DateTime<Utc>) -> Self {
        Self {
            value: self.value,
            timestamp: Some(self.timestamp.unwrap_or(now)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_coerce() {
        assert_eq!(
            Value::Integer(2).coerce(ValueType::Float),
            Some(Value::Float(2.0))
        );
        assert_eq!(Value::Null.coerce(ValueType::String), Some(Value::Null));
        assert_eq!(Value::from("x").coerce(ValueType::Integer), None);
        assert_eq!(
            Value::from("x").coerce(ValueType::Any),
            Some(Value::from("x"))
        );
    }

    #[test]
    fn test_value_type_parse() {
        assert_eq!("integer".parse::<ValueType>().ok(), Some(ValueType::Integer));
        assert_eq!(ValueType::Map.to_string(), "map");
    }

    #[test]
    fn test_timed_value_stamping() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let t1 = Utc.timestamp_opt(1_700_000_100, 0).unwrap();

        let unset = TimedValue::initial(Some(Value::Integer(0)));
        assert!(!unset.is_set());
        assert_eq!(unset.clone().stamped(t0).timestamp(), Some(t0));

        let set = TimedValue::new(5, t0);
        assert_eq!(set.stamped(t1).timestamp(), Some(t0));
    }

    #[test]
    fn test_value_json_shape() {
        let mut map = BTreeMap::new();
        map.insert("unit".to_string(), Value::from("°C"));
        let value = Value::List(vec![Value::Integer(1), Value::Map(map), Value::Null]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"[1,{"unit":"°C"},null]"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
