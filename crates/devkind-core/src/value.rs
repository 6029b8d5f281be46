//! Runtime values flowing through queries and actions.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Call-time parameters of a query or action.
pub type Params = BTreeMap<String, Value>;

/// One extracted result of a query.
pub type Record = BTreeMap<String, Value>;

/// Persisted configuration of a device instance (credentials, tokens, form fields).
pub type DeviceState = serde_json::Map<String, serde_json::Value>;

/// Typed value produced by casting or supplied by callers.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    Currency {
        value: f64,
        unit: String,
    },
    Entity {
        value: String,
        display: Option<String>,
    },
    Location {
        lat: f64,
        lon: f64,
        display: Option<String>,
    },
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn entity(value: impl Into<String>) -> Self {
        Value::Entity {
            value: value.into(),
            display: None,
        }
    }

    pub fn currency(value: f64, unit: impl Into<String>) -> Self {
        Value::Currency {
            value,
            unit: unit.into(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Currency { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Entity { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Plain JSON rendering, used for request bodies and CLI output.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => json!(b),
            Value::Number(n) => json!(n),
            Value::String(s) => json!(s),
            Value::Date(d) => json!(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Value::Currency { value, unit } => json!({ "value": value, "unit": unit }),
            Value::Entity { value, display } => json!({ "value": value, "display": display }),
            Value::Location { lat, lon, display } => {
                json!({ "lat": lat, "lon": lon, "display": display })
            }
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

/// Convert a JSON object into call parameters.
pub fn params_from_json(json: serde_json::Value) -> Params {
    match json {
        serde_json::Value::Object(map) => map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
        _ => Params::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_from_json_object() {
        let value = Value::from(serde_json::json!({"a": 1, "b": [true, null]}));
        let Value::Object(map) = value else {
            panic!("expected object");
        };
        assert_eq!(map["a"], Value::Number(1.0));
        assert_eq!(
            map["b"],
            Value::Array(vec![Value::Boolean(true), Value::Null])
        );
    }

    #[test]
    fn test_date_to_json_uses_millis() {
        let date = Utc.with_ymd_and_hms(2018, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(
            Value::Date(date).to_json(),
            serde_json::json!("2018-01-01T10:00:00.000Z")
        );
    }

    #[test]
    fn test_currency_to_json() {
        assert_eq!(
            Value::currency(12.5, "eur").to_json(),
            serde_json::json!({"value": 12.5, "unit": "eur"})
        );
    }
}
