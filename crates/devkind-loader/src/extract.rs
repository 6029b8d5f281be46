//! Response extraction and type casting.
//!
//! A query response is narrowed by the function's `json_key`, normalized to a
//! list (a single object becomes a one-element list) and every output
//! argument is pulled from each element by its own key, then cast to its
//! declared type. Values that are absent or cannot be cast become
//! [`Value::Null`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use devkind_core::{FunctionSpec, LoaderError, LoaderResult, Record, TypeTag, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

static LIST_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*").expect("separator pattern is valid"));

static NUMERIC_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").expect("numeric pattern is valid")
});

/// Follow a dotted path; numeric segments index into arrays.
pub fn get_path<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            JsonValue::Object(map) => map.get(segment)?,
            JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Extract one record per result element.
pub fn extract_records(response: &JsonValue, spec: &FunctionSpec) -> LoaderResult<Vec<Record>> {
    let target = match &spec.json_key {
        Some(key) => get_path(response, key).ok_or_else(|| {
            LoaderError::Communication(format!("Response has no value at {}", key))
        })?,
        None => response,
    };

    Ok(match target {
        JsonValue::Array(items) => items.iter().map(|item| extract_one(item, spec)).collect(),
        single => vec![extract_one(single, spec)],
    })
}

/// Extract the output arguments of `spec` from one result element.
pub fn extract_one(item: &JsonValue, spec: &FunctionSpec) -> Record {
    spec.output_args()
        .map(|arg| {
            let raw = get_path(item, arg.key());
            (arg.name.clone(), cast(raw, &arg.type_tag))
        })
        .collect()
}

/// Cast a raw JSON value to a declared type.
pub fn cast(raw: Option<&JsonValue>, type_tag: &TypeTag) -> Value {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return Value::Null;
    };

    match type_tag {
        TypeTag::Array(elem) => match raw {
            JsonValue::String(s) => Value::Array(
                LIST_SEPARATOR
                    .split(s)
                    .map(|part| cast(Some(&JsonValue::String(part.to_string())), elem))
                    .collect(),
            ),
            JsonValue::Array(items) => {
                Value::Array(items.iter().map(|item| cast(Some(item), elem)).collect())
            }
            other => Value::Array(vec![cast(Some(other), elem)]),
        },
        TypeTag::Date => parse_date(raw).map(Value::Date).unwrap_or(Value::Null),
        TypeTag::Number | TypeTag::Measure(_) => match raw {
            JsonValue::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            JsonValue::String(s) => parse_float(s).map(Value::Number).unwrap_or(Value::Null),
            _ => Value::Null,
        },
        TypeTag::Currency => cast_currency(raw),
        TypeTag::Entity(_) => match raw {
            JsonValue::String(s) => Value::entity(s.clone()),
            JsonValue::Number(n) => Value::entity(n.to_string()),
            JsonValue::Object(map) => match map.get("value").and_then(scalar_string) {
                Some(value) => Value::Entity {
                    value,
                    display: map.get("display").and_then(scalar_string),
                },
                None => Value::Null,
            },
            _ => Value::Null,
        },
        TypeTag::Location => cast_location(raw),
        TypeTag::String | TypeTag::Enum(_) => match raw {
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Number(_) | JsonValue::Bool(_) => Value::String(raw.to_string()),
            other => Value::from(other.clone()),
        },
        TypeTag::Boolean => match raw {
            JsonValue::Bool(b) => Value::Boolean(*b),
            JsonValue::String(s) => match s.trim() {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                _ => Value::Null,
            },
            JsonValue::Number(n) => Value::Boolean(n.as_f64().is_some_and(|n| n != 0.0)),
            _ => Value::Null,
        },
        TypeTag::Any => Value::from(raw.clone()),
    }
}

fn scalar_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_of(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => parse_float(s),
        _ => None,
    }
}

fn cast_currency(raw: &JsonValue) -> Value {
    match raw {
        JsonValue::Object(map) => {
            let Some(value) = map.get("value").and_then(number_of) else {
                return Value::Null;
            };
            let unit = map
                .get("unit")
                .and_then(JsonValue::as_str)
                .unwrap_or("usd");
            Value::currency(value, unit)
        }
        other => number_of(other)
            .map(|value| Value::currency(value, "usd"))
            .unwrap_or(Value::Null),
    }
}

fn cast_location(raw: &JsonValue) -> Value {
    let JsonValue::Object(map) = raw else {
        return Value::Null;
    };
    let pair = |lat_key: &str, lon_key: &str| {
        Some((map.get(lat_key).and_then(number_of)?, map.get(lon_key).and_then(number_of)?))
    };

    let coords = if map.contains_key("x") && map.contains_key("y") {
        pair("y", "x")
    } else if map.contains_key("latitude") && map.contains_key("longitude") {
        pair("latitude", "longitude")
    } else {
        pair("lat", "lon")
    };

    match coords {
        Some((lat, lon)) => Value::Location {
            lat,
            lon,
            display: map.get("display").and_then(scalar_string),
        },
        None => Value::Null,
    }
}

/// Parse the leading number of a string, ignoring trailing garbage.
pub fn parse_float(s: &str) -> Option<f64> {
    let s = s.trim();
    NUMERIC_PREFIX.find(s).and_then(|m| m.as_str().parse().ok())
}

/// Parse any accepted date representation. Numbers are epoch milliseconds;
/// dates without a timezone are taken as UTC.
pub fn parse_date(raw: &JsonValue) -> Option<DateTime<Utc>> {
    match raw {
        JsonValue::Number(n) => Utc.timestamp_millis_opt(n.as_f64()? as i64).single(),
        JsonValue::String(s) => parse_date_str(s),
        _ => None,
    }
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%Y/%m/%d",
];

pub fn parse_date_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = DateTime::parse_from_rfc2822(s) {
        return Some(d.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(d) = NaiveDateTime::parse_from_str(s, format) {
            return Some(d.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, format) {
            return d.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
        }
    }
    s.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}
