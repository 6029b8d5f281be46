//! Placeholder substitution for URL and text templates.
//!
//! Templates reference parameters as `$name`, `${name}` or `${name:opt}`;
//! `$$` is a literal dollar sign. Call parameters shadow device state.
//! A missing parameter renders as the empty string.
//!
//! Options:
//! - `%`: multiply a number by 100
//! - a unit (`C`, `F`, `mm`, ...): convert a number from its base unit and
//!   render one decimal
//! - `url`: percent-encode the rendered value

use chrono::SecondsFormat;
use devkind_core::units;
use devkind_core::{DeviceState, Params, Value};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;
use tracing::warn;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(?:\$|([a-zA-Z0-9_]+)|\{([a-zA-Z0-9_]+)(?::(%|[a-zA-Z-]+))?\})")
        .expect("placeholder pattern is valid")
});

/// Render `template` against call parameters and device state.
pub fn format_string(template: &str, state: &DeviceState, params: Option<&Params>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let Some(name) = caps.get(1).or_else(|| caps.get(2)) else {
                return "$".to_string();
            };
            let option = caps.get(3).map(|m| m.as_str());
            match lookup(name.as_str(), state, params) {
                Some(value) => render(&value, option),
                None => String::new(),
            }
        })
        .into_owned()
}

fn lookup<'a>(name: &str, state: &DeviceState, params: Option<&'a Params>) -> Option<Cow<'a, Value>> {
    if let Some(value) = params.and_then(|p| p.get(name)).filter(|v| !v.is_null()) {
        return Some(Cow::Borrowed(value));
    }
    state
        .get(name)
        .filter(|v| !v.is_null())
        .map(|v| Cow::Owned(Value::from(v.clone())))
}

fn render(value: &Value, option: Option<&str>) -> String {
    let rendered = match value {
        Value::Number(n) => return render_number(*n, option),
        Value::Null => String::new(),
        Value::Boolean(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Date(d) => d.to_rfc3339_opts(SecondsFormat::Millis, true),
        Value::Currency { value, .. } => format_number(*value),
        Value::Entity { value, .. } => value.clone(),
        Value::Location { lat, lon, display } => match display {
            Some(display) => display.clone(),
            None => format!("{},{}", lat, lon),
        },
        Value::Array(items) => items
            .iter()
            .map(|v| render(v, None))
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_json().to_string(),
    };

    if option == Some("url") {
        encode_uri_component(&rendered)
    } else {
        rendered
    }
}

fn render_number(mut n: f64, option: Option<&str>) -> String {
    let option = match option {
        Some("%") => {
            n *= 100.0;
            None
        }
        other => other,
    };

    match option {
        None | Some("url") => format_number(n),
        Some(unit) => match units::from_base_unit(n, unit) {
            Some(converted) => format!("{:.1}", converted),
            None => {
                warn!(unit = %unit, "Unknown unit in template placeholder");
                format_number(n)
            }
        },
    }
}

/// Integers without decimals, everything else with two.
fn format_number(n: f64) -> String {
    let rounded = n.round();
    // absorbs float noise such as 0.42 * 100
    if (n - rounded).abs() < 1e-9 {
        format!("{:.0}", rounded)
    } else {
        format!("{:.2}", n)
    }
}

/// Percent-encoding that leaves `!'()*` alone, like browsers do for URI components.
pub fn encode_uri_component(s: &str) -> String {
    let encoded = urlencoding::encode(s);
    if !encoded.contains('%') {
        return encoded.into_owned();
    }
    encoded
        .replace("%21", "!")
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
        .replace("%2A", "*")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn state(value: serde_json::Value) -> DeviceState {
        match value {
            serde_json::Value::Object(map) => map,
            _ => DeviceState::new(),
        }
    }

    fn params(pairs: &[(&str, Value)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_string_placeholders() {
        let st = state(json!({"string": "one"}));
        assert_eq!(format_string("foo ${string}", &st, Some(&Params::new())), "foo one");
        assert_eq!(format_string("foo ${string}", &st, None), "foo one");
        assert_eq!(format_string("foo $string", &st, None), "foo one");
        assert_eq!(format_string("foo $string.", &st, None), "foo one.");
        assert_eq!(format_string("${string}foo", &st, None), "onefoo");
        assert_eq!(format_string("$string\u{200c}foo", &st, None), "one\u{200c}foo");
    }

    #[test]
    fn test_missing_parameter_is_empty() {
        assert_eq!(format_string("foo ${string}", &DeviceState::new(), None), "foo ");
        assert_eq!(
            format_string("foo ${string}", &DeviceState::new(), Some(&Params::new())),
            "foo "
        );
    }

    #[test]
    fn test_call_params_win() {
        let st = state(json!({"string": "state"}));
        let p = params(&[("string", Value::from("call"))]);
        assert_eq!(format_string("foo ${string}", &st, Some(&p)), "foo call");

        let p = params(&[("string", Value::Null)]);
        assert_eq!(format_string("foo ${string}", &st, Some(&p)), "foo state");

        let p = params(&[("string", Value::from("one"))]);
        assert_eq!(format_string("foo ${string}", &DeviceState::new(), Some(&p)), "foo one");
    }

    #[test]
    fn test_numbers() {
        let st = |n: f64| state(json!({ "number": n }));
        assert_eq!(format_string("foo ${number}", &st(42.0), None), "foo 42");
        assert_eq!(format_string("foo ${number}", &st(4.5), None), "foo 4.50");
        assert_eq!(format_string("foo ${number:%}", &st(0.42), None), "foo 42");
        assert_eq!(format_string("foo ${number:C}", &st(20.0), None), "foo 20.0");
        assert_eq!(format_string("foo ${number:F}", &st(20.0), None), "foo 68.0");
        assert_eq!(format_string("foo ${number:m}", &st(20.0), None), "foo 20.0");
        assert_eq!(format_string("foo ${number:mm}", &st(20.0), None), "foo 20000.0");
    }

    #[test]
    fn test_zero_is_not_missing() {
        let st = state(json!({"number": 0}));
        assert_eq!(format_string("n=${number}", &st, None), "n=0");
    }

    #[test]
    fn test_dollar_escape() {
        let st = DeviceState::new();
        assert_eq!(format_string("$$$$", &st, None), "$$");
        assert_eq!(format_string("$$foo", &st, None), "$foo");
    }

    #[test]
    fn test_date() {
        let date = Utc.with_ymd_and_hms(2018, 1, 1, 10, 0, 0).unwrap();
        let p = params(&[("date", Value::Date(date))]);
        assert_eq!(
            format_string("foo${date}", &DeviceState::new(), Some(&p)),
            "foo2018-01-01T10:00:00.000Z"
        );
    }

    #[test]
    fn test_url_option() {
        let st = state(json!({"string": "~!@#$%^&*()_-`:\"[],><"}));
        assert_eq!(
            format_string("foo ${string:url}", &st, None),
            "foo ~!%40%23%24%25%5E%26*()_-%60%3A%22%5B%5D%2C%3E%3C"
        );
    }

    #[test]
    fn test_unknown_unit_falls_back() {
        let st = state(json!({"number": 3}));
        assert_eq!(format_string("${number:parsec}", &st, None), "3");
        assert_eq!(format_string("${number:url}", &st, None), "3");
    }
}
