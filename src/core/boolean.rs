//! Boolean normalization for values coming back from the PHP backend.
//!
//! Depending on the environment (driver, PDO settings, hand-written JSON) the
//! same flag can arrive as `true`, `1`, `"1"`, `"true"`, `"oui"` or `"on"`.
//! Everything downstream works on a plain `bool`, produced here.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

const TRUE_WORDS: [&str; 4] = ["true", "yes", "oui", "on"];
const FALSE_WORDS: [&str; 5] = ["false", "no", "non", "off", ""];

/// Converts any JSON value into a boolean. Never fails.
///
/// Strings are trimmed and lower-cased, then matched against the keyword
/// sets. Only when no keyword matches is a numeric prefix parsed, so `"0"`
/// and `"0.00"` are false through the numeric rule and `"2"` is true.
pub fn to_boolean(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => string_to_boolean(s),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// Same as [`to_boolean`] for an optional field: absent means false.
pub fn option_to_boolean(value: Option<&Value>) -> bool {
    value.map(to_boolean).unwrap_or(false)
}

pub fn to_boolean_int(value: &Value) -> u8 {
    u8::from(to_boolean(value))
}

pub fn to_boolean_string(value: &Value) -> &'static str {
    if to_boolean(value) {
        "1"
    } else {
        "0"
    }
}

fn string_to_boolean(raw: &str) -> bool {
    let normalized = raw.trim().to_lowercase();

    if TRUE_WORDS.contains(&normalized.as_str()) {
        return true;
    }
    if FALSE_WORDS.contains(&normalized.as_str()) {
        return false;
    }

    match parse_float_prefix(&normalized) {
        Some(number) => number != 0.0,
        None => true,
    }
}

/// Parses the longest leading decimal number of `s`, ignoring trailing text
/// (`"12abc"` is 12). Returns `None` when `s` does not start with a number.
fn parse_float_prefix(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }

    if digits == 0 {
        return None;
    }

    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().ok()
}

/// Replaces each listed field of a JSON object with its normalized boolean.
/// Fields that are absent stay absent; unlisted fields are not touched.
pub fn normalize_boolean_fields(mut record: Value, fields: &[&str]) -> Value {
    if let Value::Object(map) = &mut record {
        for field in fields {
            if let Some(value) = map.get_mut(*field) {
                *value = Value::Bool(to_boolean(value));
            }
        }
    }
    record
}

pub fn normalize_boolean_fields_array(records: Vec<Value>, fields: &[&str]) -> Vec<Value> {
    records
        .into_iter()
        .map(|record| normalize_boolean_fields(record, fields))
        .collect()
}

/// `deserialize_with` helper for flags that the backend encodes loosely.
pub fn deserialize_bool_like<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(to_boolean(&value))
}
