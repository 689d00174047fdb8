// Parsing of the opaque `currentState` blob.
//
// The blob is the only place where untrusted, loosely-typed JSON enters the
// numeric pipeline, so every rule for "what counts as a number" lives here.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

pub(super) fn empty_blob() -> String {
    "{}".to_string()
}

/// Accepts a JSON string, a JSON object or `null` and yields the string form.
pub(super) fn deserialize_blob<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => empty_blob(),
        other => other.to_string(),
    })
}

pub(super) fn deserialize_optional_blob<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    })
}

/// Extract the numeric fields of a state blob.
///
/// Never fails. Invalid JSON or a non-object blob yields an empty map.
/// Numbers are kept as-is; strings contribute their longest leading decimal
/// prefix (`"21.5°C"` -> 21.5); everything else is excluded, as are
/// non-finite results.
pub fn parse_numeric_fields(blob: &str) -> BTreeMap<String, f64> {
    let mut fields = BTreeMap::new();

    let object = match serde_json::from_str::<Value>(blob) {
        Ok(Value::Object(map)) => map,
        _ => return fields,
    };

    for (key, value) in object {
        if let Some(number) = numeric_value(&value) {
            fields.insert(key, number);
        }
    }

    fields
}

/// Numeric interpretation of a single JSON value, if it has one.
pub(crate) fn numeric_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => leading_float(s)?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// Parse the longest prefix of `s` (after leading whitespace) that forms a
/// decimal floating point literal.
fn leading_float(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
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

    // Optional exponent, only consumed when complete
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
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
