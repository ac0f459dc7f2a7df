//! Request Fingerprint Module
//!
//! Derives stable cache keys from request payloads: structurally equal
//! payloads hash the same regardless of object key order.

use serde::Serialize;
use serde_json::{Map, Number, Value};
use sha1::{Digest, Sha1};

/// Largest magnitude below which every whole `f64` is an exact integer.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Rebuilds `value` with every object's keys in lexicographic order.
///
/// Arrays keep their order. Whole-valued floats are written as integers,
/// so `1.0` and `1` share a fingerprint; other scalars are unchanged.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Number(number) => Value::Number(canonical_number(number)),
        scalar => scalar.clone(),
    }
}

fn canonical_number(number: &Number) -> Number {
    match number.as_f64() {
        Some(float) if number.is_f64() && is_safe_whole(float) => Number::from(float as i64),
        _ => number.clone(),
    }
}

fn is_safe_whole(float: f64) -> bool {
    float.fract() == 0.0 && float.abs() < MAX_SAFE_INTEGER
}

/// Canonical text of a payload: key-sorted JSON with two-space indentation.
pub fn canonical_json<T: Serialize + ?Sized>(payload: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(payload)?;
    serde_json::to_string_pretty(&canonicalize(&value))
}

/// SHA-1 hex digest of the canonical form of `payload`.
pub fn fingerprint<T: Serialize + ?Sized>(payload: &T) -> Result<String, serde_json::Error> {
    Ok(sha1_hex(canonical_json(payload)?.as_bytes()))
}

/// Lowercase hex SHA-1 of raw bytes.
pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
