//! Deterministic JSON encoding used as hash input.
//!
//! Rules:
//! - object keys sorted by byte order, regardless of insertion order
//! - no insignificant whitespace
//! - strings escaped minimally (`"`, `\`, and control characters)
//! - integral floats within ±2^53 written as integers, so `1`, `1.0` and
//!   `1e0` all encode as `1`
//! - other floats in shortest round-trip form

use serde::Serialize;
use serde_json::{Number, Value};

use crate::hasher::HashError;

/// Largest integer exactly representable in an `f64`.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Serialize any value into canonical bytes.
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    let value = serde_json::to_value(value).map_err(|e| HashError::Serialization(e.to_string()))?;
    Ok(to_canonical_bytes(&value))
}

/// Encode an already-built JSON value canonically.
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(out, key);
                out.push(b':');
                write_value(out, &map[key.as_str()]);
            }
            out.push(b'}');
        }
    }
}

fn write_number(out: &mut Vec<u8>, n: &Number) {
    if n.is_i64() || n.is_u64() {
        out.extend_from_slice(n.to_string().as_bytes());
        return;
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER => {
            // -0.0 collapses to 0
            out.extend_from_slice((f as i64).to_string().as_bytes());
        }
        _ => out.extend_from_slice(n.to_string().as_bytes()),
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            '\u{08}' => out.extend_from_slice(b"\\b"),
            '\u{0c}' => out.extend_from_slice(b"\\f"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn encode(value: &Value) -> String {
        String::from_utf8(to_canonical_bytes(value)).unwrap()
    }

    #[test]
    fn keys_are_sorted() {
        assert_eq!(encode(&json!({"b": 1, "a": 2})), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn nested_objects_are_sorted() {
        let value = json!({"z": {"y": true, "x": null}, "a": [3, {"d": 1, "c": 2}]});
        assert_eq!(
            encode(&value),
            r#"{"a":[3,{"c":2,"d":1}],"z":{"x":null,"y":true}}"#
        );
    }

    #[test]
    fn whitespace_in_source_is_irrelevant() {
        let compact: Value = serde_json::from_str(r#"{"a":1,"b":[1,2]}"#).unwrap();
        let spaced: Value = serde_json::from_str("{ \"b\" : [ 1 , 2 ],\n  \"a\" : 1 }").unwrap();
        assert_eq!(to_canonical_bytes(&compact), to_canonical_bytes(&spaced));
    }

    #[test]
    fn integral_floats_collapse() {
        let a: Value = serde_json::from_str(r#"{"n": 1.0}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"n": 1}"#).unwrap();
        let c: Value = serde_json::from_str(r#"{"n": 1e0}"#).unwrap();
        assert_eq!(encode(&a), r#"{"n":1}"#);
        assert_eq!(to_canonical_bytes(&a), to_canonical_bytes(&b));
        assert_eq!(to_canonical_bytes(&a), to_canonical_bytes(&c));
    }

    #[test]
    fn fractional_floats_keep_precision() {
        assert_eq!(encode(&json!(0.5)), "0.5");
        assert_eq!(encode(&json!(-2.25)), "-2.25");
    }

    #[test]
    fn negative_zero_is_zero() {
        assert_eq!(encode(&json!(-0.0)), "0");
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(encode(&json!("a\"b\\c\nd\u{01}")), r#""a\"b\\c\nd\u0001""#);
        assert_eq!(encode(&json!("héllo")), "\"héllo\"");
    }

    #[test]
    fn canonical_output_parses_back_to_same_value() {
        let value = json!({"k": ["x", 1, 2.5, false, null], "e": {}});
        let parsed: Value = serde_json::from_slice(&to_canonical_bytes(&value)).unwrap();
        assert_eq!(parsed, value);
    }

    proptest! {
        #[test]
        fn insertion_order_never_matters(
            entries in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..12)
        ) {
            let forward: serde_json::Map<String, Value> =
                entries.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let reverse: serde_json::Map<String, Value> =
                entries.iter().rev().map(|(k, v)| (k.clone(), json!(v))).collect();
            prop_assert_eq!(
                to_canonical_bytes(&Value::Object(forward)),
                to_canonical_bytes(&Value::Object(reverse))
            );
        }
    }
}
