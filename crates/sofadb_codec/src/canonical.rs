//! Canonical JSON bytes for hashing.
//!
//! Two JSON values that are equal produce identical bytes:
//!
//! - Object keys are sorted bytewise, independent of insertion order
//! - No insignificant whitespace
//! - Numbers and strings use `serde_json`'s shortest form

use crate::error::{CodecError, CodecResult};
use serde_json::Value;

/// Encodes `value` as canonical JSON bytes.
///
/// # Errors
///
/// Returns an error if a number cannot be represented (`NaN`, infinity).
pub fn canonical_json(value: &Value) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_scalar(&Value::String(key.clone()), out)?;
                out.push(b':');
                write_value(&map[key], out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Number(n) if n.as_f64().is_some_and(|f| !f.is_finite()) => {
            return Err(CodecError::NonFiniteNumber);
        }
        scalar => write_scalar(scalar, out)?,
    }
    Ok(())
}

fn write_scalar(value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    serde_json::to_writer(out, value).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_recursively() {
        let value = json!({"b": 1, "a": {"z": true, "y": [3, {"d": null, "c": "s"}]}});
        let bytes = canonical_json(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"y":[3,{"c":"s","d":null}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn strings_are_escaped() {
        let bytes = canonical_json(&json!({"k\"": "line\nbreak"})).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"k\"":"line\nbreak"}"#
        );
    }

    proptest! {
        #[test]
        fn canonical_bytes_parse_back_to_same_value(
            pairs in prop::collection::vec(("[a-z]{1,6}", any::<i32>()), 0..8)
        ) {
            let value: Value = pairs
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect::<serde_json::Map<_, _>>()
                .into();
            let bytes = canonical_json(&value).unwrap();
            let parsed: Value = serde_json::from_slice(&bytes).unwrap();
            prop_assert_eq!(parsed, value);
        }
    }
}
