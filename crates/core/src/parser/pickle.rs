//! Pickled tracker results.
//!
//! The tracker's native output is a Python pickle. It is decoded into the
//! same [`Value`] tree the JSON path produces so both go through one set of
//! shape classifiers. Objects of classes the decoder cannot resolve (numpy
//! arrays among them) come through as `null` and are treated like any
//! missing field.

use serde_json::{Map, Number, Value};
use serde_pickle::{DeOptions, HashableValue, Value as PickleValue};

/// Decode pickle bytes into a JSON value tree.
pub fn decode(bytes: &[u8]) -> Result<Value, serde_pickle::Error> {
    let options = DeOptions::new()
        .decode_strings()
        .replace_unresolved_globals();
    let value = serde_pickle::value_from_slice(bytes, options)?;
    Ok(to_json(value))
}

fn to_json(value: PickleValue) -> Value {
    match value {
        PickleValue::None => Value::Null,
        PickleValue::Bool(b) => Value::Bool(b),
        PickleValue::I64(i) => Value::from(i),
        PickleValue::Int(big) => float(big.to_string().parse().unwrap_or(f64::NAN)),
        PickleValue::F64(f) => float(f),
        PickleValue::Bytes(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        PickleValue::String(s) => Value::String(s),
        PickleValue::List(items) | PickleValue::Tuple(items) => {
            Value::Array(items.into_iter().map(to_json).collect())
        }
        PickleValue::Dict(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                if let Some(key) = key_string(key) {
                    map.insert(key, to_json(value));
                }
            }
            Value::Object(map)
        }
        // Sets carry nothing the parser reads.
        _ => Value::Null,
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

/// Dict keys become object keys; frame-id maps are keyed by ints.
fn key_string(key: HashableValue) -> Option<String> {
    match key {
        HashableValue::String(s) => Some(s),
        HashableValue::I64(i) => Some(i.to_string()),
        HashableValue::Int(big) => Some(big.to_string()),
        HashableValue::F64(f) => Some(f.to_string()),
        HashableValue::Bool(b) => Some(b.to_string()),
        HashableValue::Bytes(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;
    use serde_pickle::SerOptions;

    use super::*;

    fn pickled(value: &PickleValue) -> Vec<u8> {
        serde_pickle::value_to_vec(value, SerOptions::new()).expect("pickle")
    }

    #[test]
    fn frame_id_map_with_tuples() {
        let person = PickleValue::Dict(BTreeMap::from([
            (
                HashableValue::String("track_id".into()),
                PickleValue::I64(3),
            ),
            (
                HashableValue::String("pred_cam".into()),
                PickleValue::Tuple(vec![
                    PickleValue::F64(1.0),
                    PickleValue::F64(0.5),
                    PickleValue::F64(-0.5),
                ]),
            ),
        ]));
        let frame = PickleValue::Dict(BTreeMap::from([(
            HashableValue::String("persons".into()),
            PickleValue::List(vec![person]),
        )]));
        let root = PickleValue::Dict(BTreeMap::from([(HashableValue::I64(4), frame)]));

        let decoded = decode(&pickled(&root)).expect("decode");
        assert_eq!(
            decoded,
            json!({"4": {"persons": [{"track_id": 3, "pred_cam": [1.0, 0.5, -0.5]}]}})
        );
    }

    #[test]
    fn non_finite_floats_become_null() {
        let root = PickleValue::List(vec![PickleValue::F64(f64::NAN), PickleValue::F64(2.0)]);
        assert_eq!(decode(&pickled(&root)).expect("decode"), json!([null, 2.0]));
    }

    /// BINUNICODE opcode with its little-endian length prefix.
    fn push_str(bytes: &mut Vec<u8>, text: &str) {
        bytes.push(b'X');
        bytes.extend_from_slice(&(text.len() as u32).to_le_bytes());
        bytes.extend_from_slice(text.as_bytes());
    }

    #[test]
    fn unresolved_class_objects_become_null() {
        // {"frames": [{"track_id": 7, "vertices": numpy.ndarray}]}, protocol 2.
        let mut bytes = vec![0x80, 0x02, b'}', b'('];
        push_str(&mut bytes, "frames");
        bytes.extend_from_slice(b"](}(");
        push_str(&mut bytes, "track_id");
        bytes.extend_from_slice(&[b'K', 7]);
        push_str(&mut bytes, "vertices");
        bytes.extend_from_slice(b"cnumpy\nndarray\n");
        bytes.extend_from_slice(b"ueu.");

        let decoded = decode(&bytes).expect("decode");
        assert_eq!(decoded, json!({"frames": [{"track_id": 7, "vertices": null}]}));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(decode(b"not a pickle").is_err());
    }
}
