//! Lenient conversions from loosely-typed JSON values into fixed-size numeric
//! arrays. Every converter returns `None` instead of failing so a fallback
//! chain can move on to the next candidate key.

use serde_json::{Map, Value};

use crate::types::{Face, Vec2, Vec3};

/// Return the first converted value among `keys`, in order.
///
/// A key that is present but holds `null` or an unconvertible value is
/// skipped, not treated as a match.
pub fn first_of<T>(
    obj: &Map<String, Value>,
    keys: &[&str],
    convert: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter(|v| !v.is_null())
        .find_map(convert)
}

/// Strip redundant batch nesting: `[[a, b, c]]` → `[a, b, c]`.
fn unwrap_singleton(value: &Value) -> &Value {
    let mut v = value;
    while let Value::Array(items) = v {
        match items.as_slice() {
            [inner @ Value::Array(_)] => v = inner,
            _ => break,
        }
    }
    v
}

pub fn as_f64(value: &Value) -> Option<f64> {
    let n = match unwrap_singleton(value) {
        Value::Number(n) => n.as_f64()?,
        Value::Array(items) if items.len() == 1 => items[0].as_f64()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Integers, integral floats, and numeric strings (`"12"`).
pub fn as_i64(value: &Value) -> Option<i64> {
    match unwrap_singleton(value) {
        Value::Number(n) => n.as_i64().or_else(|| {
            let f = n.as_f64()?;
            (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Array(items) if items.len() == 1 => as_i64(&items[0]),
        _ => None,
    }
}

/// Frame identifiers: plain integers, or the trailing digits of a string key
/// such as `"000012.jpg"` or `"frames/frame_12"`.
pub fn frame_id(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => frame_id_from_key(s),
        other => as_i64(other).and_then(|n| u64::try_from(n).ok()),
    }
}

pub fn frame_id_from_key(key: &str) -> Option<u64> {
    let name = key.rsplit('/').next().unwrap_or(key);
    let stem = match name.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => name,
    };
    let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    stem[stem.len() - digits..].parse().ok()
}

fn numbers(items: &[Value], min_len: usize) -> Option<Vec<f64>> {
    if items.len() < min_len {
        return None;
    }
    items
        .iter()
        .map(|v| v.as_f64().filter(|f| f.is_finite()))
        .collect()
}

/// Leading three numbers of an array (extra trailing components such as a
/// confidence channel are ignored).
pub fn as_vec3(value: &Value) -> Option<Vec3> {
    match unwrap_singleton(value) {
        Value::Array(items) => {
            let n = numbers(items, 3)?;
            Some([n[0], n[1], n[2]])
        }
        _ => None,
    }
}

pub fn as_vec2(value: &Value) -> Option<Vec2> {
    match unwrap_singleton(value) {
        Value::Array(items) => {
            let n = numbers(items, 2)?;
            Some([n[0], n[1]])
        }
        _ => None,
    }
}

/// A camera translation given either as an array or as `{tx, ty, tz}`.
pub fn as_translation(value: &Value) -> Option<Vec3> {
    match unwrap_singleton(value) {
        Value::Object(obj) => Some([
            obj.get("tx")?.as_f64()?,
            obj.get("ty")?.as_f64()?,
            obj.get("tz")?.as_f64()?,
        ]),
        other => as_vec3(other),
    }
}

fn point_list<T>(value: &Value, point: impl Fn(&Value) -> Option<T>) -> Option<Vec<T>> {
    let mut v = value;
    // `[[[x, y, z], ...]]` is a batch of one.
    if let Value::Array(items) = v {
        if let [inner @ Value::Array(rows)] = items.as_slice() {
            if rows.first().is_some_and(Value::is_array) {
                v = inner;
            }
        }
    }
    match v {
        Value::Array(items) => items.iter().map(point).collect(),
        _ => None,
    }
}

pub fn as_points3(value: &Value) -> Option<Vec<Vec3>> {
    point_list(value, |p| match p {
        Value::Array(items) => {
            let n = numbers(items, 3)?;
            Some([n[0], n[1], n[2]])
        }
        _ => None,
    })
}

pub fn as_points2(value: &Value) -> Option<Vec<Vec2>> {
    point_list(value, |p| match p {
        Value::Array(items) => {
            let n = numbers(items, 2)?;
            Some([n[0], n[1]])
        }
        _ => None,
    })
}

pub fn as_faces(value: &Value) -> Option<Vec<Face>> {
    point_list(value, |p| match p {
        Value::Array(items) if items.len() == 3 => {
            let mut face = [0u32; 3];
            for (slot, item) in face.iter_mut().zip(items) {
                *slot = u32::try_from(as_i64(item)?).ok()?;
            }
            Some(face)
        }
        _ => None,
    })
}

/// Any finite number list (bounding boxes come in 4- and 5-element forms).
pub fn as_numbers(value: &Value) -> Option<Vec<f64>> {
    match unwrap_singleton(value) {
        Value::Array(items) => numbers(items, 1),
        _ => None,
    }
}

/// Box size as a scalar, or the longer side of `[w, h]`.
pub fn as_box_size(value: &Value) -> Option<f64> {
    as_f64(value).or_else(|| as_vec2(value).map(|[w, h]| w.max(h)))
}
