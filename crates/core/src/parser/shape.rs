//! The finite set of artifact and frame layouts the tracker is known to emit.

use serde_json::{Map, Value};

use super::convert::frame_id_from_key;
use super::person::{looks_like_person, IMAGE_SIZE_KEYS};
use super::ParseError;

/// Keys under which a frame sequence may be wrapped, in lookup order.
pub const WRAPPER_KEYS: &[&str] = &["frames", "results", "predictions", "frame_data"];

/// Keys under which a frame lists its persons, in lookup order.
pub const PERSON_LIST_KEYS: &[&str] = &["persons", "detections", "tracks", "people"];

/// Frame-level fields that are never sliced per person in columnar frames.
pub const FRAME_NUMBER_KEYS: &[&str] = &["frame_number", "frame", "frame_id"];
pub const TIMESTAMP_KEYS: &[&str] = &["timestamp"];

/// Per-person columns in a columnar frame, with the person-record key each
/// maps to.
const COLUMN_RENAMES: &[(&str, &str)] = &[("tid", "track_id"), ("conf", "confidence")];

/// Top-level artifact layout.
#[derive(Debug)]
pub enum ArtifactShape<'a> {
    /// Frames in positional order: a top-level list, a list under a wrapper
    /// key, or a lone frame object.
    FrameList(&'a [Value]),
    /// An object keyed by frame id (`"0"`, `"000012.jpg"`), sorted by id.
    FrameIdMap(Vec<(u64, &'a Value)>),
}

impl<'a> ArtifactShape<'a> {
    /// Frames paired with the id their container assigned, if any.
    pub fn entries(&self) -> Vec<(Option<u64>, &'a Value)> {
        match self {
            Self::FrameList(frames) => (*frames).iter().map(|f| (None, f)).collect(),
            Self::FrameIdMap(frames) => frames.iter().map(|(id, f)| (Some(*id), *f)).collect(),
        }
    }
}

/// Layout of one frame record.
#[derive(Debug)]
pub enum FrameShape<'a> {
    /// `null`, or an object with frame metadata only.
    Empty { header: Option<&'a Map<String, Value>> },
    /// Persons listed under one of [`PERSON_LIST_KEYS`], or a bare list.
    PersonList {
        header: Option<&'a Map<String, Value>>,
        persons: &'a [Value],
    },
    /// Parallel per-person arrays (`tid`, `conf`, `pred_cam`, ...).
    Columnar {
        header: &'a Map<String, Value>,
        persons: Vec<Value>,
    },
    /// The frame object is itself the only person record.
    SinglePerson(&'a Map<String, Value>),
}

impl<'a> FrameShape<'a> {
    pub fn header(&self) -> Option<&'a Map<String, Value>> {
        match self {
            Self::Empty { header } | Self::PersonList { header, .. } => *header,
            Self::Columnar { header, .. } => Some(*header),
            Self::SinglePerson(obj) => Some(*obj),
        }
    }
}

pub fn classify_artifact(root: &Value) -> Result<ArtifactShape<'_>, ParseError> {
    match root {
        Value::Array(frames) => Ok(ArtifactShape::FrameList(frames)),
        Value::Object(obj) => {
            for key in WRAPPER_KEYS {
                match obj.get(*key) {
                    Some(Value::Array(frames)) => return Ok(ArtifactShape::FrameList(frames)),
                    Some(Value::Object(inner)) => {
                        if let Some(map) = frame_id_map(inner) {
                            return Ok(map);
                        }
                    }
                    _ => {}
                }
            }

            if let Some(map) = frame_id_map(obj) {
                return Ok(map);
            }

            if looks_like_frame(obj) {
                return Ok(ArtifactShape::FrameList(std::slice::from_ref(root)));
            }

            let keys: Vec<&str> = obj.keys().map(String::as_str).take(8).collect();
            Err(ParseError::UnrecognizedShape(format!(
                "object with keys [{}]",
                keys.join(", ")
            )))
        }
        other => Err(ParseError::UnrecognizedShape(format!(
            "top-level {}",
            json_type(other)
        ))),
    }
}

/// `None` for values that cannot be a frame (numbers, strings, booleans).
pub fn classify_frame(value: &Value) -> Option<FrameShape<'_>> {
    match value {
        Value::Null => Some(FrameShape::Empty { header: None }),
        Value::Array(persons) => Some(FrameShape::PersonList {
            header: None,
            persons,
        }),
        Value::Object(obj) => {
            for key in PERSON_LIST_KEYS {
                if let Some(Value::Array(persons)) = obj.get(*key) {
                    return Some(FrameShape::PersonList {
                        header: Some(obj),
                        persons,
                    });
                }
            }
            if let Some(persons) = split_columns(obj) {
                return Some(FrameShape::Columnar {
                    header: obj,
                    persons,
                });
            }
            if looks_like_person(obj) {
                return Some(FrameShape::SinglePerson(obj));
            }
            Some(FrameShape::Empty { header: Some(obj) })
        }
        _ => None,
    }
}

fn looks_like_frame(obj: &Map<String, Value>) -> bool {
    PERSON_LIST_KEYS.iter().any(|k| obj.contains_key(*k))
        || COLUMN_RENAMES.iter().any(|(col, _)| obj.contains_key(*col))
        || looks_like_person(obj)
}

fn frame_id_map(obj: &Map<String, Value>) -> Option<ArtifactShape<'_>> {
    let mut frames: Vec<(u64, &Value)> = obj
        .iter()
        .filter_map(|(key, value)| Some((frame_id_from_key(key)?, value)))
        .collect();
    if frames.is_empty() {
        return None;
    }
    if frames.len() < obj.len() {
        tracing::debug!(
            skipped = obj.len() - frames.len(),
            "Ignoring non-frame keys in frame id map"
        );
    }
    frames.sort_by_key(|(id, _)| *id);
    Some(ArtifactShape::FrameIdMap(frames))
}

/// Turn parallel per-person arrays into one object per person.
///
/// A frame is columnar when `tid` or `conf` holds an array; its length is
/// the person count. Every other array of that same length is sliced.
fn split_columns(obj: &Map<String, Value>) -> Option<Vec<Value>> {
    let count = COLUMN_RENAMES
        .iter()
        .find_map(|(col, _)| obj.get(*col).and_then(Value::as_array))?
        .len();

    let skip = |key: &str| {
        FRAME_NUMBER_KEYS.contains(&key)
            || TIMESTAMP_KEYS.contains(&key)
            || IMAGE_SIZE_KEYS.contains(&key)
    };

    let mut persons: Vec<Map<String, Value>> = vec![Map::new(); count];
    for (key, value) in obj {
        if skip(key.as_str()) {
            continue;
        }
        let Some(column) = value.as_array().filter(|c| c.len() == count) else {
            continue;
        };
        let name = COLUMN_RENAMES
            .iter()
            .find(|(col, _)| *col == key.as_str())
            .map_or(key.as_str(), |(_, renamed)| *renamed);
        for (person, cell) in persons.iter_mut().zip(column) {
            person.insert(name.to_string(), cell.clone());
        }
    }

    Some(persons.into_iter().map(Value::Object).collect())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
