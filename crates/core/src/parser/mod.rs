//! Tracker output parser.
//!
//! The tracker has emitted several incompatible result layouts over time.
//! [`parse_value`] classifies the artifact into one of the known
//! [`shape::ArtifactShape`]s, each frame into a [`shape::FrameShape`], and
//! reads person fields through fixed fallback chains of key names.
//!
//! Artifacts are JSON or, as the tracker writes natively, Python pickle;
//! see [`pickle`].
//!
//! Individual frame or person records that cannot be read are dropped with
//! a warning and counted in [`ParsedArtifact`]; only an artifact that is
//! unreadable as a whole is an error.

pub mod convert;
pub mod person;
pub mod pickle;
pub mod shape;

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::camera::FocalConfig;
use crate::frame::{frame_timestamp, FrameRecord, ParsedArtifact};
use crate::types::Vec2;
use convert::{as_f64, as_vec2, first_of, frame_id};
use person::{extract_person, normalize_person, IMAGE_SIZE_KEYS};
use shape::{classify_artifact, classify_frame, FrameShape, FRAME_NUMBER_KEYS, TIMESTAMP_KEYS};

/// Frame rate assumed when the source video could not be probed.
pub const DEFAULT_FPS: f64 = 30.0;

/// Context the parser needs beyond the artifact itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParseOptions {
    /// Source video frame rate, for timestamps.
    pub fps: f64,
    /// Source video `[w, h]`, required to derive full-image cameras and
    /// project keypoints.
    pub image_size: Option<Vec2>,
    pub focal: FocalConfig,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            image_size: None,
            focal: FocalConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Failed to read artifact {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Artifact is not a readable pickle: {0}")]
    Pickle(#[from] serde_pickle::Error),

    #[error("Unrecognized artifact shape: {0}")]
    UnrecognizedShape(String),
}

/// Extensions decoded as pickle; everything else is read as JSON.
pub const PICKLE_EXTENSIONS: &[&str] = &["pkl", "pickle"];

pub fn is_pickle(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| PICKLE_EXTENSIONS.iter().any(|p| e.eq_ignore_ascii_case(p)))
}

/// Read and parse a result artifact from disk, JSON or pickle by extension.
pub async fn parse_artifact(path: &Path, opts: &ParseOptions) -> Result<ParsedArtifact, ParseError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let root: Value = if is_pickle(path) {
        pickle::decode(&bytes)?
    } else {
        serde_json::from_slice(&bytes)?
    };
    let artifact = parse_value(&root, opts)?;

    tracing::info!(
        path = %path.display(),
        frames = artifact.frames.len(),
        dropped_frames = artifact.dropped_frames,
        dropped_persons = artifact.dropped_persons,
        "Parsed result artifact",
    );
    Ok(artifact)
}

/// Parse an already-decoded artifact.
pub fn parse_value(root: &Value, opts: &ParseOptions) -> Result<ParsedArtifact, ParseError> {
    let shape = classify_artifact(root)?;
    let mut out = ParsedArtifact::default();

    for (position, (container_id, frame)) in shape.entries().into_iter().enumerate() {
        let fallback_number = container_id.unwrap_or(position as u64);
        match parse_frame(frame, fallback_number, opts, &mut out) {
            Some(record) => out.frames.push(record),
            None => {
                out.dropped_frames += 1;
                tracing::warn!(position, "Dropping unreadable frame record");
            }
        }
    }

    Ok(out)
}

fn parse_frame(
    value: &Value,
    fallback_number: u64,
    opts: &ParseOptions,
    out: &mut ParsedArtifact,
) -> Option<FrameRecord> {
    let shape = classify_frame(value)?;
    let header = shape.header();

    let frame_number = header
        .and_then(|h| first_of(h, FRAME_NUMBER_KEYS, frame_id))
        .unwrap_or(fallback_number);
    let timestamp = header
        .and_then(|h| first_of(h, TIMESTAMP_KEYS, as_f64))
        .unwrap_or_else(|| frame_timestamp(frame_number, opts.fps));
    let frame_image_size = header.and_then(|h| first_of(h, IMAGE_SIZE_KEYS, as_vec2));

    let mut record = FrameRecord {
        frame_number,
        timestamp,
        persons: Vec::new(),
    };

    let single;
    let persons: &[Value] = match &shape {
        FrameShape::Empty { .. } => &[],
        FrameShape::PersonList { persons, .. } => persons,
        FrameShape::Columnar { persons, .. } => persons,
        FrameShape::SinglePerson(obj) => {
            single = [Value::Object(Map::clone(obj))];
            &single
        }
    };

    for (index, raw) in persons.iter().enumerate() {
        let Some(extracted) = extract_person(raw, index) else {
            out.dropped_persons += 1;
            tracing::warn!(frame_number, index, "Dropping unreadable person record");
            continue;
        };
        let (pose, faces) = normalize_person(extracted, frame_image_size, opts);
        if out.mesh_faces.is_none() {
            out.mesh_faces = faces.filter(|f| !f.is_empty());
        }
        record.persons.push(pose);
    }

    Some(record)
}
