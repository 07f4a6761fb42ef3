//! Normalized per-frame output records.

use serde::{Deserialize, Serialize};

use crate::types::{Face, Vec2, Vec3};

/// Default detection confidence when the tracker output carries none.
pub const DEFAULT_CONFIDENCE: f64 = 1.0;

/// One tracked person in one frame.
///
/// Optional geometry is omitted from JSON when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonPose {
    /// Stable tracker identity, or the person's index within the frame when
    /// the tracker gave none.
    pub track_id: i64,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f64,
    /// Weak-perspective camera `[s, tx, ty]` in crop space.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_crop: Option<Vec3>,
    /// Camera translation `[tx, ty, tz]` in full-image space.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_full: Option<Vec3>,
    /// Detector box `[x1, y1, x2, y2]` or `[x, y, w, h]`, as reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_vertices: Option<Vec<Vec3>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_faces: Option<Vec<Face>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypoints_2d: Option<Vec<Vec2>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypoints_3d: Option<Vec<Vec3>>,
}

impl PersonPose {
    /// A person with only identity and confidence set.
    pub fn new(track_id: i64, confidence: f64) -> Self {
        Self {
            track_id,
            confidence,
            camera_crop: None,
            camera_full: None,
            bbox: None,
            mesh_vertices: None,
            mesh_faces: None,
            keypoints_2d: None,
            keypoints_3d: None,
        }
    }
}

/// One processed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Zero-based index into the source video.
    pub frame_number: u64,
    /// Seconds from the start of the video (`frame_number / fps`).
    pub timestamp: f64,
    pub persons: Vec<PersonPose>,
}

/// `frame_number / fps`, or `0.0` for a non-positive frame rate.
pub fn frame_timestamp(frame_number: u64, fps: f64) -> f64 {
    if fps > 0.0 {
        frame_number as f64 / fps
    } else {
        0.0
    }
}

/// Everything recovered from one worker result artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedArtifact {
    pub frames: Vec<FrameRecord>,
    /// Mesh topology shared by every person (static per body model).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_faces: Option<Vec<Face>>,
    /// Frame records that could not be parsed and were skipped.
    pub dropped_frames: usize,
    /// Person records that could not be parsed and were skipped.
    pub dropped_persons: usize,
}

impl ParsedArtifact {
    pub fn frame(&self, frame_number: u64) -> Option<&FrameRecord> {
        self.frames.iter().find(|f| f.frame_number == frame_number)
    }
}
