//! Synchronous single-frame estimation path.
//!
//! A [`PoseEstimator`] runs detection plus mesh recovery on one image and
//! returns the raw model outputs; [`build_frame_record`] binds those outputs
//! to image space with the same transforms the tracker results go through.

use serde::{Deserialize, Serialize};

use crate::camera::{cam_crop_to_full, project_points, rotate_mesh_180_x, FocalConfig};
use crate::frame::{frame_timestamp, FrameRecord, PersonPose};
use crate::types::{Face, Vec2, Vec3};

/// Raw model output for one detected person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPoseEstimate {
    /// Model-space mesh vertices, before any rotation.
    #[serde(default)]
    pub vertices: Vec<Vec3>,
    #[serde(default)]
    pub faces: Option<Vec<Face>>,
    /// Weak-perspective camera `[s, tx, ty]` in crop space.
    pub camera_crop: Vec3,
    pub box_center: Vec2,
    pub box_size: f64,
    /// Full image `[w, h]`.
    pub img_size: Vec2,
    #[serde(default)]
    pub keypoints_3d: Vec<Vec3>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub track_id: Option<i64>,
}

fn default_confidence() -> f64 {
    crate::frame::DEFAULT_CONFIDENCE
}

#[derive(Debug, thiserror::Error)]
pub enum EstimatorError {
    #[error("Estimator unavailable: {0}")]
    Unavailable(String),

    #[error("Estimator rejected the image: {0}")]
    Rejected(String),

    #[error("Malformed estimator response: {0}")]
    InvalidResponse(String),
}

/// Black-box detector + mesh-recovery model.
#[async_trait::async_trait]
pub trait PoseEstimator: Send + Sync {
    /// Estimate every person in an encoded image (PNG/JPEG bytes).
    async fn estimate(&self, image: &[u8]) -> Result<Vec<RawPoseEstimate>, EstimatorError>;
}

/// Turn raw model outputs for one image into a normalized [`FrameRecord`].
pub fn build_frame_record(
    frame_number: u64,
    fps: f64,
    estimates: Vec<RawPoseEstimate>,
    focal: &FocalConfig,
) -> FrameRecord {
    let persons = estimates
        .into_iter()
        .enumerate()
        .map(|(index, est)| person_from_estimate(index, est, focal))
        .collect();

    FrameRecord {
        frame_number,
        timestamp: frame_timestamp(frame_number, fps),
        persons,
    }
}

fn person_from_estimate(index: usize, est: RawPoseEstimate, focal: &FocalConfig) -> PersonPose {
    let focal_length = focal.scaled_for(est.img_size);
    let camera_full = cam_crop_to_full(
        est.camera_crop,
        est.box_center,
        est.box_size,
        est.img_size,
        focal_length,
    );

    // Projection uses model-space joints; rotation is for 3D consumers only.
    let keypoints_2d = (!est.keypoints_3d.is_empty())
        .then(|| project_points(&est.keypoints_3d, camera_full, focal_length, est.img_size));

    let mut vertices = est.vertices;
    rotate_mesh_180_x(&mut vertices);
    let mut joints = est.keypoints_3d;
    rotate_mesh_180_x(&mut joints);

    let half = est.box_size / 2.0;
    let [cx, cy] = est.box_center;

    let mut pose = PersonPose::new(
        est.track_id.unwrap_or(index as i64),
        est.confidence.clamp(0.0, 1.0),
    );
    pose.camera_crop = Some(est.camera_crop);
    pose.camera_full = Some(camera_full);
    pose.bbox = Some(vec![cx - half, cy - half, cx + half, cy + half]);
    pose.mesh_vertices = (!vertices.is_empty()).then_some(vertices);
    pose.mesh_faces = est.faces.filter(|f| !f.is_empty());
    pose.keypoints_3d = (!joints.is_empty()).then_some(joints);
    pose.keypoints_2d = keypoints_2d;
    pose
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::project_point;

    fn estimate() -> RawPoseEstimate {
        RawPoseEstimate {
            vertices: vec![[0.0, 1.0, 2.0]],
            faces: Some(vec![[0, 0, 0]]),
            camera_crop: [1.0, 0.0, 0.0],
            box_center: [320.0, 240.0],
            box_size: 200.0,
            img_size: [640.0, 480.0],
            keypoints_3d: vec![[0.1, 0.2, -0.3]],
            confidence: 0.8,
            track_id: None,
        }
    }

    #[test]
    fn builds_camera_mesh_and_projection() {
        let focal = FocalConfig::default();
        let record = build_frame_record(3, 30.0, vec![estimate()], &focal);

        assert_eq!(record.frame_number, 3);
        assert!((record.timestamp - 0.1).abs() < 1e-12);
        let p = &record.persons[0];
        assert_eq!(p.track_id, 0);

        let f = focal.scaled_for([640.0, 480.0]);
        let cam = cam_crop_to_full([1.0, 0.0, 0.0], [320.0, 240.0], 200.0, [640.0, 480.0], f);
        assert_eq!(p.camera_full, Some(cam));
        assert_eq!(p.mesh_vertices, Some(vec![[0.0, -1.0, -2.0]]));
        assert_eq!(p.keypoints_3d, Some(vec![[0.1, -0.2, 0.3]]));
        assert_eq!(
            p.keypoints_2d,
            Some(vec![project_point([0.1, 0.2, -0.3], cam, f, [640.0, 480.0])])
        );
        assert_eq!(p.bbox, Some(vec![220.0, 140.0, 420.0, 340.0]));
    }

    #[test]
    fn empty_geometry_is_omitted() {
        let est = RawPoseEstimate {
            vertices: vec![],
            faces: None,
            keypoints_3d: vec![],
            track_id: Some(7),
            ..estimate()
        };
        let record = build_frame_record(0, 30.0, vec![est], &FocalConfig::default());
        let p = &record.persons[0];
        assert_eq!(p.track_id, 7);
        assert!(p.mesh_vertices.is_none());
        assert!(p.keypoints_2d.is_none());
        assert!(p.camera_full.is_some());
    }

    #[test]
    fn response_json_defaults() {
        let est: RawPoseEstimate = serde_json::from_value(serde_json::json!({
            "camera_crop": [1, 0, 0],
            "box_center": [10, 10],
            "box_size": 20,
            "img_size": [100, 100]
        }))
        .expect("deserialize");
        assert_eq!(est.confidence, 1.0);
        assert!(est.vertices.is_empty());
    }
}
