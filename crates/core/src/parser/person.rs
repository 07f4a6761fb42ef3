//! Person-record extraction and normalization.

use serde_json::{Map, Value};

use super::convert::{
    as_box_size, as_f64, as_faces, as_i64, as_numbers, as_points2, as_points3, as_translation,
    as_vec2, as_vec3, first_of,
};
use super::ParseOptions;
use crate::camera::{cam_crop_to_full, project_points, rotate_mesh_180_x};
use crate::frame::{PersonPose, DEFAULT_CONFIDENCE};
use crate::types::{Face, Vec2};

pub const TRACK_ID_KEYS: &[&str] = &["track_id", "id", "person_id"];
pub const CONFIDENCE_KEYS: &[&str] = &["confidence", "score", "detection_confidence"];
pub const CAMERA_CROP_KEYS: &[&str] = &["pred_cam", "cam_crop", "camera_bbox"];
pub const CAMERA_FULL_KEYS: &[&str] = &["camera_full", "camera", "pred_cam_t"];
pub const KEYPOINTS_3D_KEYS: &[&str] = &["keypoints_3d", "joints_3d", "kp_3d", "3d_joints"];
pub const KEYPOINTS_2D_KEYS: &[&str] = &["keypoints_2d", "joints_2d", "kp_2d", "2d_joints"];
pub const VERTEX_KEYS: &[&str] = &["mesh_vertices", "vertices", "verts", "pred_vertices"];
pub const FACE_KEYS: &[&str] = &["mesh_faces", "faces", "pred_faces"];
pub const BBOX_KEYS: &[&str] = &["bbox", "bounding_box", "box"];
pub const BOX_CENTER_KEYS: &[&str] = &["center", "box_center"];
pub const BOX_SIZE_KEYS: &[&str] = &["size", "box_size"];
pub const IMAGE_SIZE_KEYS: &[&str] = &["img_size", "image_size"];

/// Returns `true` if `obj` carries any field a person record would have.
pub fn looks_like_person(obj: &Map<String, Value>) -> bool {
    [
        TRACK_ID_KEYS,
        CAMERA_CROP_KEYS,
        CAMERA_FULL_KEYS,
        KEYPOINTS_3D_KEYS,
        KEYPOINTS_2D_KEYS,
        VERTEX_KEYS,
        BBOX_KEYS,
    ]
    .iter()
    .flat_map(|keys| keys.iter())
    .any(|k| obj.contains_key(*k))
}

/// A person record before normalization, plus the raw fields the
/// normalization step consumes.
#[derive(Debug, Clone)]
pub struct ExtractedPerson {
    pub pose: PersonPose,
    pub box_center: Option<Vec2>,
    pub box_size: Option<f64>,
    pub image_size: Option<Vec2>,
}

/// Pull every known field out of a person object via its fallback chain.
///
/// Returns `None` only when `value` is not an object at all; absent fields
/// fall back to defaults.
pub fn extract_person(value: &Value, index: usize) -> Option<ExtractedPerson> {
    let obj = value.as_object()?;

    let track_id = first_of(obj, TRACK_ID_KEYS, as_i64).unwrap_or(index as i64);
    let confidence = first_of(obj, CONFIDENCE_KEYS, as_f64)
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_CONFIDENCE);

    let mut pose = PersonPose::new(track_id, confidence);
    pose.camera_crop = first_of(obj, CAMERA_CROP_KEYS, as_vec3);
    pose.camera_full = first_of(obj, CAMERA_FULL_KEYS, as_translation);
    pose.bbox = first_of(obj, BBOX_KEYS, as_numbers);
    pose.mesh_vertices = first_of(obj, VERTEX_KEYS, as_points3);
    pose.mesh_faces = first_of(obj, FACE_KEYS, as_faces);
    pose.keypoints_3d = first_of(obj, KEYPOINTS_3D_KEYS, as_points3);
    pose.keypoints_2d = first_of(obj, KEYPOINTS_2D_KEYS, as_points2);

    Some(ExtractedPerson {
        pose,
        box_center: first_of(obj, BOX_CENTER_KEYS, as_vec2),
        box_size: first_of(obj, BOX_SIZE_KEYS, as_box_size),
        image_size: first_of(obj, IMAGE_SIZE_KEYS, as_vec2),
    })
}

/// Bring an extracted person into renderer space.
///
/// 1. Derive `camera_full` from the crop camera when the tracker did not
///    report one and the crop box and image size are known.
/// 2. Project missing 2D keypoints from the model-space 3D joints.
/// 3. Rotate vertices and 3D joints 180° about X.
///
/// Mesh faces are detached and returned so the caller can keep one copy.
pub fn normalize_person(
    person: ExtractedPerson,
    frame_image_size: Option<Vec2>,
    opts: &ParseOptions,
) -> (PersonPose, Option<Vec<Face>>) {
    let ExtractedPerson {
        mut pose,
        box_center,
        box_size,
        image_size,
    } = person;
    let img_size = image_size.or(frame_image_size).or(opts.image_size);

    if let Some(img) = img_size {
        let focal = opts.focal.scaled_for(img);

        if pose.camera_full.is_none() {
            if let (Some(crop), Some(center), Some(size)) = (pose.camera_crop, box_center, box_size)
            {
                pose.camera_full = Some(cam_crop_to_full(crop, center, size, img, focal));
            }
        }

        if pose.keypoints_2d.is_none() {
            if let (Some(joints), Some(cam)) = (&pose.keypoints_3d, pose.camera_full) {
                pose.keypoints_2d = Some(project_points(joints, cam, focal, img));
            }
        }
    }

    if let Some(vertices) = pose.mesh_vertices.as_mut() {
        rotate_mesh_180_x(vertices);
    }
    if let Some(joints) = pose.keypoints_3d.as_mut() {
        rotate_mesh_180_x(joints);
    }

    let faces = pose.mesh_faces.take();
    (pose, faces)
}
