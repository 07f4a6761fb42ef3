//! Camera-space coordinate transforms.
//!
//! Pure functions binding mesh-recovery output to image space:
//!
//! - [`cam_crop_to_full`] re-expresses a weak-perspective camera estimated on
//!   a person crop as a full-image perspective translation.
//! - [`rotate_180_x`] flips model-space handedness (negate Y and Z).
//! - [`project_point`] projects a 3D point to pixels with the renderer's sign
//!   conventions.
//!
//! The constants and operation order here are a numeric contract: outputs
//! must match the renderer bit-for-bit so keypoints and meshes stay aligned.

use crate::types::{Vec2, Vec3};

/// Added to the scaled box size so a degenerate scale never divides by zero.
pub const BOX_SIZE_EPSILON: f64 = 1e-9;

/// Minimum depth used by [`project_point`]; points behind the camera are
/// pinned here instead of flipping sign.
pub const MIN_PROJECTION_DEPTH: f64 = 0.01;

/// Focal length of the mesh-recovery model at its native crop resolution.
pub const DEFAULT_FOCAL_LENGTH: f64 = 5000.0;

/// Side length of the square crop fed to the mesh-recovery model.
pub const DEFAULT_MODEL_IMAGE_SIZE: f64 = 256.0;

/// Focal length model parameters, scaled per image by [`FocalConfig::scaled_for`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocalConfig {
    pub focal_length: f64,
    pub model_image_size: f64,
}

impl Default for FocalConfig {
    fn default() -> Self {
        Self {
            focal_length: DEFAULT_FOCAL_LENGTH,
            model_image_size: DEFAULT_MODEL_IMAGE_SIZE,
        }
    }
}

impl FocalConfig {
    /// Focal length in full-image pixels for an image of `img_size = [w, h]`.
    pub fn scaled_for(&self, img_size: Vec2) -> f64 {
        scaled_focal_length(self.focal_length, self.model_image_size, img_size)
    }
}

/// `f_base / model_input_size * max(w, h)`.
pub fn scaled_focal_length(focal_base: f64, model_image_size: f64, img_size: Vec2) -> f64 {
    focal_base / model_image_size * img_size[0].max(img_size[1])
}

/// Convert crop-local weak-perspective camera `[s, tx, ty]` into a full-image
/// camera translation `[tx', ty', tz]`.
///
/// `box_center` and `box_size` are the detector crop in full-image pixels,
/// `img_size` is `[w, h]` and `focal_length` is already scaled to the full
/// image (see [`scaled_focal_length`]).
pub fn cam_crop_to_full(
    cam_crop: Vec3,
    box_center: Vec2,
    box_size: f64,
    img_size: Vec2,
    focal_length: f64,
) -> Vec3 {
    let [s, tx, ty] = cam_crop;
    let [cx, cy] = box_center;
    let w_2 = img_size[0] / 2.0;
    let h_2 = img_size[1] / 2.0;

    let bs = box_size * s + BOX_SIZE_EPSILON;
    let tz = 2.0 * focal_length / bs;
    let full_tx = 2.0 * (cx - w_2) / bs + tx;
    let full_ty = 2.0 * (cy - h_2) / bs + ty;

    [full_tx, full_ty, tz]
}

/// 180° rotation about the X axis.
#[inline]
pub fn rotate_180_x(point: Vec3) -> Vec3 {
    [point[0], -point[1], -point[2]]
}

/// Apply [`rotate_180_x`] to every point in place.
pub fn rotate_mesh_180_x(points: &mut [Vec3]) {
    for p in points.iter_mut() {
        p[1] = -p[1];
        p[2] = -p[2];
    }
}

/// Project a 3D point to image pixels.
///
/// ```text
/// x_cam = x - tx
/// y_cam = -(y - ty)
/// z_cam = max(-z, 0.01)
/// u = f * x_cam / z_cam + w / 2
/// v = f * y_cam / z_cam + h / 2
/// ```
pub fn project_point(point: Vec3, camera_full: Vec3, focal_length: f64, img_size: Vec2) -> Vec2 {
    let [tx, ty, _] = camera_full;
    let cx_img = img_size[0] / 2.0;
    let cy_img = img_size[1] / 2.0;

    let x_cam = point[0] - tx;
    let y_cam = -(point[1] - ty);
    let z_cam = (-point[2]).max(MIN_PROJECTION_DEPTH);

    [
        focal_length * x_cam / z_cam + cx_img,
        focal_length * y_cam / z_cam + cy_img,
    ]
}

/// [`project_point`] over a slice.
pub fn project_points(
    points: &[Vec3],
    camera_full: Vec3,
    focal_length: f64,
    img_size: Vec2,
) -> Vec<Vec2> {
    points
        .iter()
        .map(|p| project_point(*p, camera_full, focal_length, img_size))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
