//! Frame overlay rendering: projected mesh vertices and 2D keypoints drawn
//! over a video frame (or a blank canvas of the source size).

use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};

use crate::camera::{project_point, rotate_180_x, FocalConfig};
use crate::frame::FrameRecord;

const BACKGROUND: Rgb<u8> = Rgb([24, 24, 28]);
const KEYPOINT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Per-track mesh colors, cycled by track id.
const TRACK_PALETTE: &[Rgb<u8>] = &[
    Rgb([230, 90, 70]),
    Rgb([80, 170, 230]),
    Rgb([120, 200, 90]),
    Rgb([240, 190, 60]),
    Rgb([180, 110, 220]),
    Rgb([60, 200, 190]),
];

/// Every Nth mesh vertex is plotted; full meshes are ~7k vertices.
const VERTEX_STRIDE: usize = 4;

pub fn blank_canvas(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width.max(1), height.max(1), BACKGROUND)
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, image::ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Color used for a track's mesh.
pub fn track_color(track_id: i64) -> Rgb<u8> {
    let idx = track_id.rem_euclid(TRACK_PALETTE.len() as i64) as usize;
    TRACK_PALETTE[idx]
}

/// Draw every person of `frame` onto `img`.
///
/// Stored vertices are in renderer space (rotated 180° about X); they are
/// rotated back before projection so they line up with the keypoints.
pub fn draw_frame_overlay(img: &mut RgbImage, frame: &FrameRecord, focal: &FocalConfig) {
    let img_size = [img.width() as f64, img.height() as f64];
    let focal_length = focal.scaled_for(img_size);

    for person in &frame.persons {
        let color = track_color(person.track_id);

        if let (Some(vertices), Some(cam)) = (&person.mesh_vertices, person.camera_full) {
            for v in vertices.iter().step_by(VERTEX_STRIDE) {
                let [u, w] = project_point(rotate_180_x(*v), cam, focal_length, img_size);
                plot(img, u, w, 0, color);
            }
        }

        if let Some(keypoints) = &person.keypoints_2d {
            for [u, w] in keypoints {
                plot(img, *u, *w, 2, KEYPOINT_COLOR);
            }
        }
    }
}

/// Fill a `(2r+1)²` square centred on `(x, y)`, clipped to the image.
fn plot(img: &mut RgbImage, x: f64, y: f64, radius: i64, color: Rgb<u8>) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    // Reject off-canvas points before the integer cast.
    let reach = radius as f64 + 1.0;
    let on_canvas = |v: f64, size: i64| v.is_finite() && v > -reach && v < size as f64 + reach;
    if !on_canvas(x, w) || !on_canvas(y, h) {
        return;
    }
    let (cx, cy) = (x.round() as i64, y.round() as i64);
    for py in (cy - radius)..=(cy + radius) {
        for px in (cx - radius)..=(cx + radius) {
            if (0..w).contains(&px) && (0..h).contains(&py) {
                img.put_pixel(px as u32, py as u32, color);
            }
        }
    }
}
