use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;

use crate::handlers::pose;
use crate::state::AppState;

/// Largest accepted single-frame upload.
const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Routes mounted at `/pose`.
///
/// ```text
/// POST   /frame    -> estimate_frame
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/frame", post(pose::estimate_frame))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES))
}
