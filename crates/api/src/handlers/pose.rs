//! Synchronous single-frame pose estimation.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use meshpipe_core::estimator::build_frame_record;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/pose/frame
///
/// Body is an encoded image (PNG/JPEG). The estimator's raw outputs go
/// through the same camera transforms as tracker results, and the response
/// is a single frame record numbered 0.
pub async fn estimate_frame(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let estimator = state.estimator.as_ref().ok_or_else(|| {
        AppError::ServiceUnavailable("No pose estimator is configured".into())
    })?;
    if body.is_empty() {
        return Err(AppError::BadRequest("Request body must contain an image".into()));
    }

    let estimates = estimator.estimate(&body).await?;
    tracing::debug!(persons = estimates.len(), "Single-frame estimate");

    let frame = build_frame_record(0, state.default_fps, estimates, &state.focal);
    Ok(Json(DataResponse { data: frame }))
}
