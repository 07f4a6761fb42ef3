//! Per-frame access to a completed job's results.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::Json;
use meshpipe_core::error::CoreError;
use meshpipe_core::ffmpeg::extract_frame_png;
use meshpipe_core::frame::{FrameRecord, ParsedArtifact};
use meshpipe_core::job::{Job, JobStatus};
use meshpipe_core::render::{blank_canvas, decode_image, draw_frame_overlay, encode_png};
use meshpipe_core::types::JobId;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Canvas size when the job has neither a rendered video nor probe data.
const FALLBACK_CANVAS: (u32, u32) = (640, 480);

/// A completed job's parsed result, or the reason there is none.
fn completed_result(job: &Job) -> AppResult<Arc<ParsedArtifact>> {
    match (job.status, &job.result) {
        (JobStatus::Complete, Some(result)) => Ok(Arc::clone(result)),
        (status, _) => Err(AppError::Core(CoreError::Conflict(format!(
            "Job {} is {}, frames are only available once complete",
            job.id,
            status.as_str()
        )))),
    }
}

fn find_frame(result: &ParsedArtifact, index: u64) -> AppResult<FrameRecord> {
    result.frame(index).cloned().ok_or_else(|| {
        AppError::Core(CoreError::NotFound {
            entity: "frame",
            id: index.to_string(),
        })
    })
}

/// GET /api/v1/jobs/{id}/frames/{index}
pub async fn get_frame(
    State(state): State<AppState>,
    Path((job_id, index)): Path<(JobId, u64)>,
) -> AppResult<impl IntoResponse> {
    let job = state.registry().get(job_id).await?;
    let frame = find_frame(&*completed_result(&job)?, index)?;
    Ok(Json(DataResponse { data: frame }))
}

/// GET /api/v1/jobs/{id}/frames/{index}/render
///
/// PNG of the frame with projected mesh vertices and 2D keypoints drawn on
/// top. The background is the matching frame of the worker's rendered video
/// when one exists, otherwise a blank canvas of the source video's size.
pub async fn render_frame(
    State(state): State<AppState>,
    Path((job_id, index)): Path<(JobId, u64)>,
) -> AppResult<impl IntoResponse> {
    let job = state.registry().get(job_id).await?;
    let frame = find_frame(&*completed_result(&job)?, index)?;

    let background = match &job.rendered_video_path {
        Some(video) => match extract_frame_png(video, index).await {
            Ok(png) => Some(png),
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    frame = index,
                    error = %e,
                    "Frame grab failed, rendering on blank canvas",
                );
                None
            }
        },
        None => None,
    };
    let (width, height) = job
        .video
        .map(|v| (v.width, v.height))
        .unwrap_or(FALLBACK_CANVAS);
    let focal = state.focal;

    let png = tokio::task::spawn_blocking(move || {
        let mut img = match background.as_deref().map(decode_image) {
            Some(Ok(img)) => img,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Undecodable frame grab, rendering on blank canvas");
                blank_canvas(width, height)
            }
            None => blank_canvas(width, height),
        };
        draw_frame_overlay(&mut img, &frame, &focal);
        encode_png(&img)
    })
    .await
    .map_err(|e| AppError::InternalError(format!("Render task failed: {e}")))?
    .map_err(|e| AppError::InternalError(format!("PNG encoding failed: {e}")))?;

    Ok(([(CONTENT_TYPE, "image/png")], png))
}
