//! Handlers for the `/jobs` resource and the GPU pool status.

use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use meshpipe_core::job::{Job, JobFailure, JobStatus};
use meshpipe_core::types::{JobId, Timestamp};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /api/v1/jobs`.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitJob {
    /// Server-local path of the uploaded video.
    #[validate(length(min = 1, message = "video_path must not be empty"))]
    pub video_path: String,
}

/// Full job snapshot plus its current queue position.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
}

/// Job row for listings: everything but the frame data.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub input_path: PathBuf,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        Self {
            frame_count: job.frame_count(),
            id: job.id,
            status: job.status,
            input_path: job.input_path,
            submitted_at: job.submitted_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error,
        }
    }
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Queue a video for processing. Returns 202 immediately; the job is
/// `processing` if the GPU was free and `queued` otherwise.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<SubmitJob>,
) -> AppResult<impl IntoResponse> {
    input
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let submission = state
        .admission
        .submit(PathBuf::from(input.video_path.trim()))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: JobResponse {
                job: submission.job,
                queue_position: submission.queue_position,
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// List / Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// All retained jobs in submission order, without frame data.
pub async fn list_jobs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs: Vec<JobSummary> = state
        .registry()
        .list()
        .await
        .into_iter()
        .map(JobSummary::from)
        .collect();
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.registry().get(job_id).await?;
    let queue_position = if job.status == JobStatus::Queued {
        state.admission.queue_position(job_id).await?
    } else {
        None
    };
    Ok(Json(DataResponse {
        data: JobResponse {
            job,
            queue_position,
        },
    }))
}

// ---------------------------------------------------------------------------
// Log
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/log
///
/// Worker output captured so far, as plain text. Available while the job
/// is still running.
pub async fn get_job_log(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    // 404 for unknown jobs rather than an empty log.
    state.registry().get(job_id).await?;

    let text = state
        .logs
        .read(job_id)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to read log for job {job_id}: {e}")))?;

    Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], text))
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// GET /api/v1/pool
///
/// GPU occupancy, queue length and a rough wait estimate.
pub async fn pool_status(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let status = state.admission.status().await?;
    Ok(Json(DataResponse { data: status }))
}
