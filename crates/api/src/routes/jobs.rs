//! Route definitions for the `/jobs` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::{frames, jobs};
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                              -> list_jobs
/// POST   /                              -> submit_job
/// GET    /{id}                          -> get_job
/// GET    /{id}/log                      -> get_job_log
/// GET    /{id}/frames/{index}           -> get_frame
/// GET    /{id}/frames/{index}/render    -> render_frame
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/log", get(jobs::get_job_log))
        .route("/{id}/frames/{index}", get(frames::get_frame))
        .route("/{id}/frames/{index}/render", get(frames::render_frame))
}
