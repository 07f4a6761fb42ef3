use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether a job currently holds the GPU.
    pub gpu_busy: bool,
    /// Jobs waiting for the GPU.
    pub queue_length: usize,
}

/// GET /health -- service health plus a glance at the GPU queue.
///
/// Reports `degraded` when the admission controller has stopped.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, gpu_busy, queue_length) = match state.admission.status().await {
        Ok(pool) => ("ok", pool.gpu_busy, pool.queue_length),
        Err(e) => {
            tracing::warn!(error = %e, "Health check: admission controller unavailable");
            ("degraded", false, 0)
        }
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        gpu_busy,
        queue_length,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
