use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use meshpipe_core::error::CoreError;
use meshpipe_core::estimator::EstimatorError;
use meshpipe_core::job::JobFailure;
use meshpipe_pipeline::AdmissionError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent `{ "error", "code" }`
/// JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Submission refused before a job was created (missing or empty input).
    #[error("{0}")]
    Rejected(JobFailure),

    #[error(transparent)]
    Estimator(#[from] EstimatorError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<AdmissionError> for AppError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Rejected(failure) => AppError::Rejected(failure),
            AdmissionError::Unavailable => AppError::ServiceUnavailable(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            },

            AppError::Rejected(failure) => (
                StatusCode::BAD_REQUEST,
                failure.kind.code(),
                failure.message.clone(),
            ),

            // --- Single-frame estimator ---
            AppError::Estimator(err) => match err {
                EstimatorError::Unavailable(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ESTIMATOR_UNAVAILABLE",
                    err.to_string(),
                ),
                EstimatorError::Rejected(_) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "ESTIMATOR_REJECTED",
                    err.to_string(),
                ),
                EstimatorError::InvalidResponse(_) => {
                    tracing::error!(error = %err, "Estimator returned a malformed response");
                    (StatusCode::BAD_GATEWAY, "ESTIMATOR_ERROR", err.to_string())
                }
            },

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                msg.clone(),
            ),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
