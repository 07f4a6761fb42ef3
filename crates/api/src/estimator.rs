//! HTTP client for the single-frame inference sidecar.
//!
//! The sidecar hosts the detector and mesh-recovery model. It accepts raw
//! image bytes at `POST {base}/estimate` and answers with
//! `{ "persons": [RawPoseEstimate, ...] }`.

use std::time::Duration;

use meshpipe_core::estimator::{EstimatorError, PoseEstimator, RawPoseEstimate};
use serde::Deserialize;

/// Per-request timeout; model inference on one frame is well under this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct EstimateResponse {
    #[serde(default)]
    persons: Vec<RawPoseEstimate>,
}

pub struct HttpPoseEstimator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPoseEstimator {
    pub fn new(base_url: impl Into<String>) -> Result<Self, EstimatorError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EstimatorError::Unavailable(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl PoseEstimator for HttpPoseEstimator {
    async fn estimate(&self, image: &[u8]) -> Result<Vec<RawPoseEstimate>, EstimatorError> {
        let response = self
            .client
            .post(format!("{}/estimate", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| EstimatorError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(EstimatorError::Rejected(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body, "Estimator request failed");
            return Err(EstimatorError::Unavailable(format!("{status}: {body}")));
        }

        let parsed: EstimateResponse = response
            .json()
            .await
            .map_err(|e| EstimatorError::InvalidResponse(e.to_string()))?;
        tracing::debug!(persons = parsed.persons.len(), "Estimator responded");
        Ok(parsed.persons)
    }
}
