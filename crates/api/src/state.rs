use std::sync::Arc;

use meshpipe_core::camera::FocalConfig;
use meshpipe_core::estimator::PoseEstimator;
use meshpipe_pipeline::{AdmissionController, JobLogs, JobRegistry};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Handle to the single-GPU admission actor.
    pub admission: AdmissionController,
    /// Per-job worker log sink.
    pub logs: JobLogs,
    /// Single-frame inference backend; `None` disables `/pose/frame`.
    pub estimator: Option<Arc<dyn PoseEstimator>>,
    pub focal: FocalConfig,
    /// Frame rate assumed for single images and unprobed videos.
    pub default_fps: f64,
}

impl AppState {
    pub fn registry(&self) -> &Arc<JobRegistry> {
        self.admission.registry()
    }
}
