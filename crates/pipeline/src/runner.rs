//! The seam between admission and execution.

use std::future::Future;
use std::path::{Path, PathBuf};

use meshpipe_core::job::{FailureKind, JobFailure, JobOutcome};
use meshpipe_core::types::JobId;

/// One admitted job, handed to a [`JobRunner`].
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub job_id: JobId,
    pub input_path: PathBuf,
}

/// Executes one admitted job to completion.
///
/// Implementations must not panic on worker failure; every failure is a
/// [`JobFailure`] value.
pub trait JobRunner: Send + Sync + 'static {
    fn run(
        &self,
        request: RunRequest,
    ) -> impl Future<Output = Result<JobOutcome, JobFailure>> + Send;
}

/// Check that `path` is an existing, non-empty regular file.
pub async fn validate_input(path: &Path) -> Result<u64, JobFailure> {
    let meta = tokio::fs::metadata(path).await.map_err(|_| {
        JobFailure::new(
            FailureKind::InputNotFound,
            format!("Input video not found: {}", path.display()),
        )
    })?;
    if !meta.is_file() {
        return Err(JobFailure::new(
            FailureKind::InputNotFound,
            format!("Input is not a file: {}", path.display()),
        ));
    }
    if meta.len() == 0 {
        return Err(JobFailure::new(
            FailureKind::EmptyInput,
            format!("Input video is empty: {}", path.display()),
        ));
    }
    Ok(meta.len())
}
