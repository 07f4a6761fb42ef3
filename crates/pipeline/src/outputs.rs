//! Per-job worker output directories.
//!
//! Every job gets `{root}/{job_id}`; the worker writes its result artifact
//! and rendered video there.

use std::path::PathBuf;

use meshpipe_core::types::JobId;

#[derive(Debug, Clone)]
pub struct JobOutputs {
    root: PathBuf,
}

impl JobOutputs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn dir_for(&self, id: JobId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Delete the job's directory and everything in it. Best-effort.
    pub async fn remove(&self, id: JobId) {
        let dir = self.dir_for(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::debug!(job_id = %id, "Removed job outputs"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(job_id = %id, path = %dir.display(), error = %e, "Failed to remove job outputs");
            }
        }
    }
}
