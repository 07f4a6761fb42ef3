//! Per-job worker log sink.
//!
//! Each job's combined worker output is appended to `{dir}/{job_id}.log`
//! while the worker runs, so the log can be read at any point.

use std::path::{Path, PathBuf};

use meshpipe_core::types::JobId;

#[derive(Debug, Clone)]
pub struct JobLogs {
    dir: PathBuf,
}

impl JobLogs {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{id}.log"))
    }

    /// Everything logged for `id` so far. A job that has not started yet has
    /// an empty log.
    pub async fn read(&self, id: JobId) -> std::io::Result<String> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    /// Best-effort removal; failures are logged, never returned.
    pub async fn remove(&self, id: JobId) {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(job_id = %id, path = %path.display(), error = %e, "Failed to remove job log");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logs = JobLogs::new(dir.path());
        assert_eq!(logs.read(JobId::new_v4()).await.expect("read"), "");
    }

    #[tokio::test]
    async fn read_and_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logs = JobLogs::new(dir.path());
        let id = JobId::new_v4();
        tokio::fs::write(logs.path_for(id), "line one\n").await.expect("write");

        assert_eq!(logs.read(id).await.expect("read"), "line one\n");
        logs.remove(id).await;
        assert!(!logs.path_for(id).exists());
        // Removing twice is harmless.
        logs.remove(id).await;
    }
}
