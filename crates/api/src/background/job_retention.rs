//! Periodic eviction of finished jobs from the in-memory registry.
//!
//! Terminal jobs past the retention TTL, or beyond the retained-job cap,
//! are dropped along with their worker logs and output directories. Queued
//! and processing jobs are never touched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use meshpipe_core::types::Timestamp;
use meshpipe_pipeline::{JobLogs, JobOutputs, JobRegistry, RetentionPolicy};
use tokio_util::sync::CancellationToken;

/// How often the sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the retention loop until `cancel` is triggered.
pub async fn run(
    registry: Arc<JobRegistry>,
    logs: JobLogs,
    outputs: JobOutputs,
    policy: RetentionPolicy,
    cancel: CancellationToken,
) {
    run_every(SWEEP_INTERVAL, registry, logs, outputs, policy, cancel).await;
}

pub async fn run_every(
    period: Duration,
    registry: Arc<JobRegistry>,
    logs: JobLogs,
    outputs: JobOutputs,
    policy: RetentionPolicy,
    cancel: CancellationToken,
) {
    tracing::info!(
        ttl_secs = policy.ttl.as_secs(),
        max_terminal = policy.max_terminal,
        interval_secs = period.as_secs(),
        "Job retention task started"
    );

    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = interval.tick() => {
                let evicted = sweep(&registry, &logs, &outputs, &policy, Utc::now()).await;
                if evicted > 0 {
                    tracing::info!(evicted, "Job retention: evicted finished jobs");
                } else {
                    tracing::debug!("Job retention: nothing to evict");
                }
            }
        }
    }
}

/// One eviction pass. Returns the number of jobs removed.
pub async fn sweep(
    registry: &JobRegistry,
    logs: &JobLogs,
    outputs: &JobOutputs,
    policy: &RetentionPolicy,
    now: Timestamp,
) -> usize {
    let evicted = registry.evict(policy, now).await;
    for id in &evicted {
        logs.remove(*id).await;
        outputs.remove(*id).await;
    }
    evicted.len()
}

#[cfg(test)]
mod tests {
    use meshpipe_core::job::{FailureKind, JobFailure};
    use meshpipe_pipeline::Transition;

    use super::*;

    #[tokio::test]
    async fn sweep_evicts_expired_jobs_and_logs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logs = JobLogs::new(dir.path().join("logs"));
        let outputs = JobOutputs::new(dir.path().join("outputs"));
        let registry = JobRegistry::new();

        let old = registry.create("/old.mp4".into()).await;
        let queued = registry.create("/queued.mp4".into()).await;
        registry
            .transition_at(
                old.id,
                Transition::Fail(JobFailure::new(FailureKind::NoOutputProduced, "nothing")),
                Utc::now() - chrono::Duration::hours(3),
            )
            .await
            .expect("fail");
        tokio::fs::create_dir_all(logs.dir()).await.expect("log dir");
        tokio::fs::write(logs.path_for(old.id), "worker output\n")
            .await
            .expect("write log");
        for id in [old.id, queued.id] {
            tokio::fs::create_dir_all(outputs.dir_for(id)).await.expect("output dir");
            tokio::fs::write(outputs.dir_for(id).join("track.json"), b"{}")
                .await
                .expect("write artifact");
        }

        let policy = RetentionPolicy {
            ttl: Duration::from_secs(3600),
            max_terminal: 100,
        };
        let evicted = sweep(&registry, &logs, &outputs, &policy, Utc::now()).await;

        assert_eq!(evicted, 1);
        assert!(!registry.contains(old.id).await);
        assert!(registry.contains(queued.id).await);
        assert!(!logs.path_for(old.id).exists());
    }

    #[tokio::test]
    async fn loop_stops_on_cancel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_every(
            Duration::from_millis(10),
            Arc::new(JobRegistry::new()),
            JobLogs::new(dir.path()),
            JobOutputs::new(dir.path()),
            RetentionPolicy::default(),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("stopped in time")
            .expect("task ok");
    }
}
