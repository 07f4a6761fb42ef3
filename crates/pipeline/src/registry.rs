//! In-memory job table.
//!
//! [`JobRegistry`] holds every known [`Job`] behind a single `RwLock`:
//! status polling takes the read side, and the admission controller and
//! orchestrator are the only writers. Transition rules live on [`Job`]
//! itself, so a terminal job can never be modified here.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use chrono::Utc;
use meshpipe_core::error::CoreError;
use meshpipe_core::job::{Job, JobFailure, JobOutcome, JobStatus};
use meshpipe_core::types::{JobId, Timestamp};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::retention::RetentionPolicy;

/// A requested lifecycle step.
#[derive(Debug)]
pub enum Transition {
    Start,
    Complete(JobOutcome),
    Fail(JobFailure),
}

/// Number of jobs in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub processing: usize,
    pub complete: usize,
    pub error: usize,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    /// Submission order.
    order: VecDeque<JobId>,
}

#[derive(Default)]
pub struct JobRegistry {
    inner: RwLock<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new queued job and return a snapshot of it.
    pub async fn create(&self, input_path: PathBuf) -> Job {
        let job = Job::new(JobId::new_v4(), input_path, Utc::now());
        let mut inner = self.inner.write().await;
        inner.order.push_back(job.id);
        inner.jobs.insert(job.id, job.clone());
        job
    }

    pub async fn get(&self, id: JobId) -> Result<Job, CoreError> {
        self.inner
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    pub async fn contains(&self, id: JobId) -> bool {
        self.inner.read().await.jobs.contains_key(&id)
    }

    /// All jobs in submission order.
    pub async fn list(&self) -> Vec<Job> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect()
    }

    /// Apply `transition` and return the updated snapshot.
    pub async fn transition(&self, id: JobId, transition: Transition) -> Result<Job, CoreError> {
        self.transition_at(id, transition, Utc::now()).await
    }

    pub async fn transition_at(
        &self,
        id: JobId,
        transition: Transition,
        now: Timestamp,
    ) -> Result<Job, CoreError> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        let from = job.status;

        match transition {
            Transition::Start => job.start(now)?,
            Transition::Complete(outcome) => job.complete(outcome, now)?,
            Transition::Fail(failure) => job.fail(failure, now)?,
        }

        tracing::debug!(
            job_id = %id,
            from = from.as_str(),
            to = job.status.as_str(),
            "Job transitioned",
        );
        Ok(job.clone())
    }

    pub async fn counts(&self) -> StatusCounts {
        let inner = self.inner.read().await;
        inner
            .jobs
            .values()
            .fold(StatusCounts::default(), |mut counts, job| {
                match job.status {
                    JobStatus::Queued => counts.queued += 1,
                    JobStatus::Processing => counts.processing += 1,
                    JobStatus::Complete => counts.complete += 1,
                    JobStatus::Error => counts.error += 1,
                }
                counts
            })
    }

    /// Drop terminal jobs selected by `policy`. Returns the evicted ids.
    pub async fn evict(&self, policy: &RetentionPolicy, now: Timestamp) -> Vec<JobId> {
        let mut inner = self.inner.write().await;
        let evicted = policy.select_evictions(inner.jobs.values(), now);
        if evicted.is_empty() {
            return evicted;
        }
        for id in &evicted {
            inner.jobs.remove(id);
        }
        let Inner { jobs, order } = &mut *inner;
        order.retain(|id| jobs.contains_key(id));
        evicted
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn not_found(id: JobId) -> CoreError {
    CoreError::NotFound {
        entity: "job",
        id: id.to_string(),
    }
}
