//! Admission controller: at most one job on the GPU, the rest queue FIFO.
//!
//! A single actor task owns the queue and the active slot. Submissions and
//! status queries reach it over a command channel; finished runs come back
//! over a second channel. Because only the actor touches the queue, freeing
//! the slot and dispatching the next job happen in one step with no window
//! for another submission to slip in between.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use meshpipe_core::job::{FailureKind, Job, JobFailure, JobOutcome};
use meshpipe_core::types::JobId;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::registry::{JobRegistry, StatusCounts, Transition};
use crate::runner::{validate_input, JobRunner, RunRequest};

/// Rough per-job duration used for the queue wait estimate.
pub const ESTIMATED_SECS_PER_JOB: u64 = 60;

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The input failed validation; no job was created.
    #[error("{0}")]
    Rejected(JobFailure),

    #[error("Admission controller is not running")]
    Unavailable,
}

/// Result of a successful submission.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub job: Job,
    /// 1-based position in the wait queue; `None` when admitted immediately.
    pub queue_position: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub gpu_busy: bool,
    pub active_job_id: Option<JobId>,
    pub queue_length: usize,
    pub estimated_wait_secs: u64,
    pub queued_job_ids: Vec<JobId>,
    pub jobs: StatusCounts,
}

enum Command {
    Submit {
        input_path: PathBuf,
        reply: oneshot::Sender<Submission>,
    },
    Status {
        reply: oneshot::Sender<PoolStatus>,
    },
    QueuePosition {
        job_id: JobId,
        reply: oneshot::Sender<Option<usize>>,
    },
}

struct Finished {
    job_id: JobId,
    result: Result<JobOutcome, JobFailure>,
}

struct Active {
    job_id: JobId,
    abort: AbortHandle,
}

/// Cloneable handle to the admission actor.
#[derive(Clone)]
pub struct AdmissionController {
    tx: mpsc::Sender<Command>,
    registry: Arc<JobRegistry>,
}

impl AdmissionController {
    /// Start the actor. It runs until `cancel` fires, then aborts the active
    /// run (killing its worker), records that job as failed and exits.
    pub fn spawn<R: JobRunner>(
        registry: Arc<JobRegistry>,
        runner: Arc<R>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = Dispatcher {
            registry: Arc::clone(&registry),
            runner,
            queue: VecDeque::new(),
            active: None,
        };
        let handle = tokio::spawn(actor.run(rx, cancel));
        (Self { tx, registry }, handle)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Validate `input_path`, create a job and queue or admit it. Never waits
    /// for the job itself.
    pub async fn submit(&self, input_path: PathBuf) -> Result<Submission, AdmissionError> {
        validate_input(&input_path)
            .await
            .map_err(AdmissionError::Rejected)?;
        self.request(|reply| Command::Submit { input_path, reply })
            .await
    }

    pub async fn status(&self) -> Result<PoolStatus, AdmissionError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// 1-based queue position of `job_id`, or `None` if it is not waiting.
    pub async fn queue_position(&self, job_id: JobId) -> Result<Option<usize>, AdmissionError> {
        self.request(|reply| Command::QueuePosition { job_id, reply })
            .await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, AdmissionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| AdmissionError::Unavailable)?;
        rx.await.map_err(|_| AdmissionError::Unavailable)
    }
}

struct Dispatcher<R> {
    registry: Arc<JobRegistry>,
    runner: Arc<R>,
    queue: VecDeque<RunRequest>,
    active: Option<Active>,
}

impl<R: JobRunner> Dispatcher<R> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, cancel: CancellationToken) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Finished>();
        tracing::info!("Admission controller started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Some(active) = self.active.take() {
                        tracing::warn!(job_id = %active.job_id, "Aborting active job on shutdown");
                        active.abort.abort();
                        let failure = JobFailure::new(
                            FailureKind::WorkerUnknownError,
                            "Service shut down while the job was running",
                        );
                        if let Err(e) = self.registry.transition(active.job_id, Transition::Fail(failure)).await {
                            tracing::error!(job_id = %active.job_id, error = %e, "Failed to record shutdown");
                        }
                    }
                    tracing::info!(queued = self.queue.len(), "Admission controller shutting down");
                    break;
                }
                Some(finished) = done_rx.recv() => {
                    self.on_finished(finished).await;
                    self.dispatch_next(&done_tx).await;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle(command, &done_tx).await,
                    None => break,
                },
            }
        }
    }

    async fn handle(&mut self, command: Command, done_tx: &mpsc::UnboundedSender<Finished>) {
        match command {
            Command::Submit { input_path, reply } => {
                let job = self.registry.create(input_path.clone()).await;
                self.queue.push_back(RunRequest {
                    job_id: job.id,
                    input_path,
                });
                self.dispatch_next(done_tx).await;

                let queue_position = self.position_of(job.id);
                tracing::info!(
                    job_id = %job.id,
                    queue_position = queue_position.unwrap_or(0),
                    "Job submitted",
                );
                let job = self.registry.get(job.id).await.unwrap_or(job);
                let _ = reply.send(Submission {
                    job,
                    queue_position,
                });
            }
            Command::Status { reply } => {
                let queue_length = self.queue.len();
                let status = PoolStatus {
                    gpu_busy: self.active.is_some(),
                    active_job_id: self.active.as_ref().map(|a| a.job_id),
                    queue_length,
                    estimated_wait_secs: queue_length as u64 * ESTIMATED_SECS_PER_JOB,
                    queued_job_ids: self.queue.iter().map(|r| r.job_id).collect(),
                    jobs: self.registry.counts().await,
                };
                let _ = reply.send(status);
            }
            Command::QueuePosition { job_id, reply } => {
                let _ = reply.send(self.position_of(job_id));
            }
        }
    }

    fn position_of(&self, job_id: JobId) -> Option<usize> {
        self.queue
            .iter()
            .position(|r| r.job_id == job_id)
            .map(|i| i + 1)
    }

    /// Fill the free slot from the head of the queue.
    async fn dispatch_next(&mut self, done_tx: &mpsc::UnboundedSender<Finished>) {
        while self.active.is_none() {
            let Some(request) = self.queue.pop_front() else {
                return;
            };
            let job_id = request.job_id;

            if let Err(e) = self.registry.transition(job_id, Transition::Start).await {
                tracing::error!(job_id = %job_id, error = %e, "Cannot start job, skipping");
                continue;
            }

            let runner = Arc::clone(&self.runner);
            let run = tokio::spawn(async move { runner.run(request).await });
            let abort = run.abort_handle();

            let done = done_tx.clone();
            tokio::spawn(async move {
                let result = match run.await {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => Err(JobFailure::new(
                        FailureKind::WorkerUnknownError,
                        "Job runner panicked",
                    )),
                    Err(_) => Err(JobFailure::new(
                        FailureKind::WorkerUnknownError,
                        "Job runner was cancelled",
                    )),
                };
                let _ = done.send(Finished { job_id, result });
            });

            tracing::info!(job_id = %job_id, queued = self.queue.len(), "Job dispatched");
            self.active = Some(Active { job_id, abort });
        }
    }

    async fn on_finished(&mut self, finished: Finished) {
        let Finished { job_id, result } = finished;
        if self.active.as_ref().is_some_and(|a| a.job_id == job_id) {
            self.active = None;
        }

        let transition = match result {
            Ok(outcome) => {
                tracing::info!(
                    job_id = %job_id,
                    frames = outcome.result.frames.len(),
                    "Job complete",
                );
                Transition::Complete(outcome)
            }
            Err(failure) => {
                tracing::warn!(
                    job_id = %job_id,
                    kind = failure.kind.code(),
                    error = %failure.message,
                    "Job failed",
                );
                Transition::Fail(failure)
            }
        };

        if let Err(e) = self.registry.transition(job_id, transition).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record job result");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use meshpipe_core::frame::ParsedArtifact;
    use meshpipe_core::job::JobStatus;
    use tokio::sync::Semaphore;

    use super::*;

    /// Runner that blocks until the test releases a permit. Inputs named
    /// `fail*` fail, inputs named `panic*` panic.
    struct GatedRunner {
        gate: Semaphore,
        running: AtomicUsize,
        max_running: AtomicUsize,
        started: Mutex<Vec<JobId>>,
    }

    impl GatedRunner {
        fn new() -> Self {
            Self {
                gate: Semaphore::new(0),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                started: Mutex::new(Vec::new()),
            }
        }

        fn release(&self, n: usize) {
            self.gate.add_permits(n);
        }

        fn started(&self) -> Vec<JobId> {
            self.started.lock().expect("lock").clone()
        }
    }

    impl JobRunner for GatedRunner {
        async fn run(&self, request: RunRequest) -> Result<JobOutcome, JobFailure> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            self.started.lock().expect("lock").push(request.job_id);

            self.gate.acquire().await.expect("gate").forget();
            self.running.fetch_sub(1, Ordering::SeqCst);

            let name = request
                .input_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if name.starts_with("panic") {
                panic!("runner exploded");
            }
            if name.starts_with("fail") {
                return Err(JobFailure::new(FailureKind::Timeout, "too slow"));
            }
            Ok(JobOutcome {
                output_path: request.input_path.with_extension("json"),
                rendered_video_path: None,
                video: None,
                result: Arc::new(ParsedArtifact::default()),
            })
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        runner: Arc<GatedRunner>,
        controller: AdmissionController,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    }

    fn harness() -> Harness {
        let runner = Arc::new(GatedRunner::new());
        let cancel = CancellationToken::new();
        let (controller, handle) =
            AdmissionController::spawn(Arc::new(JobRegistry::new()), Arc::clone(&runner), cancel.clone());
        Harness {
            dir: tempfile::tempdir().expect("tempdir"),
            runner,
            controller,
            cancel,
            handle,
        }
    }

    impl Harness {
        fn video(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, b"video").expect("write video");
            path
        }

        async fn submit(&self, name: &str) -> Submission {
            self.controller.submit(self.video(name)).await.expect("submit")
        }

        async fn wait_terminal(&self, id: JobId) -> Job {
            for _ in 0..500 {
                let job = self.controller.registry().get(id).await.expect("job");
                if job.status.is_terminal() {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("job {id} never finished");
        }
    }

    #[tokio::test]
    async fn second_submission_is_queued_while_busy() {
        let h = harness();
        let first = h.submit("a.mp4").await;
        assert_eq!(first.job.status, JobStatus::Processing);
        assert_eq!(first.queue_position, None);

        let second = h.submit("b.mp4").await;
        assert_eq!(second.job.status, JobStatus::Queued);
        assert_eq!(second.queue_position, Some(1));

        let status = h.controller.status().await.expect("status");
        assert!(status.gpu_busy);
        assert_eq!(status.active_job_id, Some(first.job.id));
        assert_eq!(status.queue_length, 1);
        assert_eq!(status.estimated_wait_secs, 60);
        assert_eq!(status.queued_job_ids, vec![second.job.id]);
        assert_eq!(status.jobs.processing, 1);
        assert_eq!(status.jobs.queued, 1);
        assert_eq!(
            h.controller.queue_position(second.job.id).await.expect("position"),
            Some(1)
        );
    }

    #[tokio::test]
    async fn queued_jobs_run_in_submission_order_one_at_a_time() {
        let h = harness();
        let a = h.submit("a.mp4").await.job.id;
        let b = h.submit("b.mp4").await.job.id;
        let c = h.submit("c.mp4").await.job.id;

        h.runner.release(3);
        for id in [a, b, c] {
            assert_eq!(h.wait_terminal(id).await.status, JobStatus::Complete);
        }

        assert_eq!(h.runner.started(), vec![a, b, c]);
        assert_eq!(h.runner.max_running.load(Ordering::SeqCst), 1);

        let status = h.controller.status().await.expect("status");
        assert!(!status.gpu_busy);
        assert_eq!(status.queue_length, 0);
        assert_eq!(status.jobs.complete, 3);
    }

    #[tokio::test]
    async fn failure_frees_slot_for_next_job() {
        let h = harness();
        let failing = h.submit("fail.mp4").await.job.id;
        let next = h.submit("next.mp4").await.job.id;

        h.runner.release(2);
        let failed = h.wait_terminal(failing).await;
        assert_eq!(failed.status, JobStatus::Error);
        assert_eq!(failed.error.map(|e| e.kind), Some(FailureKind::Timeout));
        assert_eq!(h.wait_terminal(next).await.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn panicking_runner_becomes_job_error() {
        let h = harness();
        let boom = h.submit("panic.mp4").await.job.id;
        let after = h.submit("after.mp4").await.job.id;

        h.runner.release(2);
        let failed = h.wait_terminal(boom).await;
        assert_eq!(failed.error.map(|e| e.kind), Some(FailureKind::WorkerUnknownError));
        assert_eq!(h.wait_terminal(after).await.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_without_a_job() {
        let h = harness();
        let missing = h.controller.submit(h.dir.path().join("missing.mp4")).await;
        assert_matches!(
            missing,
            Err(AdmissionError::Rejected(JobFailure { kind: FailureKind::InputNotFound, .. }))
        );

        let empty = h.dir.path().join("empty.mp4");
        std::fs::write(&empty, b"").expect("write");
        assert_matches!(
            h.controller.submit(empty).await,
            Err(AdmissionError::Rejected(JobFailure { kind: FailureKind::EmptyInput, .. }))
        );

        assert!(h.controller.registry().is_empty().await);
        assert!(h.runner.started().is_empty());
    }

    #[tokio::test]
    async fn shutdown_fails_active_job_and_stops_accepting_work() {
        let Harness {
            dir,
            runner: _runner,
            controller,
            cancel,
            handle,
        } = harness();
        let video = dir.path().join("a.mp4");
        std::fs::write(&video, b"video").expect("write video");
        let active = controller.submit(video.clone()).await.expect("submit").job.id;
        let waiting = controller.submit(video.clone()).await.expect("submit").job.id;

        cancel.cancel();
        handle.await.expect("actor exits cleanly");

        let aborted = controller.registry().get(active).await.expect("job");
        assert_eq!(aborted.status, JobStatus::Error);
        assert_eq!(
            aborted.error.map(|e| e.kind),
            Some(FailureKind::WorkerUnknownError)
        );
        assert!(aborted.completed_at.is_some());
        let queued = controller.registry().get(waiting).await.expect("job");
        assert_eq!(queued.status, JobStatus::Queued);

        assert_matches!(controller.submit(video).await, Err(AdmissionError::Unavailable));
        assert_matches!(controller.status().await, Err(AdmissionError::Unavailable));
    }
}
