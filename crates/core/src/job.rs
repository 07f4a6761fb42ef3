//! Job lifecycle model and worker failure classification.
//!
//! A job moves strictly forward:
//!
//! ```text
//! Queued ──► Processing ──► Complete
//!    │            │
//!    └────────────┴───────► Error
//! ```
//!
//! Once terminal, a job is immutable. Exactly one of `result` / `error` is
//! set on a terminal job.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ffmpeg::VideoInfo;
use crate::frame::ParsedArtifact;
use crate::types::{JobId, Timestamp};

/// Number of trailing characters of worker output attached to a failure.
pub const OUTPUT_TAIL_CHARS: usize = 2000;

/// Substrings in worker output that indicate GPU memory exhaustion.
pub const RESOURCE_EXHAUSTED_MARKERS: &[&str] = &["CUDA out of memory", "OutOfMemoryError"];

/// Substring in worker output that indicates an uncaught exception.
pub const TRACEBACK_MARKER: &str = "Traceback";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Complete,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Whether `self -> next` is a legal forward transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Queued, Self::Error)
                | (Self::Processing, Self::Complete)
                | (Self::Processing, Self::Error)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

/// Structured cause of a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    InputNotFound,
    EmptyInput,
    SpawnFailed,
    Timeout,
    ResourceExhausted,
    WorkerInternalError,
    WorkerUnknownError,
    NoOutputProduced,
    ParseError,
}

impl FailureKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::InputNotFound => "INPUT_NOT_FOUND",
            Self::EmptyInput => "EMPTY_INPUT",
            Self::SpawnFailed => "SPAWN_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::WorkerInternalError => "WORKER_INTERNAL_ERROR",
            Self::WorkerUnknownError => "WORKER_UNKNOWN_ERROR",
            Self::NoOutputProduced => "NO_OUTPUT_PRODUCED",
            Self::ParseError => "PARSE_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Last [`OUTPUT_TAIL_CHARS`] characters of worker output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tail: Option<String>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            exit_code: None,
            output_tail: None,
        }
    }

    pub fn with_output(mut self, captured: &str) -> Self {
        if !captured.is_empty() {
            self.output_tail = Some(tail_chars(captured, OUTPUT_TAIL_CHARS).to_string());
        }
        self
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

/// Classify a non-zero worker exit by scanning its captured output.
///
/// Memory exhaustion is checked before tracebacks: an OOM is usually
/// reported through a traceback too.
pub fn classify_worker_exit(exit_code: i32, captured: &str) -> JobFailure {
    let (kind, message) = if RESOURCE_EXHAUSTED_MARKERS
        .iter()
        .any(|m| captured.contains(m))
    {
        (
            FailureKind::ResourceExhausted,
            "GPU out of memory while processing video".to_string(),
        )
    } else if captured.contains(TRACEBACK_MARKER) {
        (
            FailureKind::WorkerInternalError,
            format!("Worker raised an exception (exit code {exit_code})"),
        )
    } else {
        (
            FailureKind::WorkerUnknownError,
            format!("Worker exited with code {exit_code}"),
        )
    };

    JobFailure {
        exit_code: Some(exit_code),
        ..JobFailure::new(kind, message)
    }
    .with_output(captured)
}

/// The last `n` characters of `s`, respecting char boundaries.
pub fn tail_chars(s: &str, n: usize) -> &str {
    match s.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((idx, _)) if n > 0 => &s[idx..],
        _ if n == 0 => "",
        _ => s,
    }
}

/// Where a successful run left its outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub output_path: PathBuf,
    pub rendered_video_path: Option<PathBuf>,
    pub video: Option<VideoInfo>,
    pub result: Arc<ParsedArtifact>,
}

/// One video-processing request.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub input_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered_video_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoInfo>,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Arc<ParsedArtifact>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
}

impl Job {
    pub fn new(id: JobId, input_path: PathBuf, submitted_at: Timestamp) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            input_path,
            output_path: None,
            rendered_video_path: None,
            video: None,
            submitted_at,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    fn advance(&mut self, next: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::Conflict(format!(
                "Job {} cannot move from {} to {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self, now: Timestamp) -> Result<(), CoreError> {
        self.advance(JobStatus::Processing)?;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn complete(&mut self, outcome: JobOutcome, now: Timestamp) -> Result<(), CoreError> {
        self.advance(JobStatus::Complete)?;
        self.output_path = Some(outcome.output_path);
        self.rendered_video_path = outcome.rendered_video_path;
        if outcome.video.is_some() {
            self.video = outcome.video;
        }
        self.result = Some(outcome.result);
        self.completed_at = Some(self.clamp_completion(now));
        Ok(())
    }

    pub fn fail(&mut self, failure: JobFailure, now: Timestamp) -> Result<(), CoreError> {
        self.advance(JobStatus::Error)?;
        self.error = Some(failure);
        self.completed_at = Some(self.clamp_completion(now));
        Ok(())
    }

    /// `started_at <= completed_at` even if the wall clock stepped back.
    fn clamp_completion(&self, now: Timestamp) -> Timestamp {
        match self.started_at {
            Some(started) if started > now => started,
            _ => now,
        }
    }

    pub fn frame_count(&self) -> Option<usize> {
        self.result.as_ref().map(|r| r.frames.len())
    }
}
