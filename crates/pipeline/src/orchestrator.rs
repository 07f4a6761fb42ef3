//! Subprocess orchestrator: runs the tracker worker for one job.
//!
//! Steps for each admitted job:
//!
//! 1. Re-validate the input video (it may have vanished while queued).
//! 2. Probe it for frame rate and size; fall back to defaults on failure.
//! 3. Spawn the worker into a fresh `{output_root}/{job_id}` directory with
//!    a hard timeout, streaming output to the job log. Paths handed to the
//!    worker are absolute since it runs in its own working directory.
//! 4. Classify a non-zero exit from the captured output.
//! 5. Parse the newest result artifact (pickle or JSON) the worker
//!    produced. An unreadable pickle falls back to the newest JSON.
//! 6. Delete the input video (best effort).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use meshpipe_core::camera::FocalConfig;
use meshpipe_core::ffmpeg::{VideoInfo, VideoProbe};
use meshpipe_core::job::{classify_worker_exit, FailureKind, JobFailure, JobOutcome};
use meshpipe_core::frame::ParsedArtifact;
use meshpipe_core::parser::{is_pickle, parse_artifact, ParseError, ParseOptions, DEFAULT_FPS};
use meshpipe_core::worker::artifacts::{
    newest_file_with_extensions, JSON_EXTENSIONS, RENDERED_VIDEO_EXTENSIONS, RESULT_EXTENSIONS,
};
use meshpipe_core::worker::{run_streaming, RunOptions, SubprocessError, WorkerCommand};

use crate::logs::JobLogs;
use crate::outputs::JobOutputs;
use crate::runner::{validate_input, JobRunner, RunRequest};

/// Default worker wall-clock budget (3 minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(180_000);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub worker: WorkerCommand,
    pub timeout: Duration,
    /// Parent of the per-job output directories.
    pub output_root: PathBuf,
    pub focal: FocalConfig,
    /// Frame rate used when probing fails.
    pub default_fps: f64,
}

impl OrchestratorConfig {
    pub fn new(worker: WorkerCommand, output_root: impl Into<PathBuf>) -> Self {
        Self {
            worker,
            timeout: DEFAULT_TIMEOUT,
            output_root: output_root.into(),
            focal: FocalConfig::default(),
            default_fps: DEFAULT_FPS,
        }
    }
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    probe: Arc<dyn VideoProbe>,
    logs: JobLogs,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, probe: Arc<dyn VideoProbe>, logs: JobLogs) -> Self {
        Self {
            config,
            probe,
            logs,
        }
    }

    /// Where the worker writes for this job.
    pub fn output_dir_for(&self, request: &RunRequest) -> PathBuf {
        self.outputs().dir_for(request.job_id)
    }

    pub fn outputs(&self) -> JobOutputs {
        JobOutputs::new(self.config.output_root.clone())
    }

    async fn probe(&self, request: &RunRequest) -> Option<VideoInfo> {
        match self.probe.probe(&request.input_path).await {
            Ok(info) => {
                tracing::debug!(
                    job_id = %request.job_id,
                    width = info.width,
                    height = info.height,
                    fps = info.fps,
                    frames = info.frame_count,
                    "Probed input video",
                );
                Some(info)
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %request.job_id,
                    error = %e,
                    default_fps = self.config.default_fps,
                    "Video probe failed, using defaults",
                );
                None
            }
        }
    }

    async fn execute(&self, request: &RunRequest) -> Result<JobOutcome, JobFailure> {
        validate_input(&request.input_path).await?;
        let input_path = absolute(&request.input_path, FailureKind::InputNotFound)?;
        let video = self.probe(request).await;

        let output_dir = absolute(&self.output_dir_for(request), FailureKind::SpawnFailed)?;
        tokio::fs::create_dir_all(&output_dir).await.map_err(|e| {
            JobFailure::new(
                FailureKind::SpawnFailed,
                format!("Failed to create output directory {}: {e}", output_dir.display()),
            )
        })?;

        let mut cmd = self.config.worker.build(&input_path, &output_dir);
        let run_opts = RunOptions {
            timeout: self.config.timeout,
            log_path: Some(self.logs.path_for(request.job_id)),
        };

        tracing::info!(
            job_id = %request.job_id,
            program = self.config.worker.program(),
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Starting worker",
        );

        let output = run_streaming(&mut cmd, &run_opts)
            .await
            .map_err(|e| failure_from_subprocess(e, self.config.timeout))?;

        if !output.success() {
            let failure = classify_worker_exit(output.exit_code, &output.captured);
            tracing::warn!(
                job_id = %request.job_id,
                exit_code = output.exit_code,
                kind = failure.kind.code(),
                "Worker failed",
            );
            return Err(failure);
        }

        tracing::info!(
            job_id = %request.job_id,
            duration_ms = output.duration_ms,
            "Worker finished",
        );

        let artifact = newest_file_with_extensions(&output_dir, RESULT_EXTENSIONS)
            .await
            .map_err(|e| {
                JobFailure::new(
                    FailureKind::NoOutputProduced,
                    format!("Failed to scan {}: {e}", output_dir.display()),
                )
            })?
            .ok_or_else(|| {
                JobFailure::new(
                    FailureKind::NoOutputProduced,
                    "Worker produced no result artifact (.pkl or .json)",
                )
                .with_output(&output.captured)
            })?;

        let rendered_video_path = newest_file_with_extensions(&output_dir, RENDERED_VIDEO_EXTENSIONS)
            .await
            .ok()
            .flatten();

        let parse_opts = ParseOptions {
            fps: video
                .map(|v| v.fps)
                .filter(|fps| *fps > 0.0)
                .unwrap_or(self.config.default_fps),
            image_size: video.map(|v| v.image_size()),
            focal: self.config.focal,
        };
        let (artifact, result) = parse_with_fallback(request, &output_dir, artifact, &parse_opts).await?;

        remove_input(&input_path).await;

        Ok(JobOutcome {
            output_path: artifact,
            rendered_video_path,
            video,
            result: Arc::new(result),
        })
    }
}

impl JobRunner for Orchestrator {
    async fn run(&self, request: RunRequest) -> Result<JobOutcome, JobFailure> {
        self.execute(&request).await
    }
}

fn failure_from_subprocess(err: SubprocessError, timeout: Duration) -> JobFailure {
    match err {
        SubprocessError::Timeout {
            elapsed_ms,
            captured,
        } => JobFailure::new(
            FailureKind::Timeout,
            format!(
                "Worker exceeded {}ms timeout (killed after {elapsed_ms}ms)",
                timeout.as_millis()
            ),
        )
        .with_output(&captured),
        e @ (SubprocessError::Spawn(_) | SubprocessError::Log { .. }) => {
            JobFailure::new(FailureKind::SpawnFailed, e.to_string())
        }
        e @ SubprocessError::Io(_) => JobFailure::new(FailureKind::WorkerUnknownError, e.to_string()),
    }
}

/// Parse `artifact`; if it is a pickle that cannot be read, try the newest
/// JSON result in the same output directory instead.
async fn parse_with_fallback(
    request: &RunRequest,
    output_dir: &Path,
    artifact: PathBuf,
    opts: &ParseOptions,
) -> Result<(PathBuf, ParsedArtifact), JobFailure> {
    let err = match parse_artifact(&artifact, opts).await {
        Ok(result) => return Ok((artifact, result)),
        Err(e) => e,
    };
    if !is_pickle(&artifact) {
        return Err(parse_failure(&err));
    }
    let Some(json) = newest_file_with_extensions(output_dir, JSON_EXTENSIONS)
        .await
        .ok()
        .flatten()
    else {
        return Err(parse_failure(&err));
    };

    tracing::warn!(
        job_id = %request.job_id,
        pickle = %artifact.display(),
        json = %json.display(),
        error = %err,
        "Unreadable pickle artifact, falling back to JSON",
    );
    let result = parse_artifact(&json, opts)
        .await
        .map_err(|e| parse_failure(&e))?;
    Ok((json, result))
}

fn parse_failure(err: &ParseError) -> JobFailure {
    JobFailure::new(FailureKind::ParseError, err.to_string())
}

/// Resolve `path` against the service's working directory.
fn absolute(path: &Path, kind: FailureKind) -> Result<PathBuf, JobFailure> {
    std::path::absolute(path).map_err(|e| {
        JobFailure::new(kind, format!("Cannot resolve path {}: {e}", path.display()))
    })
}

async fn remove_input(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to delete input video");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use meshpipe_core::ffmpeg::FfmpegError;

    use super::*;

    struct FixedProbe(Option<VideoInfo>);

    #[async_trait::async_trait]
    impl VideoProbe for FixedProbe {
        async fn probe(&self, path: &Path) -> Result<VideoInfo, FfmpegError> {
            self.0
                .ok_or_else(|| FfmpegError::VideoNotFound(path.display().to_string()))
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        orchestrator: Orchestrator,
        logs: JobLogs,
    }

    /// A fake worker: bash running `body`, with `$OUT` and `$SRC` parsed
    /// from the `video.*` overrides.
    fn fixture(body: &str, timeout: Duration, video: Option<VideoInfo>) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let script_path = dir.path().join("worker.sh");
        let mut script = std::fs::File::create(&script_path).expect("create script");
        write!(
            script,
            r#"#!/bin/bash
for arg in "$@"; do
  case "$arg" in
    video.output_dir=*) OUT="${{arg#video.output_dir=}}" ;;
    video.source=*) SRC="${{arg#video.source=}}" ;;
  esac
done
echo "args: $*"
{body}
"#
        )
        .expect("write script");

        let worker = WorkerCommand::new("bash")
            .leading_arg(script_path.display().to_string())
            .config_args(["hydra.job.chdir=false", "hydra.run.dir=."]);
        let config = OrchestratorConfig {
            timeout,
            ..OrchestratorConfig::new(worker, dir.path().join("outputs"))
        };
        let logs = JobLogs::new(dir.path().join("logs"));
        let orchestrator = Orchestrator::new(config, Arc::new(FixedProbe(video)), logs.clone());
        Fixture {
            dir,
            orchestrator,
            logs,
        }
    }

    fn input(fx: &Fixture) -> RunRequest {
        let path = fx.dir.path().join("input.mp4");
        std::fs::write(&path, b"fake video bytes").expect("write input");
        RunRequest {
            job_id: uuid::Uuid::new_v4(),
            input_path: path,
        }
    }

    fn vga() -> Option<VideoInfo> {
        Some(VideoInfo {
            width: 640,
            height: 480,
            fps: 30.0,
            frame_count: 10,
        })
    }

    const TEN_FRAMES: &str = r#"cat > "$OUT/result.json" <<'JSON'
{"frames": [
 {"persons": [{"track_id": 1, "pred_cam": [1, 0, 0], "center": [320, 240], "size": 200,
               "keypoints_3d": [[0, 0, -1]]}]},
 {"persons": []}, {"persons": []}, {"persons": []}, {"persons": []},
 {"persons": []}, {"persons": []}, {"persons": []}, {"persons": []}, {"persons": []}
]}
JSON
"#;

    #[tokio::test]
    async fn ten_frame_video_completes() {
        let fx = fixture(TEN_FRAMES, Duration::from_secs(10), vga());
        let request = input(&fx);

        let outcome = fx.orchestrator.run(request.clone()).await.expect("success");

        let frames = &outcome.result.frames;
        assert_eq!(frames.len(), 10);
        let stamps: Vec<f64> = frames.iter().map(|f| f.timestamp).collect();
        assert_eq!(stamps[0], 0.0);
        assert!((stamps[1] - 0.033).abs() < 1e-3);
        assert!((stamps[2] - 0.067).abs() < 1e-3);
        assert!(frames[0].persons[0].camera_full.is_some());
        assert!(frames[0].persons[0].keypoints_2d.is_some());
        assert_eq!(outcome.video, vga());
        assert!(outcome.output_path.starts_with(fx.orchestrator.output_dir_for(&request)));

        assert!(!request.input_path.exists(), "input deleted after parse");
        let log = fx.logs.read(request.job_id).await.expect("log");
        assert!(log.contains("args: "));
    }

    #[tokio::test]
    async fn config_args_reach_worker_before_paths() {
        let fx = fixture(TEN_FRAMES, Duration::from_secs(10), vga());
        let request = input(&fx);
        fx.orchestrator.run(request.clone()).await.expect("success");

        let log = fx.logs.read(request.job_id).await.expect("log");
        let args_line = log.lines().find(|l| l.starts_with("args: ")).expect("args line");
        let run_dir = args_line.find("hydra.run.dir=.").expect("config arg");
        let source = args_line.find("video.source=").expect("path arg");
        assert!(run_dir < source, "{args_line}");
    }

    #[tokio::test]
    async fn probe_failure_falls_back_to_default_fps() {
        let fx = fixture(TEN_FRAMES, Duration::from_secs(10), None);
        let outcome = fx.orchestrator.run(input(&fx)).await.expect("success");
        assert!(outcome.video.is_none());
        assert!((outcome.result.frames[3].timestamp - 0.1).abs() < 1e-9);
        // No image size: the crop camera cannot be lifted to full image.
        assert!(outcome.result.frames[0].persons[0].camera_full.is_none());
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let fx = fixture("sleep 60\n", Duration::from_millis(300), vga());
        let request = input(&fx);
        let failure = fx.orchestrator.run(request.clone()).await.expect_err("timeout");
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(request.input_path.exists(), "input kept on failure");
    }

    #[tokio::test]
    async fn cuda_oom_is_resource_exhausted() {
        let fx = fixture(
            "echo 'RuntimeError: CUDA out of memory. Tried to allocate 20.00 MiB' >&2\nexit 1\n",
            Duration::from_secs(10),
            vga(),
        );
        let failure = fx.orchestrator.run(input(&fx)).await.expect_err("oom");
        assert_eq!(failure.kind, FailureKind::ResourceExhausted);
        assert_eq!(failure.exit_code, Some(1));
        assert!(failure
            .output_tail
            .as_deref()
            .is_some_and(|t| t.contains("CUDA out of memory")));
    }

    #[tokio::test]
    async fn traceback_is_internal_error() {
        let fx = fixture(
            "echo 'Traceback (most recent call last):' >&2\necho 'KeyError: x' >&2\nexit 1\n",
            Duration::from_secs(10),
            vga(),
        );
        let failure = fx.orchestrator.run(input(&fx)).await.expect_err("traceback");
        assert_eq!(failure.kind, FailureKind::WorkerInternalError);
    }

    #[tokio::test]
    async fn clean_exit_without_artifact() {
        let fx = fixture("exit 0\n", Duration::from_secs(10), vga());
        let failure = fx.orchestrator.run(input(&fx)).await.expect_err("no output");
        assert_eq!(failure.kind, FailureKind::NoOutputProduced);
    }

    #[tokio::test]
    async fn corrupt_artifact_is_parse_error() {
        let fx = fixture(
            "echo '{\"frames\": [' > \"$OUT/result.json\"\n",
            Duration::from_secs(10),
            vga(),
        );
        let failure = fx.orchestrator.run(input(&fx)).await.expect_err("parse");
        assert_eq!(failure.kind, FailureKind::ParseError);
    }

    #[tokio::test]
    async fn pickle_artifact_is_parsed() {
        // Protocol-2 pickle of {"frames": [None, None]}.
        let fx = fixture(
            r#"printf '\x80\x02}(X\x06\x00\x00\x00frames](NNeu.' > "$OUT/phalp.pkl""#,
            Duration::from_secs(10),
            vga(),
        );
        let outcome = fx.orchestrator.run(input(&fx)).await.expect("success");
        assert_eq!(outcome.result.frames.len(), 2);
        assert!(outcome.result.frames.iter().all(|f| f.persons.is_empty()));
        assert_eq!(
            outcome.output_path.file_name().and_then(|n| n.to_str()),
            Some("phalp.pkl")
        );
    }

    #[tokio::test]
    async fn unreadable_pickle_falls_back_to_json() {
        let body = format!("{TEN_FRAMES}sleep 0.1\necho garbage > \"$OUT/phalp.pkl\"\n");
        let fx = fixture(&body, Duration::from_secs(10), vga());
        let outcome = fx.orchestrator.run(input(&fx)).await.expect("success");
        assert_eq!(outcome.result.frames.len(), 10);
        assert_eq!(
            outcome.output_path.file_name().and_then(|n| n.to_str()),
            Some("result.json")
        );
    }

    #[tokio::test]
    async fn unreadable_pickle_alone_is_parse_error() {
        let fx = fixture(
            "echo garbage > \"$OUT/phalp.pkl\"\n",
            Duration::from_secs(10),
            vga(),
        );
        let failure = fx.orchestrator.run(input(&fx)).await.expect_err("parse");
        assert_eq!(failure.kind, FailureKind::ParseError);
    }

    #[tokio::test]
    async fn missing_input_fails_fast() {
        let fx = fixture(TEN_FRAMES, Duration::from_secs(10), vga());
        let request = RunRequest {
            job_id: uuid::Uuid::new_v4(),
            input_path: fx.dir.path().join("gone.mp4"),
        };
        let failure = fx.orchestrator.run(request.clone()).await.expect_err("missing");
        assert_eq!(failure.kind, FailureKind::InputNotFound);
        assert!(!fx.orchestrator.output_dir_for(&request).exists());
    }

    /// Removes a directory created relative to the test's cwd.
    struct RemoveOnDrop(PathBuf);

    impl Drop for RemoveOnDrop {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    #[tokio::test]
    async fn relative_paths_resolve_against_service_cwd() {
        let fx = fixture("", Duration::from_secs(10), vga());
        let worker_dir = tempfile::tempdir().expect("worker dir");
        let script = fx.dir.path().join("relative_worker.sh");
        std::fs::write(
            &script,
            format!(
                r#"#!/bin/bash
for arg in "$@"; do
  case "$arg" in
    video.output_dir=*) OUT="${{arg#video.output_dir=}}" ;;
    video.source=*) SRC="${{arg#video.source=}}" ;;
  esac
done
test -f "$SRC" || {{ echo "missing source $SRC" >&2; exit 3; }}
{TEN_FRAMES}"#
            ),
        )
        .expect("write script");

        let rel_root = PathBuf::from(format!("relative-run-{}", uuid::Uuid::new_v4()));
        let _cleanup = RemoveOnDrop(rel_root.clone());
        std::fs::create_dir_all(&rel_root).expect("mkdir");
        let rel_input = rel_root.join("input.mp4");
        std::fs::write(&rel_input, b"fake video bytes").expect("write input");

        let worker = WorkerCommand::new("bash")
            .leading_arg(script.display().to_string())
            .working_dir(worker_dir.path());
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::new(worker, rel_root.join("outputs")),
            Arc::new(FixedProbe(vga())),
            fx.logs.clone(),
        );
        let request = RunRequest {
            job_id: uuid::Uuid::new_v4(),
            input_path: rel_input.clone(),
        };

        let outcome = orchestrator.run(request.clone()).await.expect("success");

        assert_eq!(outcome.result.frames.len(), 10);
        assert!(outcome.output_path.is_absolute());
        assert!(orchestrator.output_dir_for(&request).join("result.json").exists());
        assert!(!rel_input.exists(), "input deleted after parse");
        assert!(!worker_dir.path().join(&rel_root).exists());
    }

    #[tokio::test]
    async fn missing_program_is_spawn_failure() {
        let fx = fixture(TEN_FRAMES, Duration::from_secs(10), vga());
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::new(
                WorkerCommand::new("/nonexistent/tracker"),
                fx.dir.path().join("outputs"),
            ),
            Arc::new(FixedProbe(vga())),
            fx.logs.clone(),
        );
        let failure = orchestrator.run(input(&fx)).await.expect_err("spawn");
        assert_eq!(failure.kind, FailureKind::SpawnFailed);
    }
}
