#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use meshpipe_core::camera::FocalConfig;
use meshpipe_core::estimator::PoseEstimator;
use meshpipe_core::frame::{FrameRecord, ParsedArtifact, PersonPose};
use meshpipe_core::job::{FailureKind, JobFailure, JobOutcome};
use meshpipe_pipeline::{AdmissionController, JobLogs, JobRegistry, JobRunner, RunRequest};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use meshpipe_api::config::ServerConfig;
use meshpipe_api::router::build_app_router;
use meshpipe_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
    }
}

/// Job runner that waits for a permit, then returns three frames with one
/// person each. Inputs whose name starts with `fail` end in `Timeout`.
pub struct FakeRunner {
    gate: Semaphore,
}

impl FakeRunner {
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

pub fn three_frames() -> ParsedArtifact {
    let frames = (0..3u64)
        .map(|n| FrameRecord {
            frame_number: n,
            timestamp: n as f64 / 30.0,
            persons: vec![PersonPose {
                camera_full: Some([0.0, 0.0, 40.0]),
                mesh_vertices: Some(vec![[0.0, 0.0, 0.0], [0.1, -0.1, 0.0]]),
                keypoints_2d: Some(vec![[320.0, 240.0], [330.0, 250.0]]),
                ..PersonPose::new(1, 0.95)
            }],
        })
        .collect();
    ParsedArtifact {
        frames,
        ..ParsedArtifact::default()
    }
}

impl JobRunner for FakeRunner {
    async fn run(&self, request: RunRequest) -> Result<JobOutcome, JobFailure> {
        self.gate.acquire().await.expect("gate").forget();
        let failing = request
            .input_path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("fail"));
        if failing {
            return Err(JobFailure::new(FailureKind::Timeout, "Worker exceeded 1000ms timeout"));
        }
        Ok(JobOutcome {
            output_path: request.input_path.with_extension("json"),
            rendered_video_path: None,
            video: None,
            result: Arc::new(three_frames()),
        })
    }
}

/// A fully wired application over a [`FakeRunner`].
pub struct TestApp {
    pub router: Router,
    pub runner: Arc<FakeRunner>,
    pub admission: AdmissionController,
    pub logs: JobLogs,
    pub dir: tempfile::TempDir,
    _cancel: tokio_util::sync::DropGuard,
}

impl TestApp {
    /// Write a non-empty fake video under the scratch dir.
    pub fn video(&self, name: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"fake video").expect("write video");
        path.display().to_string()
    }

    pub async fn get(&self, uri: &str) -> Response {
        send(self.router.clone(), Method::GET, uri, Body::empty(), None).await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response {
        send(
            self.router.clone(),
            Method::POST,
            uri,
            Body::from(body.to_string()),
            Some("application/json"),
        )
        .await
    }

    pub async fn post_bytes(&self, uri: &str, body: Vec<u8>) -> Response {
        send(
            self.router.clone(),
            Method::POST,
            uri,
            Body::from(body),
            Some("application/octet-stream"),
        )
        .await
    }

    /// Poll the job until it is terminal and return its JSON.
    pub async fn wait_terminal(&self, id: &str) -> serde_json::Value {
        for _ in 0..500 {
            let json = body_json(self.get(&format!("/api/v1/jobs/{id}")).await).await;
            let status = json["data"]["status"].as_str().unwrap_or_default().to_string();
            if status == "complete" || status == "error" {
                return json;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("job {id} never finished");
    }
}

/// Build the full application router over a fresh pipeline.
pub fn build_test_app(estimator: Option<Arc<dyn PoseEstimator>>) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let logs = JobLogs::new(dir.path().join("logs"));
    std::fs::create_dir_all(logs.dir()).expect("log dir");

    let runner = Arc::new(FakeRunner {
        gate: Semaphore::new(0),
    });
    let cancel = CancellationToken::new();
    let (admission, _handle) = AdmissionController::spawn(
        Arc::new(JobRegistry::new()),
        Arc::clone(&runner),
        cancel.clone(),
    );

    let config = test_config();
    let state = AppState {
        admission: admission.clone(),
        logs: logs.clone(),
        estimator,
        focal: FocalConfig::default(),
        default_fps: 30.0,
    };

    TestApp {
        router: build_app_router(state, &config),
        runner,
        admission,
        logs,
        dir,
        _cancel: cancel.drop_guard(),
    }
}

async fn send(
    app: Router,
    method: Method,
    uri: &str,
    body: Body,
    content_type: Option<&str>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(ct) = content_type {
        builder = builder.header("content-type", ct);
    }
    app.oneshot(builder.body(body).expect("request"))
        .await
        .expect("response")
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}
