use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use meshpipe_core::estimator::PoseEstimator;
use meshpipe_core::ffmpeg::FfprobeProbe;
use meshpipe_pipeline::{AdmissionController, JobLogs, JobRegistry, Orchestrator};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshpipe_api::background;
use meshpipe_api::config::{PoseConfig, ServerConfig};
use meshpipe_api::estimator::HttpPoseEstimator;
use meshpipe_api::router::build_app_router;
use meshpipe_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "meshpipe_api=debug,meshpipe_pipeline=debug,meshpipe_core=info,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let pose = PoseConfig::from_env().expect("Invalid pose pipeline configuration");
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    tracing::info!(
        worker = %pose.worker_program,
        timeout_ms = pose.timeout.as_millis() as u64,
        output_dir = %pose.output_dir.display(),
        log_dir = %pose.log_dir.display(),
        "Loaded pose configuration",
    );

    tokio::fs::create_dir_all(&pose.output_dir)
        .await
        .expect("Failed to create output directory");
    tokio::fs::create_dir_all(&pose.log_dir)
        .await
        .expect("Failed to create log directory");

    // --- Pipeline ---
    let cancel = CancellationToken::new();
    let registry = Arc::new(JobRegistry::new());
    let logs = JobLogs::new(pose.log_dir.clone());
    let orchestrator = Orchestrator::new(
        pose.orchestrator_config(),
        Arc::new(FfprobeProbe::default()),
        logs.clone(),
    );
    let outputs = orchestrator.outputs();
    let (admission, admission_handle) =
        AdmissionController::spawn(Arc::clone(&registry), Arc::new(orchestrator), cancel.clone());

    let retention_handle = tokio::spawn(background::job_retention::run(
        Arc::clone(&registry),
        logs.clone(),
        outputs,
        pose.retention,
        cancel.clone(),
    ));

    // --- Single-frame estimator ---
    let estimator: Option<Arc<dyn PoseEstimator>> = match &pose.estimator_url {
        Some(url) => {
            let client = HttpPoseEstimator::new(url.clone()).expect("Failed to build estimator client");
            tracing::info!(url = %url, "Single-frame estimator enabled");
            Some(Arc::new(client))
        }
        None => {
            tracing::info!("POSE_ESTIMATOR_URL not set, single-frame estimation disabled");
            None
        }
    };

    // --- App state ---
    let state = AppState {
        admission,
        logs,
        estimator,
        focal: pose.focal,
        default_fps: pose.default_fps,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Aborting the active run drops its child process, which kills the worker.
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), admission_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
