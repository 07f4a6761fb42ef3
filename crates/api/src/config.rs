use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use meshpipe_core::camera::FocalConfig;
use meshpipe_core::worker::WorkerCommand;
use meshpipe_pipeline::{OrchestratorConfig, RetentionPolicy};

/// Configuration loading failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// HTTP server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `5000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `5000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_var(&lookup, "PORT", 5000u16)?;

        let cors_origins: Vec<String> = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs = parse_var(&lookup, "REQUEST_TIMEOUT_SECS", 30u64)?;

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
        })
    }
}

/// Pose pipeline configuration: worker invocation, directories, camera
/// model constants and job retention.
#[derive(Debug, Clone)]
pub struct PoseConfig {
    pub timeout: Duration,
    pub worker_program: String,
    pub worker_args: Vec<String>,
    /// Runtime-configuration overrides, always passed before path arguments.
    pub worker_config_args: Vec<String>,
    pub worker_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    pub focal: FocalConfig,
    pub default_fps: f64,
    pub retention: RetentionPolicy,
    /// Base URL of the single-frame inference sidecar, if any.
    pub estimator_url: Option<String>,
}

impl PoseConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                                                       |
    /// |---------------------------|---------------------------------------------------------------|
    /// | `POSE_TIMEOUT_MS`         | `180000`                                                      |
    /// | `POSE_WORKER_PROGRAM`     | `python`                                                      |
    /// | `POSE_WORKER_ARGS`        | `track.py`                                                    |
    /// | `POSE_WORKER_CONFIG_ARGS` | `hydra.job.chdir=false hydra.output_subdir=null hydra.run.dir=.` |
    /// | `POSE_WORKER_DIR`         | `.`                                                           |
    /// | `POSE_OUTPUT_DIR`         | `outputs`                                                     |
    /// | `POSE_LOG_DIR`            | `logs`                                                        |
    /// | `POSE_FOCAL_LENGTH`       | `5000`                                                        |
    /// | `POSE_MODEL_IMAGE_SIZE`   | `256`                                                         |
    /// | `POSE_DEFAULT_FPS`        | `30`                                                          |
    /// | `JOB_RETENTION_SECS`      | `86400`                                                       |
    /// | `JOB_RETENTION_MAX`       | `500`                                                         |
    /// | `POSE_ESTIMATOR_URL`      | unset                                                         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let timeout_ms = parse_positive(&lookup, "POSE_TIMEOUT_MS", 180_000u64)?;

        let worker_program = lookup("POSE_WORKER_PROGRAM").unwrap_or_else(|| "python".into());
        let worker_args = split_args(lookup("POSE_WORKER_ARGS").as_deref().unwrap_or("track.py"));
        let worker_config_args = split_args(
            lookup("POSE_WORKER_CONFIG_ARGS")
                .as_deref()
                .unwrap_or("hydra.job.chdir=false hydra.output_subdir=null hydra.run.dir=."),
        );

        let worker_dir = PathBuf::from(lookup("POSE_WORKER_DIR").unwrap_or_else(|| ".".into()));
        let output_dir = PathBuf::from(lookup("POSE_OUTPUT_DIR").unwrap_or_else(|| "outputs".into()));
        let log_dir = PathBuf::from(lookup("POSE_LOG_DIR").unwrap_or_else(|| "logs".into()));

        let focal = FocalConfig {
            focal_length: parse_positive(&lookup, "POSE_FOCAL_LENGTH", 5000.0f64)?,
            model_image_size: parse_positive(&lookup, "POSE_MODEL_IMAGE_SIZE", 256.0f64)?,
        };
        let default_fps = parse_positive(&lookup, "POSE_DEFAULT_FPS", 30.0f64)?;

        let retention = RetentionPolicy {
            ttl: Duration::from_secs(parse_var(&lookup, "JOB_RETENTION_SECS", 86_400u64)?),
            max_terminal: parse_var(&lookup, "JOB_RETENTION_MAX", 500usize)?,
        };

        let estimator_url = lookup("POSE_ESTIMATOR_URL")
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());

        Ok(Self {
            timeout: Duration::from_millis(timeout_ms),
            worker_program,
            worker_args,
            worker_config_args,
            worker_dir,
            output_dir,
            log_dir,
            focal,
            default_fps,
            retention,
            estimator_url,
        })
    }

    pub fn worker_command(&self) -> WorkerCommand {
        WorkerCommand::new(self.worker_program.clone())
            .leading_args(self.worker_args.iter().cloned())
            .config_args(self.worker_config_args.iter().cloned())
            .working_dir(self.worker_dir.clone())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            worker: self.worker_command(),
            timeout: self.timeout,
            output_root: self.output_dir.clone(),
            focal: self.focal,
            default_fps: self.default_fps,
        }
    }
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        },
    }
}

fn parse_positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let value = parse_var(lookup, var, default)?;
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be greater than zero".into(),
        })
    }
}
