//! FFprobe / FFmpeg helpers for source video metadata and frame grabs.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("video file not found: {0}")]
    VideoNotFound(String),

    #[error("no video stream in {0}")]
    NoVideoStream(String),
}

/// Source video properties the pipeline needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
}

impl VideoInfo {
    /// `[w, h]` as used by the camera transforms.
    pub fn image_size(&self) -> [f64; 2] {
        [self.width as f64, self.height as f64]
    }
}

/// Reads [`VideoInfo`] for a video file.
#[async_trait::async_trait]
pub trait VideoProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<VideoInfo, FfmpegError>;
}

/// [`VideoProbe`] backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    binary: String,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self {
            binary: "ffprobe".to_string(),
        }
    }
}

impl FfprobeProbe {
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait::async_trait]
impl VideoProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<VideoInfo, FfmpegError> {
        let probe = run_ffprobe(&self.binary, path).await?;
        video_info(&probe).ok_or_else(|| FfmpegError::NoVideoStream(path.display().to_string()))
    }
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    #[serde(default)]
    pub format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// e.g. "30/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
    pub duration: Option<String>,
    pub nb_frames: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

async fn run_ffprobe(binary: &str, path: &Path) -> Result<FfprobeOutput, FfmpegError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(FfmpegError::VideoNotFound(path.display().to_string()));
    }

    let output = tokio::process::Command::new(binary)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    serde_json::from_slice::<FfprobeOutput>(&output.stdout)
        .map_err(|e| FfmpegError::ParseError(e.to_string()))
}

/// Extract frame `frame_number` of `video_path` as PNG bytes.
pub async fn extract_frame_png(video_path: &Path, frame_number: u64) -> Result<Vec<u8>, FfmpegError> {
    if !tokio::fs::try_exists(video_path).await.unwrap_or(false) {
        return Err(FfmpegError::VideoNotFound(video_path.display().to_string()));
    }

    let output = tokio::process::Command::new("ffmpeg")
        .args(["-v", "error", "-i"])
        .arg(video_path)
        .args([
            "-vf",
            &format!("select=eq(n\\,{frame_number})"),
            "-vframes",
            "1",
            "-f",
            "image2pipe",
            "-vcodec",
            "png",
            "-",
        ])
        .kill_on_drop(true)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() || output.stdout.is_empty() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(output.stdout)
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn first_video_stream(probe: &FfprobeOutput) -> Option<&FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// `None` when there is no video stream with known dimensions.
pub fn video_info(probe: &FfprobeOutput) -> Option<VideoInfo> {
    let stream = first_video_stream(probe)?;
    let width = stream.width.filter(|w| *w > 0)?;
    let height = stream.height.filter(|h| *h > 0)?;
    let fps = parse_framerate(stream);
    Some(VideoInfo {
        width,
        height,
        fps,
        frame_count: parse_total_frames(probe, stream, fps),
    })
}

/// Prefer the average rate; `r_frame_rate` is the container tick rate for
/// variable frame rate sources.
fn parse_framerate(stream: &FfprobeStream) -> f64 {
    [&stream.avg_frame_rate, &stream.r_frame_rate]
        .into_iter()
        .filter_map(|r| r.as_deref())
        .map(parse_fraction)
        .find(|fps| *fps > 0.0)
        .unwrap_or(0.0)
}

fn parse_duration(probe: &FfprobeOutput, stream: &FfprobeStream) -> f64 {
    [&probe.format.duration, &stream.duration]
        .into_iter()
        .filter_map(|d| d.as_deref()?.parse::<f64>().ok())
        .find(|d| *d > 0.0)
        .unwrap_or(0.0)
}

fn parse_total_frames(probe: &FfprobeOutput, stream: &FfprobeStream, fps: f64) -> u64 {
    if let Some(n) = stream.nb_frames.as_deref().and_then(|n| n.parse::<u64>().ok()) {
        return n;
    }
    let duration = parse_duration(probe, stream);
    if duration > 0.0 && fps > 0.0 {
        return (duration * fps).round() as u64;
    }
    0
}

/// Parse a fraction string like `"30/1"` into a float.
fn parse_fraction(s: &str) -> f64 {
    match s.split_once('/') {
        Some((num, den)) => {
            let num = num.parse::<f64>().unwrap_or(0.0);
            let den = den.parse::<f64>().unwrap_or(0.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => s.parse::<f64>().unwrap_or(0.0),
    }
}
