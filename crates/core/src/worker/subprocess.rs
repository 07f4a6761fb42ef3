//! Worker process execution with streamed output and a hard timeout.
//!
//! [`run_streaming`] spawns the prepared command in its own process group,
//! forwards stdout and stderr line by line into an optional log file while
//! the worker is still running, and keeps a bounded copy of the combined
//! output for failure classification.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Maximum combined output retained in memory (10 MiB). Older output is
/// discarded first; the log file always has everything.
const MAX_CAPTURE_BYTES: usize = 10 * 1024 * 1024;

/// How long to wait for output pipes to drain after the worker exits.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Wall-clock budget before the process group is killed.
    pub timeout: Duration,
    /// Append every output line here as it arrives.
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    pub duration_ms: u64,
    /// Combined stdout and stderr, in arrival order.
    pub captured: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubprocessError {
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Worker timed out after {elapsed_ms}ms")]
    Timeout {
        elapsed_ms: u64,
        /// Output produced before the kill.
        captured: String,
    },

    #[error("Failed to open log {}: {source}", path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Spawn `cmd`, stream its output, and wait up to `opts.timeout`.
///
/// The caller sets program, arguments and working directory; stdio, process
/// group and kill-on-drop are configured here.
pub async fn run_streaming(
    cmd: &mut Command,
    opts: &RunOptions,
) -> Result<RunOutput, SubprocessError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    own_process_group(cmd);

    let log_file = match &opts.log_path {
        Some(path) => Some(open_log(path).await?),
        None => None,
    };

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(SubprocessError::Spawn)?;
    let pid = child.id();
    tracing::debug!(?pid, timeout_ms = opts.timeout.as_millis() as u64, "Worker spawned");

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(forward_lines(stdout, tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(forward_lines(stderr, tx.clone())));
    }
    drop(tx);
    let collector = tokio::spawn(collect_lines(rx, log_file));

    let wait_result = tokio::time::timeout(opts.timeout, child.wait()).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match wait_result {
        Ok(Ok(status)) => {
            let captured = drain(readers, collector).await;
            Ok(RunOutput {
                exit_code: status.code().unwrap_or(-1),
                duration_ms: elapsed_ms,
                captured,
            })
        }
        Ok(Err(e)) => {
            kill_process_group(&mut child).await;
            drain(readers, collector).await;
            Err(SubprocessError::Io(e))
        }
        Err(_elapsed) => {
            tracing::warn!(?pid, elapsed_ms, "Worker exceeded timeout, killing process group");
            kill_process_group(&mut child).await;
            let captured = drain(readers, collector).await;
            Err(SubprocessError::Timeout {
                elapsed_ms,
                captured,
            })
        }
    }
}

async fn open_log(path: &Path) -> Result<File, SubprocessError> {
    let log_err = |source| SubprocessError::Log {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(log_err)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(log_err)
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// Kill the worker and everything it spawned, then reap it.
async fn kill_process_group(child: &mut Child) {
    if let Some(pid) = child.id() {
        signal_group(pid);
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(unix)]
fn signal_group(pid: u32) {
    // SAFETY: kill(2) has no memory-safety preconditions; the negative pid
    // addresses the group created at spawn.
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32) {}

async fn forward_lines<R: AsyncRead + Unpin>(stream: R, tx: mpsc::UnboundedSender<String>) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                    break;
                }
            }
        }
    }
}

async fn collect_lines(mut rx: mpsc::UnboundedReceiver<String>, mut log: Option<File>) -> String {
    let mut captured = String::new();
    while let Some(line) = rx.recv().await {
        tracing::trace!(target: "worker_output", "{line}");

        if let Some(file) = log.as_mut() {
            let write = async {
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
                file.flush().await
            };
            if let Err(e) = write.await {
                tracing::warn!(error = %e, "Failed to write worker log, disabling log sink");
                log = None;
            }
        }

        push_capped(&mut captured, &line, MAX_CAPTURE_BYTES);
    }
    captured
}

fn push_capped(buf: &mut String, line: &str, cap: usize) {
    buf.push_str(line);
    buf.push('\n');
    if buf.len() > cap {
        let mut cut = buf.len() - cap;
        while !buf.is_char_boundary(cut) {
            cut += 1;
        }
        buf.drain(..cut);
    }
}

async fn drain(readers: Vec<JoinHandle<()>>, mut collector: JoinHandle<String>) -> String {
    match tokio::time::timeout(DRAIN_GRACE, &mut collector).await {
        Ok(result) => result.unwrap_or_default(),
        Err(_) => {
            // A detached grandchild still holds the pipes open.
            for reader in &readers {
                reader.abort();
            }
            collector.await.unwrap_or_default()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
