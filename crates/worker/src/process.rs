//! Subprocess execution with a wall-clock timeout.
//!
//! [`run`] spawns a program in its own process group, captures stdout and
//! stderr as text, and kills the whole group if it outlives its budget.
//! Descendants that keep the output pipes open after the program exits are
//! killed once the budget runs out. There is no retry at this layer.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use polyslim_core::error::CoreError;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: u64 = 10 * 1024 * 1024;

/// How long to wait for the pipes to close after the group was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The program could not be started at all.
    #[error("failed to invoke {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exceeded its budget and was killed.
    #[error("process timed out after {}s", limit.as_secs())]
    Timeout { limit: Duration, elapsed_ms: u64 },

    #[error("I/O error while waiting for process: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProcessError> for CoreError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Timeout { limit, .. } => CoreError::Timeout {
                secs: limit.as_secs(),
            },
            other => CoreError::Internal(other.to_string()),
        }
    }
}

/// Run `program` with `args`, failing with [`ProcessError::Timeout`] once
/// `timeout` elapses.
///
/// A non-zero exit is not an error here; callers inspect
/// [`ProcessOutput::exit_code`].
pub async fn run<I, S>(
    program: &Path,
    args: I,
    timeout: Duration,
) -> Result<ProcessOutput, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.display().to_string(),
        source,
    })?;
    // `Child::id` is gone once the child has been reaped.
    let pid = child.id();

    // Drain both pipes concurrently so a chatty child cannot block on a
    // full pipe while we wait on it.
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let mut stdout_task = tokio::spawn(read_stream(stdout_handle));
    let mut stderr_task = tokio::spawn(read_stream(stderr_handle));

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let deadline = tokio::time::Instant::now() + timeout.saturating_sub(start.elapsed());
            let mut stdout_bytes = finish(&mut stdout_task, deadline).await;
            let mut stderr_bytes = finish(&mut stderr_task, deadline).await;
            if stdout_bytes.is_none() || stderr_bytes.is_none() {
                tracing::warn!(
                    program = %program.display(),
                    "Process exited but its descendants kept the output open, killing them",
                );
                kill_group(pid);
                let grace = tokio::time::Instant::now() + DRAIN_GRACE;
                if stdout_bytes.is_none() {
                    stdout_bytes = finish(&mut stdout_task, grace).await;
                }
                if stderr_bytes.is_none() {
                    stderr_bytes = finish(&mut stderr_task, grace).await;
                }
            }
            let stdout_bytes = stdout_bytes.unwrap_or_default();
            let stderr_bytes = stderr_bytes.unwrap_or_default();
            stdout_task.abort();
            stderr_task.abort();
            Ok(ProcessOutput {
                exit_code: status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                duration_ms,
            })
        }
        Ok(Err(e)) => {
            stdout_task.abort();
            stderr_task.abort();
            Err(ProcessError::Io(e))
        }
        Err(_elapsed) => {
            kill_group(pid);
            if let Err(e) = child.kill().await {
                tracing::warn!(
                    program = %program.display(),
                    error = %e,
                    "Failed to kill timed-out process",
                );
            }
            stdout_task.abort();
            stderr_task.abort();
            Err(ProcessError::Timeout {
                limit: timeout,
                elapsed_ms: start.elapsed().as_millis() as u64,
            })
        }
    }
}

/// Wait for a reader task until `deadline`. `None` means it is still
/// running; a reader that failed yields no output.
async fn finish(
    task: &mut JoinHandle<Vec<u8>>,
    deadline: tokio::time::Instant,
) -> Option<Vec<u8>> {
    tokio::time::timeout_at(deadline, task)
        .await
        .ok()
        .map(Result::unwrap_or_default)
}

/// SIGKILL every process in the group led by `pid`.
#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // Safety: killpg only sends a signal. The child was spawned with
    // `process_group(0)`, so its pid is the group id.
    let ret = unsafe { libc::killpg(pid, libc::SIGKILL) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(pid, error = %err, "Failed to kill process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// Read an entire output stream, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(h) = handle {
        let _ = h.take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await;
    }
    buf
}
