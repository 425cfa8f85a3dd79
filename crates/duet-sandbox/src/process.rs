//! Child process execution with a deadline and bounded output.
//!
//! stdout and stderr are drained concurrently while the child runs, sharing one
//! byte budget. When the budget is exhausted or the deadline passes the child is
//! killed and whatever was captured so far is returned.

use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use duet_core::{DuetError, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// How long to wait for the pipe readers once the child is gone
const READER_GRACE: Duration = Duration::from_secs(2);

/// Why the child stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own
    Exited { code: Option<i32>, success: bool },
    /// Killed at the deadline
    TimedOut,
    /// Killed after exceeding the output budget
    OutputLimit,
}

/// Captured child process output
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// stdout followed by stderr, lossily decoded
    pub output: String,
    pub termination: Termination,
    /// Bytes the child wrote, including any beyond the budget that were dropped
    pub bytes_seen: usize,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        matches!(self.termination, Termination::Exited { success: true, .. })
    }
}

/// Run a command with a timeout and a cap on combined stdout/stderr.
///
/// The child is spawned with `kill_on_drop`, so dropping the returned future
/// (cancellation) also kills it.
#[instrument(skip_all, fields(program = ?cmd.as_std().get_program(), timeout_secs = timeout.as_secs(), output_limit))]
pub async fn run_limited(
    mut cmd: Command,
    timeout: Duration,
    output_limit: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("spawning child process");
    let mut child = cmd
        .spawn()
        .map_err(|e| {
            DuetError::Sandbox(format!(
                "failed to spawn {:?}: {}",
                cmd.as_std().get_program(),
                e
            ))
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| DuetError::Sandbox("stdout was not piped".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| DuetError::Sandbox("stderr was not piped".to_string()))?;

    let used = Arc::new(AtomicUsize::new(0));
    let overflow = Arc::new(Notify::new());
    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let stdout_handle = tokio::spawn(read_limited(
        stdout,
        stdout_buf.clone(),
        used.clone(),
        output_limit,
        overflow.clone(),
    ));
    let stderr_handle = tokio::spawn(read_limited(
        stderr,
        stderr_buf.clone(),
        used.clone(),
        output_limit,
        overflow.clone(),
    ));

    let termination = tokio::select! {
        status = child.wait() => {
            let status = status?;
            Termination::Exited { code: status.code(), success: status.success() }
        }
        _ = tokio::time::sleep(timeout) => Termination::TimedOut,
        _ = overflow.notified() => Termination::OutputLimit,
    };

    if !matches!(termination, Termination::Exited { .. }) {
        warn!(?termination, "killing child process");
        if let Err(e) = child.kill().await {
            warn!(err = %e, "failed to kill child process");
        }
    }

    join_reader(stdout_handle).await;
    join_reader(stderr_handle).await;

    let mut output = String::from_utf8_lossy(&take(&stdout_buf)).into_owned();
    let stderr = take(&stderr_buf);
    if !stderr.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&String::from_utf8_lossy(&stderr));
    }

    debug!(?termination, bytes = output.len(), "command finished");
    Ok(ProcessOutput {
        output,
        termination,
        bytes_seen: used.load(Ordering::SeqCst),
    })
}

/// Read a stream into `sink` until EOF or until the shared budget runs out
async fn read_limited<R>(
    mut reader: R,
    sink: Arc<Mutex<Vec<u8>>>,
    used: Arc<AtomicUsize>,
    limit: usize,
    overflow: Arc<Notify>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }

        let before = used.fetch_add(n, Ordering::SeqCst);
        let room = limit.saturating_sub(before);
        if let Ok(mut buf) = sink.lock() {
            buf.extend_from_slice(&chunk[..n.min(room)]);
        }

        if before + n > limit {
            overflow.notify_one();
            return Ok(());
        }
    }
}

async fn join_reader(mut handle: JoinHandle<std::io::Result<()>>) {
    match tokio::time::timeout(READER_GRACE, &mut handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(err = %e, "failed reading child output"),
        Ok(Err(e)) => warn!(err = %e, "output reader task failed"),
        Err(_) => {
            // A grandchild may still hold the pipe open; keep what was read
            handle.abort();
            warn!("output reader did not finish after kill");
        }
    }
}

fn take(buf: &Mutex<Vec<u8>>) -> Vec<u8> {
    buf.lock().map(|mut b| std::mem::take(&mut *b)).unwrap_or_default()
}
