//! Wall-clock supervision of one external process.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::job::outcome::truncate_utf8;

/// How long to wait for pipe readers once the process is gone.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Extra bytes kept past the budget so a multi-byte char at the cut
/// is decoded whole before truncation.
const UTF8_SLACK: usize = 3;

#[derive(Debug)]
pub enum RunResult {
    Exited {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
    /// Killed and reaped after the deadline passed.
    TimedOut { stdout: String, stderr: String },
}

/// Run `cmd` to completion or until `timeout` elapses, whichever is first.
///
/// `stdin` is streamed to the process when given, otherwise stdin is closed.
/// On expiry the process is killed and reaped before returning. Each output
/// stream is drained fully but only the first `output_limit` bytes are kept.
pub async fn supervise(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    output_limit: usize,
) -> io::Result<RunResult> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let mut child = cmd.spawn()?;

    if let (Some(mut pipe), Some(input)) = (child.stdin.take(), stdin) {
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&input).await {
                tracing::debug!(error = %e, "Sandbox closed stdin early");
            }
        });
    }

    let stdout = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(read_capped(pipe, output_limit + UTF8_SLACK)));
    let stderr = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(read_capped(pipe, output_limit + UTF8_SLACK)));

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            let status = status?;
            Ok(RunResult::Exited {
                status,
                stdout: collect(stdout, output_limit).await,
                stderr: collect(stderr, output_limit).await,
            })
        }
        Err(_) => {
            // kill() sends SIGKILL and waits, so nothing is left unreaped.
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill timed out process");
            }
            Ok(RunResult::TimedOut {
                stdout: collect(stdout, output_limit).await,
                stderr: collect(stderr, output_limit).await,
            })
        }
    }
}

async fn read_capped<R>(mut reader: R, keep: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::with_capacity(keep.min(8 * 1024));
    let mut buf = [0u8; 8 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = keep.saturating_sub(kept.len());
        kept.extend_from_slice(&buf[..n.min(room)]);
    }
    Ok(kept)
}

async fn collect(reader: Option<JoinHandle<io::Result<Vec<u8>>>>, limit: usize) -> String {
    let Some(mut handle) = reader else {
        return String::new();
    };
    let bytes = match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut handle).await {
        Ok(Ok(Ok(bytes))) => bytes,
        Ok(Ok(Err(e))) => {
            tracing::warn!(error = %e, "Failed to read sandbox output");
            Vec::new()
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Sandbox output reader panicked");
            Vec::new()
        }
        Err(_) => {
            // A leftover descendant still holds the pipe open.
            handle.abort();
            tracing::warn!("Sandbox output pipe did not close, dropping output");
            Vec::new()
        }
    };
    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    truncate_utf8(&mut text, limit);
    text
}
