use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;

/// Listen for SIGTERM and SIGINT and cancel the returned token on the first one.
///
/// The token only marks shutdown as requested. The run loop checks it
/// between messages, so a job that is already executing finishes first.
pub fn install_shutdown_handler() -> Result<CancellationToken, WorkerError> {
    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate()).map_err(WorkerError::Signal)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(WorkerError::Signal)?;

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!(signal = "SIGTERM", "Shutdown requested, finishing in-flight job");
            }
            _ = sigint.recv() => {
                tracing::info!(signal = "SIGINT", "Shutdown requested, finishing in-flight job");
            }
            _ = trigger.cancelled() => return,
        }
        trigger.cancel();
    });

    Ok(token)
}
