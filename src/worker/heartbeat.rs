use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;

/// Periodically stamps a liveness file for external monitoring.
///
/// Shares nothing with the consumer loop. Write failures are logged and
/// the next tick tries again.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    path: PathBuf,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one timestamp now.
    pub async fn beat(&self) -> std::io::Result<()> {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        tokio::fs::write(&self.path, format!("{}\n", stamp)).await
    }

    /// Beat on every tick until `token` is cancelled. The first beat is immediate.
    pub async fn run(&self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.beat().await {
                        tracing::error!(path = %self.path.display(), error = %e, "Heartbeat write failed");
                    }
                }
            }
        }
        tracing::debug!(path = %self.path.display(), "Heartbeat stopped");
    }
}
