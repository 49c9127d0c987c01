use std::sync::Arc;

use chrono::Utc;

use crate::config::RetryConfig;
use crate::error::StoreError;
use crate::job::{ExecutionOutcome, JobMetadata, JobRecord};
use crate::store::ResultStore;

/// Persists terminal outcomes with bounded exponential backoff.
///
/// Giving up is reported to the caller, never fatal: the consumer leaves
/// the message on the queue so a later delivery retries the whole pipeline.
#[derive(Clone)]
pub struct ResultWriter {
    store: Arc<dyn ResultStore>,
    worker_id: String,
    retry: RetryConfig,
    retention: chrono::Duration,
}

impl ResultWriter {
    pub fn new(
        store: Arc<dyn ResultStore>,
        worker_id: impl Into<String>,
        retry: RetryConfig,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            store,
            worker_id: worker_id.into(),
            retry,
            retention,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Build the terminal record and replace whatever is stored under `job_id`.
    pub async fn write(
        &self,
        job_id: &str,
        outcome: &ExecutionOutcome,
        metadata: &JobMetadata,
    ) -> Result<JobRecord, StoreError> {
        let record = JobRecord::completed(
            job_id,
            outcome,
            metadata,
            &self.worker_id,
            Utc::now(),
            self.retention,
        );

        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.store.put_record(&record).await {
                Ok(()) => {
                    tracing::info!(job_id, status = %record.status, attempt = attempt + 1, "Stored job result");
                    return Ok(record);
                }
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        job_id,
                        error = %e,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Result write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        job_id,
                        error = %e,
                        attempts = attempt + 1,
                        "Giving up on result write"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ExecutionStatus, JobStatus};
    use crate::store::InMemoryStore;
    use std::time::{Duration, Instant};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
        }
    }

    fn writer(store: Arc<InMemoryStore>) -> ResultWriter {
        ResultWriter::new(store, "worker-t", fast_retry(), chrono::Duration::days(7))
    }

    fn metadata() -> JobMetadata {
        JobMetadata {
            language: "python".to_string(),
            submitted_at: None,
        }
    }

    fn success() -> ExecutionOutcome {
        ExecutionOutcome::exited(0, "hello world\n".into(), String::new(), 310)
    }

    #[tokio::test]
    async fn writes_terminal_record() {
        let store = Arc::new(InMemoryStore::new());
        let rec = writer(store.clone())
            .write("job-1", &success(), &metadata())
            .await
            .unwrap();

        assert_eq!(rec.status, JobStatus::Success);
        assert_eq!(rec.worker_id.as_deref(), Some("worker-t"));
        let ttl = rec.ttl.unwrap();
        let expected = Utc::now().timestamp() + 7 * 24 * 3600;
        assert!((expected - ttl).abs() <= 5);
        assert_eq!(store.record("job-1"), Some(rec));
    }

    #[tokio::test]
    async fn retries_transient_failures_with_backoff() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_next_puts(2);

        let started = Instant::now();
        let result = writer(store.clone())
            .write("job-1", &success(), &metadata())
            .await;

        assert!(result.is_ok());
        assert_eq!(store.put_attempts(), 3);
        // 20ms + 40ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert!(store.record("job-1").is_some());
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_next_puts(5);

        let err = writer(store.clone())
            .write("job-1", &success(), &metadata())
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(store.put_attempts(), 3);
        assert!(store.record("job-1").is_none());
    }

    #[tokio::test]
    async fn permanent_rejection_is_not_retried() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_next_put_with(StoreError::Rejected("item too large".to_string()));

        let err = writer(store.clone())
            .write("job-1", &success(), &metadata())
            .await
            .unwrap_err();

        assert_eq!(err, StoreError::Rejected("item too large".to_string()));
        assert_eq!(store.put_attempts(), 1);
    }

    #[tokio::test]
    async fn repeated_writes_are_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let writer = writer(store.clone());
        let outcome = ExecutionOutcome::exited(1, String::new(), "boom".into(), 5);

        let first = writer.write("job-1", &outcome, &metadata()).await.unwrap();
        let once = store.record("job-1").unwrap();
        let second = writer.write("job-1", &outcome, &metadata()).await.unwrap();
        let twice = store.record("job-1").unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(twice, second);
        // Only the completion stamp moves between identical writes.
        let strip = |mut r: JobRecord| {
            r.timestamp = None;
            r.ttl = None;
            r
        };
        assert_eq!(strip(once), strip(twice));
        assert_eq!(first.status, JobStatus::Error);
        assert_eq!(outcome.status, ExecutionStatus::Error);
    }
}
