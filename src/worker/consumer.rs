use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::config::JobLimits;
use crate::error::{QueueError, StoreError};
use crate::job::{validate, ExecutionOutcome, ExecutionStatus, Job, JobEnvelope, JobMetadata};
use crate::queue::{JobQueue, QueueMessage};
use crate::sandbox::Sandbox;
use crate::worker::ResultWriter;

/// Where a delivered message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    /// Body was not a job at all; acknowledged without a record.
    Discarded,
    /// Failed validation; an `ERROR` record was attempted and the message acknowledged.
    Rejected,
    /// Executed, stored and acknowledged.
    Completed(ExecutionStatus),
    /// Left on the queue to reappear after the visibility timeout.
    Retained,
}

/// Drives each message through parse, validate, execute, store, acknowledge.
pub struct QueueConsumer {
    queue: Arc<dyn JobQueue>,
    sandbox: Arc<dyn Sandbox>,
    writer: ResultWriter,
    limits: JobLimits,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        sandbox: Arc<dyn Sandbox>,
        writer: ResultWriter,
        limits: JobLimits,
    ) -> Self {
        Self {
            queue,
            sandbox,
            writer,
            limits,
        }
    }

    /// Receive one batch and process it in order.
    ///
    /// Returns the number of messages handled. Only a failed receive is an
    /// error; per-message trouble is settled inside [`Self::process_message`].
    /// Shutdown is checked before each message, never during one.
    pub async fn poll_once(&self, token: &CancellationToken) -> Result<usize, QueueError> {
        let messages = self.queue.receive().await?;
        if messages.is_empty() {
            tracing::debug!("No messages available");
            return Ok(0);
        }

        let mut handled = 0;
        for message in &messages {
            if token.is_cancelled() {
                tracing::info!(
                    remaining = messages.len() - handled,
                    "Shutdown requested, leaving rest of batch for redelivery"
                );
                break;
            }
            self.process_message(message).await;
            handled += 1;
        }
        Ok(handled)
    }

    /// Run one delivery to a terminal disposition. Never fails or panics outward.
    pub async fn process_message(&self, message: &QueueMessage) -> MessageDisposition {
        match AssertUnwindSafe(self.handle(message)).catch_unwind().await {
            Ok(disposition) => disposition,
            Err(panic) => {
                tracing::error!(
                    message_id = %message.message_id,
                    panic = %panic_message(panic.as_ref()),
                    "Unexpected failure while processing message, leaving it for redelivery"
                );
                MessageDisposition::Retained
            }
        }
    }

    async fn handle(&self, message: &QueueMessage) -> MessageDisposition {
        let envelope = match JobEnvelope::parse(&message.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "Discarding malformed message"
                );
                return self.settle(message, MessageDisposition::Discarded).await;
            }
        };

        let job = match validate(&envelope, &self.limits) {
            Ok(job) => job,
            Err(err) => {
                let metadata = JobMetadata::from_envelope(&envelope);
                match envelope.job_id() {
                    Some(job_id) => {
                        tracing::warn!(job_id, field = err.field(), error = %err, "Rejecting invalid job");
                        // Best effort: the message is acknowledged either way.
                        let outcome = ExecutionOutcome::rejected(&err);
                        if let Err(e) = self.writer.write(job_id, &outcome, &metadata).await {
                            tracing::error!(job_id, error = %e, "Could not record validation failure");
                        }
                    }
                    None => {
                        tracing::warn!(
                            message_id = %message.message_id,
                            error = %err,
                            "Rejecting job without a usable job_id"
                        );
                    }
                }
                return self.settle(message, MessageDisposition::Rejected).await;
            }
        };

        if message.receive_count > 1 {
            tracing::info!(
                job_id = %job.job_id,
                receive_count = message.receive_count,
                "Processing redelivered job"
            );
        }

        match self.execute_and_store(&job).await {
            Ok(status) => self.settle(message, MessageDisposition::Completed(status)).await,
            Err(e) => {
                tracing::warn!(
                    job_id = %job.job_id,
                    error = %e,
                    "Result not stored, leaving message for redelivery"
                );
                MessageDisposition::Retained
            }
        }
    }

    async fn execute_and_store(&self, job: &Job) -> Result<ExecutionStatus, StoreError> {
        tracing::info!(
            job_id = %job.job_id,
            language = %job.language,
            timeout_secs = job.timeout_seconds,
            "Executing job"
        );
        let outcome = self
            .sandbox
            .execute(job.language, &job.code, job.timeout())
            .await;
        tracing::info!(
            job_id = %job.job_id,
            status = %outcome.status,
            exit_code = outcome.exit_code,
            execution_time_ms = outcome.execution_time_ms,
            "Job finished"
        );

        self.writer
            .write(&job.job_id, &outcome, &JobMetadata::from(job))
            .await?;
        Ok(outcome.status)
    }

    async fn settle(
        &self,
        message: &QueueMessage,
        disposition: MessageDisposition,
    ) -> MessageDisposition {
        match self.queue.acknowledge(message).await {
            Ok(()) => {
                tracing::debug!(message_id = %message.message_id, ?disposition, "Message acknowledged");
                disposition
            }
            Err(e) => {
                tracing::error!(
                    message_id = %message.message_id,
                    error = %e,
                    "Failed to acknowledge message, it will be redelivered"
                );
                MessageDisposition::Retained
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
