//! Durable job queue.
//!
//! Delivery is at-least-once. A received message stays hidden from other
//! consumers for the visibility timeout and comes back if it is not
//! acknowledged in time, possibly to a different worker.

pub mod memory;
pub mod sqs;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::QueueError;
use crate::job::Job;

pub use memory::InMemoryQueue;
pub use sqs::SqsQueue;

/// Message attribute carrying the job id, for broker-side filtering.
pub const ATTR_JOB_ID: &str = "job_id";
/// Message attribute carrying the language, for broker-side filtering.
pub const ATTR_LANGUAGE: &str = "language";

/// One delivery of a queued job.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub message_id: String,
    /// Token for this delivery only; a redelivery gets a new one.
    pub receipt_handle: String,
    pub body: String,
    /// Approximate number of times the message has been delivered.
    pub receive_count: u32,
    pub attributes: HashMap<String, String>,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Long-poll for the next batch. An empty batch is not an error.
    async fn receive(&self) -> Result<Vec<QueueMessage>, QueueError>;

    /// Remove a delivered message for good.
    async fn acknowledge(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Enqueue a job with its id and language as message attributes.
    /// Returns the broker's message id.
    async fn enqueue(&self, job: &Job) -> Result<String, QueueError>;
}

/// Attributes attached to every enqueued job.
pub fn job_attributes(job: &Job) -> HashMap<String, String> {
    HashMap::from([
        (ATTR_JOB_ID.to_string(), job.job_id.clone()),
        (ATTR_LANGUAGE.to_string(), job.language.to_string()),
    ])
}
