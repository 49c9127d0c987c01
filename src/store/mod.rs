//! Durable job record store.
//!
//! One item per `job_id`. Every write is an unconditional full replace, so
//! duplicate terminal writes from redelivery are harmless: last write wins.

pub mod dynamodb;
pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::job::JobRecord;

pub use dynamodb::DynamoStore;
pub use memory::InMemoryStore;

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Replace the record for `record.job_id`.
    async fn put_record(&self, record: &JobRecord) -> Result<(), StoreError>;

    async fn get_record(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError>;
}
