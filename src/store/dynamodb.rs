use std::collections::HashMap;
use std::fmt::Debug;
use std::str::FromStr;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;

use crate::error::StoreError;
use crate::job::{JobRecord, JobStatus};
use crate::store::ResultStore;

/// Service error codes that no amount of retrying will fix.
const PERMANENT_ERROR_CODES: &[&str] = &[
    "ValidationException",
    "ResourceNotFoundException",
    "ItemCollectionSizeLimitExceededException",
];

type Item = HashMap<String, AttributeValue>;

/// DynamoDB table keyed by the string attribute `job_id`.
///
/// The `ttl` attribute holds Unix seconds and is meant to be the table's
/// time-to-live attribute.
#[derive(Debug, Clone)]
pub struct DynamoStore {
    client: Client,
    table_name: String,
}

impl DynamoStore {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

fn classify<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: Debug,
{
    let permanent = match &err {
        SdkError::ServiceError(service) => service
            .err()
            .code()
            .is_some_and(|code| PERMANENT_ERROR_CODES.contains(&code)),
        SdkError::ConstructionFailure(_) => true,
        _ => false,
    };
    let message = DisplayErrorContext(&err).to_string();
    if permanent {
        StoreError::Rejected(message)
    } else {
        StoreError::Unavailable(message)
    }
}

pub(crate) fn to_item(record: &JobRecord) -> Item {
    let mut item = Item::new();
    item.insert("job_id".into(), AttributeValue::S(record.job_id.clone()));
    item.insert("status".into(), AttributeValue::S(record.status.to_string()));
    item.insert("language".into(), AttributeValue::S(record.language.clone()));
    item.insert("output".into(), AttributeValue::S(record.output.clone()));
    item.insert("error".into(), AttributeValue::S(record.error.clone()));
    item.insert(
        "execution_time_ms".into(),
        AttributeValue::N(record.execution_time_ms.to_string()),
    );
    if let Some(submitted_at) = &record.submitted_at {
        item.insert("submitted_at".into(), AttributeValue::S(submitted_at.clone()));
    }
    if let Some(exit_code) = record.exit_code {
        item.insert("exit_code".into(), AttributeValue::N(exit_code.to_string()));
    }
    if let Some(worker_id) = &record.worker_id {
        item.insert("worker_id".into(), AttributeValue::S(worker_id.clone()));
    }
    if let Some(timestamp) = &record.timestamp {
        item.insert("timestamp".into(), AttributeValue::S(timestamp.clone()));
    }
    if let Some(ttl) = record.ttl {
        item.insert("ttl".into(), AttributeValue::N(ttl.to_string()));
    }
    item
}

pub(crate) fn from_item(job_id: &str, item: &Item) -> Result<JobRecord, StoreError> {
    let malformed = |reason: String| StoreError::Malformed {
        job_id: job_id.to_string(),
        reason,
    };

    let status = string_attr(item, "status")
        .ok_or_else(|| malformed("missing status".to_string()))?
        .parse::<JobStatus>()
        .map_err(malformed)?;

    Ok(JobRecord {
        job_id: string_attr(item, "job_id").unwrap_or_else(|| job_id.to_string()),
        status,
        language: string_attr(item, "language").unwrap_or_else(|| "unknown".to_string()),
        submitted_at: string_attr(item, "submitted_at"),
        output: string_attr(item, "output").unwrap_or_default(),
        error: string_attr(item, "error").unwrap_or_default(),
        exit_code: number_attr(item, "exit_code").map_err(malformed)?,
        execution_time_ms: number_attr(item, "execution_time_ms")
            .map_err(malformed)?
            .unwrap_or(0),
        worker_id: string_attr(item, "worker_id"),
        timestamp: string_attr(item, "timestamp"),
        ttl: number_attr(item, "ttl").map_err(malformed)?,
    })
}

fn string_attr(item: &Item, name: &str) -> Option<String> {
    item.get(name).and_then(|v| v.as_s().ok()).cloned()
}

fn number_attr<T: FromStr>(item: &Item, name: &str) -> Result<Option<T>, String> {
    match item.get(name) {
        None | Some(AttributeValue::Null(_)) => Ok(None),
        Some(AttributeValue::N(n)) => n
            .parse()
            .map(Some)
            .map_err(|_| format!("attribute {} is not a valid number: {}", name, n)),
        Some(_) => Err(format!("attribute {} is not a number", name)),
    }
}

#[async_trait]
impl ResultStore for DynamoStore {
    async fn put_record(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(to_item(record)))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn get_record(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("job_id", AttributeValue::S(job_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(classify)?;

        output
            .item
            .map(|item| from_item(job_id, &item))
            .transpose()
    }
}
