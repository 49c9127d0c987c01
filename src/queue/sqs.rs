use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{Message, MessageAttributeValue, MessageSystemAttributeName};
use aws_sdk_sqs::Client;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::job::Job;
use crate::queue::{job_attributes, JobQueue, QueueMessage};

/// Amazon SQS backed queue.
#[derive(Debug, Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
    max_messages: i32,
    wait_time_secs: i32,
    visibility_timeout_secs: i32,
}

impl SqsQueue {
    pub fn new(client: Client, queue_url: impl Into<String>, config: &QueueConfig) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            max_messages: config.max_messages.clamp(1, 10),
            wait_time_secs: config.wait_time_secs.clamp(0, 20),
            visibility_timeout_secs: config.visibility_timeout_secs.max(0),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

fn into_queue_message(message: Message) -> Option<QueueMessage> {
    let Some(receipt_handle) = message.receipt_handle else {
        tracing::warn!(message_id = ?message.message_id, "Message without receipt handle, skipping");
        return None;
    };

    let receive_count = message
        .attributes
        .as_ref()
        .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|count| count.parse().ok())
        .unwrap_or(1);

    let attributes = message
        .message_attributes
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(name, value)| value.string_value.map(|v| (name, v)))
        .collect();

    Some(QueueMessage {
        message_id: message.message_id.unwrap_or_default(),
        receipt_handle,
        body: message.body.unwrap_or_default(),
        receive_count,
        attributes,
    })
}

fn string_attribute(value: String) -> Result<MessageAttributeValue, QueueError> {
    MessageAttributeValue::builder()
        .data_type("String")
        .string_value(value)
        .build()
        .map_err(|e| QueueError::Send(e.to_string()))
}

#[async_trait]
impl JobQueue for SqsQueue {
    async fn receive(&self) -> Result<Vec<QueueMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(self.max_messages)
            .wait_time_seconds(self.wait_time_secs)
            .visibility_timeout(self.visibility_timeout_secs)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(&e).to_string()))?;

        Ok(output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(into_queue_message)
            .collect())
    }

    async fn acknowledge(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Acknowledge(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn enqueue(&self, job: &Job) -> Result<String, QueueError> {
        let body = job
            .to_message_body()
            .map_err(|e| QueueError::Send(e.to_string()))?;

        let attributes = job_attributes(job)
            .into_iter()
            .map(|(name, value)| Ok((name, string_attribute(value)?)))
            .collect::<Result<HashMap<_, _>, QueueError>>()?;

        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .set_message_attributes(Some(attributes))
            .send()
            .await
            .map_err(|e| QueueError::Send(DisplayErrorContext(&e).to_string()))?;

        Ok(output.message_id.unwrap_or_default())
    }
}
