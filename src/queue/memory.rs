use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::QueueError;
use crate::job::Job;
use crate::queue::{job_attributes, JobQueue, QueueMessage};

#[derive(Debug)]
struct Entry {
    message_id: String,
    body: String,
    attributes: HashMap<String, String>,
    receive_count: u32,
    receipt_handle: Option<String>,
    invisible_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<Entry>,
    acknowledged: Vec<String>,
    next_id: u64,
    failing_receives: u32,
    failing_acks: u32,
}

/// Process-local queue with SQS-like visibility semantics.
///
/// Used for tests and local runs. Supports injecting receive and
/// acknowledge failures to exercise the worker's recovery paths.
#[derive(Debug)]
pub struct InMemoryQueue {
    inner: Mutex<Inner>,
    visibility_timeout: Duration,
    max_messages: usize,
    empty_wait: Duration,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            visibility_timeout: Duration::from_secs(30),
            max_messages: 1,
            empty_wait: Duration::from_millis(10),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max.max(1);
        self
    }

    /// How long an empty receive waits before returning, standing in for long-polling.
    pub fn with_empty_wait(mut self, wait: Duration) -> Self {
        self.empty_wait = wait;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a raw body, as a misbehaving producer might. Returns the message id.
    pub fn push_body(&self, body: impl Into<String>) -> String {
        self.push_with_attributes(body.into(), HashMap::new())
    }

    fn push_with_attributes(&self, body: String, attributes: HashMap<String, String>) -> String {
        let mut inner = self.lock();
        inner.next_id += 1;
        let message_id = format!("msg-{}", inner.next_id);
        inner.entries.push(Entry {
            message_id: message_id.clone(),
            body,
            attributes,
            receive_count: 0,
            receipt_handle: None,
            invisible_until: None,
        });
        message_id
    }

    /// Fail the next `n` receive calls.
    pub fn fail_next_receives(&self, n: u32) {
        self.lock().failing_receives = n;
    }

    /// Fail the next `n` acknowledge calls.
    pub fn fail_next_acks(&self, n: u32) {
        self.lock().failing_acks = n;
    }

    /// Messages not yet acknowledged, visible or not.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of acknowledged messages, in order.
    pub fn acknowledged(&self) -> Vec<String> {
        self.lock().acknowledged.clone()
    }

    pub fn receive_count(&self, message_id: &str) -> Option<u32> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.message_id == message_id)
            .map(|e| e.receive_count)
    }

    fn take_visible(&self) -> Result<Vec<QueueMessage>, QueueError> {
        let mut inner = self.lock();
        if inner.failing_receives > 0 {
            inner.failing_receives -= 1;
            return Err(QueueError::Receive("injected receive failure".to_string()));
        }

        let now = Instant::now();
        let visibility = self.visibility_timeout;
        Ok(inner
            .entries
            .iter_mut()
            .filter(|e| e.invisible_until.map_or(true, |until| until <= now))
            .take(self.max_messages)
            .map(|entry| {
                entry.receive_count += 1;
                let receipt = format!("{}-r{}", entry.message_id, entry.receive_count);
                entry.receipt_handle = Some(receipt.clone());
                entry.invisible_until = Some(now + visibility);
                QueueMessage {
                    message_id: entry.message_id.clone(),
                    receipt_handle: receipt,
                    body: entry.body.clone(),
                    receive_count: entry.receive_count,
                    attributes: entry.attributes.clone(),
                }
            })
            .collect())
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn receive(&self) -> Result<Vec<QueueMessage>, QueueError> {
        let messages = self.take_visible()?;
        if messages.is_empty() {
            tokio::time::sleep(self.empty_wait).await;
        }
        Ok(messages)
    }

    async fn acknowledge(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut inner = self.lock();
        if inner.failing_acks > 0 {
            inner.failing_acks -= 1;
            return Err(QueueError::Acknowledge("injected acknowledge failure".to_string()));
        }

        let position = inner
            .entries
            .iter()
            .position(|e| e.receipt_handle.as_deref() == Some(message.receipt_handle.as_str()))
            .ok_or_else(|| {
                QueueError::Acknowledge(format!(
                    "receipt handle {} is no longer valid",
                    message.receipt_handle
                ))
            })?;
        let entry = inner.entries.remove(position);
        inner.acknowledged.push(entry.message_id);
        Ok(())
    }

    async fn enqueue(&self, job: &Job) -> Result<String, QueueError> {
        let body = job
            .to_message_body()
            .map_err(|e| QueueError::Send(e.to_string()))?;
        Ok(self.push_with_attributes(body, job_attributes(job)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Language;

    fn job(id: &str) -> Job {
        Job {
            job_id: id.to_string(),
            language: Language::Python,
            code: "print(1)".to_string(),
            timeout_seconds: 5.0,
            submitted_at: None,
        }
    }

    #[tokio::test]
    async fn received_message_is_hidden_until_visibility_expires() {
        let queue = InMemoryQueue::new().with_visibility_timeout(Duration::from_millis(50));
        queue.enqueue(&job("a")).await.unwrap();

        let first = queue.receive().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].receive_count, 1);
        assert!(queue.receive().await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = queue.receive().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].receive_count, 2);
        assert_ne!(first[0].receipt_handle, second[0].receipt_handle);
    }

    #[tokio::test]
    async fn acknowledge_removes_and_stale_receipt_fails() {
        let queue = InMemoryQueue::new().with_visibility_timeout(Duration::ZERO);
        let id = queue.enqueue(&job("a")).await.unwrap();

        let stale = queue.receive().await.unwrap().remove(0);
        let fresh = queue.receive().await.unwrap().remove(0);
        assert!(queue.acknowledge(&stale).await.is_err());
        queue.acknowledge(&fresh).await.unwrap();

        assert!(queue.is_empty());
        assert_eq!(queue.acknowledged(), vec![id]);
    }

    #[tokio::test]
    async fn enqueue_sets_job_attributes() {
        let queue = InMemoryQueue::new();
        queue.enqueue(&job("abc")).await.unwrap();
        let msg = queue.receive().await.unwrap().remove(0);
        assert_eq!(msg.attributes.get("job_id").map(String::as_str), Some("abc"));
        assert_eq!(msg.attributes.get("language").map(String::as_str), Some("python"));
    }

    #[tokio::test]
    async fn batch_size_is_respected() {
        let queue = InMemoryQueue::new().with_max_messages(2);
        for i in 0..3 {
            queue.push_body(format!("{{\"n\": {i}}}"));
        }
        assert_eq!(queue.receive().await.unwrap().len(), 2);
        assert_eq!(queue.receive().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let queue = InMemoryQueue::new();
        queue.push_body("{}");
        queue.fail_next_receives(2);
        assert!(queue.receive().await.is_err());
        assert!(queue.receive().await.is_err());
        let msg = queue.receive().await.unwrap().remove(0);

        queue.fail_next_acks(1);
        assert!(queue.acknowledge(&msg).await.is_err());
        queue.acknowledge(&msg).await.unwrap();
    }
}
