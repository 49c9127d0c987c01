use std::sync::Arc;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::{ConfigError, Result, WorkerError};
use crate::queue::{JobQueue, SqsQueue};
use crate::sandbox::{DockerSandbox, Sandbox};
use crate::store::{DynamoStore, ResultStore};
use crate::worker::{CircuitBreaker, Heartbeat, QueueConsumer, ResultWriter};

/// Resolve AWS credentials and region from the default chain, with an optional region override.
pub async fn load_aws_config(region: Option<&str>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    loader.load().await
}

/// One worker process: a sequential consumer loop plus a heartbeat task.
pub struct WorkerNode {
    config: WorkerConfig,
    consumer: QueueConsumer,
    heartbeat: Heartbeat,
}

impl WorkerNode {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ResultStore>,
        sandbox: Arc<dyn Sandbox>,
    ) -> Self {
        let writer = ResultWriter::new(
            store,
            config.worker_id.clone(),
            config.retry.clone(),
            config.store.retention,
        );
        let consumer = QueueConsumer::new(queue, sandbox, writer, config.limits.clone());
        let heartbeat = Heartbeat::new(
            config.lifecycle.heartbeat_path.clone(),
            config.lifecycle.heartbeat_interval,
        );

        Self {
            config,
            consumer,
            heartbeat,
        }
    }

    /// Wire the node to SQS, DynamoDB and the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the queue URL is missing or a
    /// sandbox limit is out of bounds.
    pub async fn from_config(config: WorkerConfig) -> Result<Self> {
        config.validate()?;
        let queue_url = config
            .queue
            .queue_url
            .clone()
            .ok_or(ConfigError::MissingQueueUrl)?;

        if config.visibility_timeout_too_short() {
            tracing::warn!(
                visibility_timeout_secs = config.queue.visibility_timeout_secs,
                max_processing_secs = config.max_message_processing_time().as_secs_f64(),
                "Visibility timeout is shorter than worst-case processing time, jobs may run twice"
            );
        }

        let aws = load_aws_config(config.region.as_deref()).await;
        let queue = SqsQueue::new(aws_sdk_sqs::Client::new(&aws), queue_url, &config.queue);
        let store = DynamoStore::new(
            aws_sdk_dynamodb::Client::new(&aws),
            config.store.table_name.clone(),
        );
        let sandbox = DockerSandbox::new(config.sandbox.clone())?;

        Ok(Self::new(
            config,
            Arc::new(queue),
            Arc::new(store),
            Arc::new(sandbox),
        ))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run until `token` is cancelled or the circuit breaker trips.
    ///
    /// Shutdown is honored before each poll, between messages of a batch and
    /// during the error backoff. A job that has started always finishes first.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::CircuitOpen`] after too many consecutive poll failures.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        tracing::info!(
            worker_id = %self.config.worker_id,
            queue_url = self.config.queue.queue_url.as_deref().unwrap_or_default(),
            table = %self.config.store.table_name,
            "Worker starting"
        );

        let heartbeat_token = token.child_token();
        let heartbeat_task = {
            let heartbeat = self.heartbeat.clone();
            let token = heartbeat_token.clone();
            tokio::spawn(async move { heartbeat.run(token).await })
        };

        let result = self.consume(&token).await;

        heartbeat_token.cancel();
        if let Err(e) = heartbeat_task.await {
            tracing::warn!(error = %e, "Heartbeat task ended abnormally");
        }

        match &result {
            Ok(()) => tracing::info!(worker_id = %self.config.worker_id, "Worker stopped"),
            Err(e) => tracing::error!(worker_id = %self.config.worker_id, error = %e, "Worker stopping"),
        }
        result
    }

    async fn consume(&self, token: &CancellationToken) -> Result<()> {
        let lifecycle = &self.config.lifecycle;
        let mut breaker = CircuitBreaker::new(lifecycle.max_consecutive_errors);

        while !token.is_cancelled() {
            match self.consumer.poll_once(token).await {
                Ok(_) => breaker.record_success(),
                Err(e) => {
                    let open = breaker.record_failure();
                    tracing::error!(
                        error = %e,
                        consecutive_errors = breaker.consecutive_failures(),
                        threshold = breaker.threshold(),
                        "Queue poll failed"
                    );
                    if open {
                        return Err(WorkerError::CircuitOpen(breaker.consecutive_failures()));
                    }
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(lifecycle.error_backoff) => {}
                    }
                }
            }
        }
        Ok(())
    }
}
