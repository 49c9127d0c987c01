use thiserror::Error;

/// Fatal startup misconfiguration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("queue URL is not set (SQS_QUEUE_URL)")]
    MissingQueueUrl,

    #[error("sandbox {limit} of {value} exceeds the allowed ceiling of {ceiling}")]
    LimitTooHigh {
        limit: &'static str,
        value: String,
        ceiling: String,
    },

    #[error("sandbox {0} must be greater than zero")]
    LimitNotPositive(&'static str),

    #[error("invalid image override '{0}', expected language=image")]
    InvalidImageOverride(String),

    #[error("image override for unsupported language '{0}'")]
    UnknownLanguage(String),

    #[error("max messages per poll must be between 1 and 10, got {0}")]
    InvalidBatchSize(i32),
}

/// Failure talking to the job queue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("receive failed: {0}")]
    Receive(String),

    #[error("acknowledge failed: {0}")]
    Acknowledge(String),

    #[error("send failed: {0}")]
    Send(String),
}

/// Failure talking to the durable job record store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Throttling, network trouble, service errors. Worth retrying.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the request itself. Retrying cannot help.
    #[error("store rejected request: {0}")]
    Rejected(String),

    #[error("malformed record {job_id}: {reason}")]
    Malformed { job_id: String, reason: String },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("circuit breaker open after {0} consecutive infrastructure errors")]
    CircuitOpen(u32),

    #[error("failed to install signal handler: {0}")]
    Signal(std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
