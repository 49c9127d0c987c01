use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::job::Language;

/// Hard ceilings for sandbox resources. Configuration may tighten these,
/// never relax them.
pub const MAX_MEMORY_MB: u32 = 256;
pub const MAX_CPUS: f64 = 0.5;
pub const MAX_PIDS: u32 = 50;
pub const MAX_EXECUTION_SECS: f64 = 10.0;

pub const DEFAULT_TABLE_NAME: &str = "code-executions";
pub const FALLBACK_WORKER_ID: &str = "worker-001";

/// Configuration for Docker-based job execution.
///
/// Isolation flags (no network, read-only root, dropped capabilities,
/// no-new-privileges) are not configurable. Only the numeric limits and
/// the image per language are.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Container runtime CLI
    pub docker_bin: String,
    /// Runtime image per language
    pub images: BTreeMap<Language, String>,
    pub memory_mb: u32,
    pub cpus: f64,
    pub pids_limit: u32,
    /// Byte budget for each of stdout and stderr
    pub output_limit_bytes: usize,
    /// How long to wait for `docker rm --force` after a timeout
    pub cleanup_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let images = [
            (Language::Python, "python:3.11-alpine"),
            (Language::JavaScript, "node:20-alpine"),
            (Language::Ruby, "ruby:3.2-alpine"),
            (Language::Go, "golang:1.21-alpine"),
        ]
        .into_iter()
        .map(|(lang, image)| (lang, image.to_string()))
        .collect();

        Self {
            docker_bin: "docker".to_string(),
            images,
            memory_mb: MAX_MEMORY_MB,
            cpus: MAX_CPUS,
            pids_limit: MAX_PIDS,
            output_limit_bytes: 4000,
            cleanup_timeout: Duration::from_secs(10),
        }
    }
}

impl SandboxConfig {
    /// Reject any limit that is zero or above its ceiling.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_mb == 0 {
            return Err(ConfigError::LimitNotPositive("memory"));
        }
        if self.memory_mb > MAX_MEMORY_MB {
            return Err(ConfigError::LimitTooHigh {
                limit: "memory",
                value: format!("{}m", self.memory_mb),
                ceiling: format!("{}m", MAX_MEMORY_MB),
            });
        }
        if self.cpus.is_nan() || self.cpus <= 0.0 {
            return Err(ConfigError::LimitNotPositive("cpus"));
        }
        if self.cpus > MAX_CPUS {
            return Err(ConfigError::LimitTooHigh {
                limit: "cpus",
                value: self.cpus.to_string(),
                ceiling: MAX_CPUS.to_string(),
            });
        }
        if self.pids_limit == 0 {
            return Err(ConfigError::LimitNotPositive("pids"));
        }
        if self.pids_limit > MAX_PIDS {
            return Err(ConfigError::LimitTooHigh {
                limit: "pids",
                value: self.pids_limit.to_string(),
                ceiling: MAX_PIDS.to_string(),
            });
        }
        if self.output_limit_bytes == 0 {
            return Err(ConfigError::LimitNotPositive("output limit"));
        }
        Ok(())
    }

    pub fn image_for(&self, language: Language) -> Option<&str> {
        self.images.get(&language).map(String::as_str)
    }

    pub fn with_image(mut self, language: Language, image: impl Into<String>) -> Self {
        self.images.insert(language, image.into());
        self
    }
}

/// Static admission rules applied to every job pulled off the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct JobLimits {
    pub max_code_bytes: usize,
    pub max_timeout_secs: f64,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            max_code_bytes: 10 * 1024,
            max_timeout_secs: MAX_EXECUTION_SECS,
        }
    }
}

impl JobLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_code_bytes == 0 {
            return Err(ConfigError::LimitNotPositive("code size"));
        }
        if self.max_timeout_secs.is_nan() || self.max_timeout_secs <= 0.0 {
            return Err(ConfigError::LimitNotPositive("timeout"));
        }
        if self.max_timeout_secs > MAX_EXECUTION_SECS {
            return Err(ConfigError::LimitTooHigh {
                limit: "timeout",
                value: format!("{}s", self.max_timeout_secs),
                ceiling: format!("{}s", MAX_EXECUTION_SECS),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub queue_url: Option<String>,
    /// Messages per receive call (SQS allows 1..=10)
    pub max_messages: i32,
    /// Long-poll wait (SQS allows up to 20s)
    pub wait_time_secs: i32,
    pub visibility_timeout_secs: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_url: None,
            max_messages: 1,
            wait_time_secs: 20,
            visibility_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub table_name: String,
    /// How long terminal records live before the store expires them
    pub retention: chrono::Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            retention: chrono::Duration::days(7),
        }
    }
}

/// Bounded retry for durable writes. Delay doubles after each failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt + 1`, where `attempt` is zero based.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Sum of all sleeps when every attempt fails.
    pub fn worst_case_delay(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_after(attempt))
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub heartbeat_path: PathBuf,
    pub heartbeat_interval: Duration,
    /// Consecutive failed poll cycles before the worker gives up
    pub max_consecutive_errors: u32,
    pub error_backoff: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            heartbeat_path: PathBuf::from("/tmp/worker-heartbeat"),
            heartbeat_interval: Duration::from_secs(30),
            max_consecutive_errors: 5,
            error_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Overrides the region resolved by the AWS default chain
    pub region: Option<String>,
    pub queue: QueueConfig,
    pub store: StoreConfig,
    pub sandbox: SandboxConfig,
    pub limits: JobLimits,
    pub retry: RetryConfig,
    pub lifecycle: LifecycleConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            region: None,
            queue: QueueConfig::default(),
            store: StoreConfig::default(),
            sandbox: SandboxConfig::default(),
            limits: JobLimits::default(),
            retry: RetryConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            queue: QueueConfig {
                queue_url: Some(queue_url.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Startup checks. Any error here is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.queue.queue_url.as_deref() {
            Some(url) if !url.trim().is_empty() => {}
            _ => return Err(ConfigError::MissingQueueUrl),
        }
        if !(1..=10).contains(&self.queue.max_messages) {
            return Err(ConfigError::InvalidBatchSize(self.queue.max_messages));
        }
        self.sandbox.validate()?;
        self.limits.validate()?;
        Ok(())
    }

    /// Worst-case time one message can spend in the pipeline.
    pub fn max_message_processing_time(&self) -> Duration {
        Duration::from_secs_f64(self.limits.max_timeout_secs)
            + self.sandbox.cleanup_timeout
            + self.retry.worst_case_delay()
    }

    /// Whether another consumer could see a message while we still work on it.
    pub fn visibility_timeout_too_short(&self) -> bool {
        let visibility = Duration::from_secs(self.queue.visibility_timeout_secs.max(0) as u64);
        visibility <= self.max_message_processing_time()
    }
}

/// Host name, falling back to a fixed identity.
pub fn default_worker_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_WORKER_ID.to_string())
}

/// Parse `python=python:3.12-alpine,go=golang:1.22-alpine`.
pub fn parse_image_overrides(spec: &str) -> Result<Vec<(Language, String)>, ConfigError> {
    spec.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (lang, image) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidImageOverride(entry.to_string()))?;
            let (lang, image) = (lang.trim(), image.trim());
            if image.is_empty() {
                return Err(ConfigError::InvalidImageOverride(entry.to_string()));
            }
            let lang: Language = lang.parse().map_err(ConfigError::UnknownLanguage)?;
            Ok((lang, image.to_string()))
        })
        .collect()
}
