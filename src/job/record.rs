use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::job::model::{Job, JobEnvelope};
use crate::job::outcome::{truncate_utf8, ExecutionOutcome, ExecutionStatus, MAX_ECHO_BYTES};

/// Persisted status. There is deliberately no running state: a `Pending`
/// record is either still queued or currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Success,
    Error,
    Timeout,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Error => "ERROR",
            JobStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "SUCCESS" => Ok(JobStatus::Success),
            "ERROR" => Ok(JobStatus::Error),
            "TIMEOUT" => Ok(JobStatus::Timeout),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

impl From<ExecutionStatus> for JobStatus {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Success => JobStatus::Success,
            ExecutionStatus::Error => JobStatus::Error,
            ExecutionStatus::Timeout => JobStatus::Timeout,
        }
    }
}

/// The parts of a job that are copied onto its record.
#[derive(Debug, Clone, PartialEq)]
pub struct JobMetadata {
    pub language: String,
    pub submitted_at: Option<String>,
}

impl JobMetadata {
    /// Metadata from a message that may not have passed validation.
    ///
    /// Submitted values are cut to a short prefix so an oversized field
    /// cannot push the record past the store's item size limit.
    pub fn from_envelope(envelope: &JobEnvelope) -> Self {
        let excerpt = |text: &str| {
            let mut text = text.to_string();
            truncate_utf8(&mut text, MAX_ECHO_BYTES);
            text
        };
        Self {
            language: excerpt(envelope.language_str().unwrap_or("unknown")),
            submitted_at: envelope.submitted_at_str().map(excerpt),
        }
    }
}

impl From<&Job> for JobMetadata {
    fn from(job: &Job) -> Self {
        Self {
            language: job.language.to_string(),
            submitted_at: job.submitted_at.clone(),
        }
    }
}

/// One durable item per job, keyed by `job_id`. Writes replace the whole item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<String>,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Expiry as Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl JobRecord {
    /// The record submission writes before enqueueing.
    pub fn pending(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: JobStatus::Pending,
            language: job.language.to_string(),
            submitted_at: job.submitted_at.clone(),
            output: String::new(),
            error: String::new(),
            exit_code: None,
            execution_time_ms: 0,
            worker_id: None,
            timestamp: None,
            ttl: None,
        }
    }

    /// Terminal record for a finished delivery attempt.
    pub fn completed(
        job_id: &str,
        outcome: &ExecutionOutcome,
        metadata: &JobMetadata,
        worker_id: &str,
        completed_at: DateTime<Utc>,
        retention: Duration,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: outcome.status.into(),
            language: metadata.language.clone(),
            submitted_at: metadata.submitted_at.clone(),
            output: outcome.stdout.clone(),
            error: outcome.stderr.clone(),
            exit_code: Some(outcome.exit_code),
            execution_time_ms: outcome.execution_time_ms,
            worker_id: Some(worker_id.to_string()),
            timestamp: Some(completed_at.to_rfc3339()),
            ttl: Some((completed_at + retention).timestamp()),
        }
    }
}
