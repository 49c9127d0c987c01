use std::fmt;

use serde::{Deserialize, Serialize};

use crate::job::validation::ValidationError;

/// Exit code reserved for runs without a well-defined exit.
pub const NO_EXIT_CODE: i32 = -1;

/// Byte budget for stored output and error text.
pub const MAX_TEXT_BYTES: usize = 4000;

/// Longest slice of a submitted value copied into a record or message.
pub const MAX_ECHO_BYTES: usize = 64;

/// Terminal classification of one sandbox run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "SUCCESS"),
            ExecutionStatus::Error => write!(f, "ERROR"),
            ExecutionStatus::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// What came out of the sandbox, already truncated to the storage budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub execution_time_ms: u64,
}

impl ExecutionOutcome {
    /// Classify a process that exited on its own.
    pub fn exited(exit_code: i32, stdout: String, stderr: String, execution_time_ms: u64) -> Self {
        let status = if exit_code == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Error
        };
        Self {
            status,
            stdout,
            stderr,
            exit_code,
            execution_time_ms,
        }
    }

    pub fn timed_out(limit_secs: f64, stdout: String, execution_time_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::Timeout,
            stdout,
            stderr: format!("Execution exceeded time limit of {}s", limit_secs),
            exit_code: NO_EXIT_CODE,
            execution_time_ms,
        }
    }

    /// The sandbox itself could not be launched or supervised.
    pub fn internal_error(detail: impl fmt::Display, execution_time_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::Error,
            stdout: String::new(),
            stderr: format!("Internal execution error: {}", detail),
            exit_code: NO_EXIT_CODE,
            execution_time_ms,
        }
    }

    pub fn rejected(err: &ValidationError) -> Self {
        let mut stderr = format!("Validation error: {}", err);
        truncate_utf8(&mut stderr, MAX_TEXT_BYTES);
        Self {
            status: ExecutionStatus::Error,
            stdout: String::new(),
            stderr,
            exit_code: NO_EXIT_CODE,
            execution_time_ms: 0,
        }
    }
}

/// Keep at most `max_bytes` of `text`, cutting back to a char boundary.
pub fn truncate_utf8(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}
