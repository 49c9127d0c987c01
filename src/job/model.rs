use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Languages the sandbox knows how to run. Anything else is rejected
/// before it can reach the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Ruby,
    Go,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::JavaScript,
        Language::Ruby,
        Language::Go,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Ruby => "ruby",
            Language::Go => "go",
        }
    }

    /// Comma separated whitelist, used in validation messages.
    pub fn supported() -> String {
        Self::ALL
            .iter()
            .map(Language::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|lang| lang.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// A job that passed validation and may be handed to the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub language: Language,
    pub code: String,
    #[serde(rename = "timeout", alias = "timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<String>,
}

impl Job {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }

    /// Serialized message body, the same shape the worker parses.
    pub fn to_message_body(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Loosely typed view of a queue message body.
///
/// Only the outer shape (a JSON object) is enforced here. Missing or
/// mistyped fields are left for validation so they turn into a recorded
/// `ERROR` instead of a silently discarded message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobEnvelope {
    #[serde(default)]
    pub job_id: Option<Value>,
    #[serde(default)]
    pub language: Option<Value>,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub timeout: Option<Value>,
    /// Alternate spelling of `timeout`, kept as its own field so a body
    /// carrying both still decodes.
    #[serde(default)]
    pub timeout_seconds: Option<Value>,
    #[serde(default)]
    pub submitted_at: Option<Value>,
}

impl JobEnvelope {
    /// Decode a message body. Fails only when the body is not a JSON object.
    pub fn parse(body: &str) -> serde_json::Result<Self> {
        match serde_json::from_str(body)? {
            value @ Value::Object(_) => serde_json::from_value(value),
            _ => Err(serde::de::Error::custom("message body is not a JSON object")),
        }
    }

    /// The record key, when the message carries a usable one.
    pub fn job_id(&self) -> Option<&str> {
        match self.job_id.as_ref().and_then(Value::as_str) {
            Some(id) if !id.is_empty() => Some(id),
            _ => None,
        }
    }

    /// Language as submitted, even when it is not on the whitelist.
    pub fn language_str(&self) -> Option<&str> {
        self.language.as_ref().and_then(Value::as_str)
    }

    pub fn submitted_at_str(&self) -> Option<&str> {
        self.submitted_at.as_ref().and_then(Value::as_str)
    }

    /// Requested timeout. `timeout` wins when both spellings are present.
    pub fn timeout_value(&self) -> Option<&Value> {
        match &self.timeout {
            None | Some(Value::Null) => self.timeout_seconds.as_ref(),
            Some(value) => Some(value),
        }
    }
}
