//! Independent re-validation of jobs pulled off the queue.
//!
//! Submission validates too, but the worker never trusts that: the two may
//! run different policy versions, and the queue can carry anything.

use serde_json::Value;
use thiserror::Error;

use crate::config::JobLimits;
use crate::job::model::{Job, JobEnvelope, Language};
use crate::job::outcome::{truncate_utf8, MAX_ECHO_BYTES};

/// Why a well-formed message was refused. Every message names the field.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field '{0}' must not be empty")]
    Empty(&'static str),

    #[error("field 'language': unsupported language '{language}' (supported: {supported})")]
    UnsupportedLanguage { language: String, supported: String },

    #[error("field 'code' exceeds size limit of {limit} bytes")]
    CodeTooLarge { limit: usize },

    #[error("field 'timeout' must be greater than 0 and at most {max} seconds")]
    InvalidTimeout { max: f64 },
}

impl ValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField(f) | ValidationError::Empty(f) => f,
            ValidationError::WrongType { field, .. } => field,
            ValidationError::UnsupportedLanguage { .. } => "language",
            ValidationError::CodeTooLarge { .. } => "code",
            ValidationError::InvalidTimeout { .. } => "timeout",
        }
    }
}

/// Check a decoded envelope against the whitelist, size and timeout rules.
///
/// A missing timeout defaults to the maximum allowed.
pub fn validate(envelope: &JobEnvelope, limits: &JobLimits) -> Result<Job, ValidationError> {
    let job_id = required_str(&envelope.job_id, "job_id")?;
    if job_id.is_empty() {
        return Err(ValidationError::Empty("job_id"));
    }

    let language = required_str(&envelope.language, "language")?;
    let language: Language =
        language
            .parse()
            .map_err(|mut language: String| {
                truncate_utf8(&mut language, MAX_ECHO_BYTES);
                ValidationError::UnsupportedLanguage {
                    language,
                    supported: Language::supported(),
                }
            })?;

    let code = required_str(&envelope.code, "code")?;
    if code.len() > limits.max_code_bytes {
        return Err(ValidationError::CodeTooLarge {
            limit: limits.max_code_bytes,
        });
    }

    let timeout_seconds = match envelope.timeout_value() {
        None | Some(Value::Null) => limits.max_timeout_secs,
        Some(value) => {
            let secs = value.as_f64().ok_or(ValidationError::WrongType {
                field: "timeout",
                expected: "a number",
            })?;
            check_timeout(secs, limits)?;
            secs
        }
    };

    Ok(Job {
        job_id: job_id.to_string(),
        language,
        code: code.to_string(),
        timeout_seconds,
        submitted_at: envelope.submitted_at_str().map(str::to_string),
    })
}

/// Timeouts live in `(0, max]`.
pub fn check_timeout(secs: f64, limits: &JobLimits) -> Result<(), ValidationError> {
    if secs.is_finite() && secs > 0.0 && secs <= limits.max_timeout_secs {
        Ok(())
    } else {
        Err(ValidationError::InvalidTimeout {
            max: limits.max_timeout_secs,
        })
    }
}

fn required_str<'a>(
    value: &'a Option<Value>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    match value {
        None | Some(Value::Null) => Err(ValidationError::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ValidationError::WrongType {
            field,
            expected: "a string",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(body: &str) -> JobEnvelope {
        JobEnvelope::parse(body).unwrap()
    }

    fn limits() -> JobLimits {
        JobLimits::default()
    }

    #[test]
    fn accepts_valid_job() {
        let job = validate(
            &envelope(
                r#"{"job_id": "test-123", "language": "python", "code": "print('hello')", "timeout": 5}"#,
            ),
            &limits(),
        )
        .unwrap();
        assert_eq!(job.job_id, "test-123");
        assert_eq!(job.language, Language::Python);
        assert_eq!(job.timeout_seconds, 5.0);
    }

    #[test]
    fn timeout_wins_over_timeout_seconds() {
        let job = validate(
            &envelope(
                r#"{"job_id": "a", "language": "go", "code": "x", "timeout": 5, "timeout_seconds": 2}"#,
            ),
            &limits(),
        )
        .unwrap();
        assert_eq!(job.timeout_seconds, 5.0);

        let job = validate(
            &envelope(r#"{"job_id": "a", "language": "go", "code": "x", "timeout_seconds": 2}"#),
            &limits(),
        )
        .unwrap();
        assert_eq!(job.timeout_seconds, 2.0);
    }

    #[test]
    fn unsupported_language_echo_is_cut() {
        let body = serde_json::json!({"job_id": "a", "language": "z".repeat(50_000), "code": "x"});
        let err = validate(&envelope(&body.to_string()), &limits()).unwrap_err();
        match err {
            ValidationError::UnsupportedLanguage { language, .. } => {
                assert_eq!(language.len(), MAX_ECHO_BYTES)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_fields_are_named() {
        let err = validate(&envelope(r#"{"language": "python", "code": "x"}"#), &limits())
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("job_id"));
        assert!(err.to_string().contains("job_id"));

        let err = validate(&envelope(r#"{"job_id": "a", "language": "python"}"#), &limits())
            .unwrap_err();
        assert_eq!(err.field(), "code");
    }

    #[test]
    fn unsupported_language_names_the_field() {
        for lang in ["haskell", "Python", "", "rust"] {
            let body = format!(r#"{{"job_id": "a", "language": "{lang}", "code": "x"}}"#);
            let err = validate(&envelope(&body), &limits()).unwrap_err();
            assert_eq!(err.field(), "language");
            let msg = err.to_string();
            assert!(msg.contains("language"), "{msg}");
            assert!(msg.contains("unsupported language"), "{msg}");
        }
    }

    #[test]
    fn oversized_code_fails_regardless_of_content() {
        let limit = limits().max_code_bytes;
        let messages: Vec<String> = ["x", "print(1)\n", "é"]
            .iter()
            .map(|chunk| {
                let code = chunk.repeat(limit / chunk.len() + 1);
                assert!(code.len() > limit);
                let env = JobEnvelope {
                    job_id: Some("a".into()),
                    language: Some("python".into()),
                    code: Some(code.into()),
                    ..Default::default()
                };
                validate(&env, &limits()).unwrap_err().to_string()
            })
            .collect();
        assert!(messages.iter().all(|m| m == &messages[0]));
        assert!(messages[0].contains("exceeds size limit"));
    }

    #[test]
    fn code_at_the_limit_is_accepted() {
        let env = JobEnvelope {
            job_id: Some("a".into()),
            language: Some("ruby".into()),
            code: Some("x".repeat(limits().max_code_bytes).into()),
            ..Default::default()
        };
        assert!(validate(&env, &limits()).is_ok());
    }

    #[test]
    fn timeout_boundaries() {
        let l = limits();
        assert!(check_timeout(l.max_timeout_secs, &l).is_ok());
        assert!(check_timeout(0.001, &l).is_ok());
        assert!(check_timeout(l.max_timeout_secs + 0.001, &l).is_err());
        assert!(check_timeout(l.max_timeout_secs + 1.0, &l).is_err());
        assert!(check_timeout(0.0, &l).is_err());
        assert!(check_timeout(-1.0, &l).is_err());
        assert!(check_timeout(f64::NAN, &l).is_err());
        assert!(check_timeout(f64::INFINITY, &l).is_err());
    }

    #[test]
    fn out_of_range_timeout_in_message() {
        let err = validate(
            &envelope(r#"{"job_id": "a", "language": "go", "code": "x", "timeout": 100}"#),
            &limits(),
        )
        .unwrap_err();
        assert_eq!(err.field(), "timeout");
        assert!(err.to_string().contains("at most 10 seconds"));
    }

    #[test]
    fn non_numeric_timeout_is_a_validation_error() {
        let err = validate(
            &envelope(r#"{"job_id": "a", "language": "go", "code": "x", "timeout": "5"}"#),
            &limits(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::WrongType {
                field: "timeout",
                expected: "a number"
            }
        );
    }

    #[test]
    fn missing_timeout_defaults_to_maximum() {
        let job = validate(
            &envelope(r#"{"job_id": "a", "language": "javascript", "code": "1", "submitted_at": "2024-01-01T00:00:00"}"#),
            &limits(),
        )
        .unwrap();
        assert_eq!(job.timeout_seconds, limits().max_timeout_secs);
        assert_eq!(job.submitted_at.as_deref(), Some("2024-01-01T00:00:00"));
    }
}
