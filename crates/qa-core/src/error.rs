use std::time::Duration;

use thiserror::Error;

/// Canonical error type for the quality pipeline.
///
/// The first block of variants is the pipeline's failure taxonomy. Only
/// [`QaError::InfrastructureStartup`], configuration errors and internal
/// faults end a run early; every other variant is captured into a phase or
/// step result and surfaces in the report.
#[derive(Debug, Error)]
pub enum QaError {
    /// One or more readiness endpoints never reported ready. Blocking.
    #[error("readiness timeout after {waited:?}: not ready: {}", .unready.join(", "))]
    ReadinessTimeout {
        /// Names of the endpoints still unready when the deadline passed.
        unready: Vec<String>,
        /// Total time spent waiting.
        waited: Duration,
    },

    /// A response did not match the expected status, shape or value.
    #[error("assertion failed in `{step}`: {message}")]
    Assertion {
        /// Step that made the assertion.
        step: String,
        /// Human-readable description of the failed expectation.
        message: String,
    },

    /// An asynchronous condition never held within the configured attempts.
    #[error("poll timeout in `{step}` after {attempts} attempts, last state: {last_state}")]
    PollTimeout {
        /// Step that was polling.
        step: String,
        /// Attempts consumed.
        attempts: u32,
        /// Last observed state (status and extracted field).
        last_state: String,
    },

    /// Target answered with an unexpected 4xx/5xx status.
    #[error("http error {status} ({class})")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Error class label (`http_4xx`, `http_5xx`).
        class: &'static str,
    },

    /// Request exceeded its bounded timeout.
    #[error("request timed out after {after:?}")]
    RequestTimeout {
        /// Configured timeout.
        after: Duration,
    },

    /// Service-level objectives were not met.
    #[error("SLO violation: {}", .metrics.join(", "))]
    SloViolation {
        /// Metric names whose thresholds failed.
        metrics: Vec<String>,
    },

    /// Externally managed infrastructure could not be started. Fatal.
    #[error("infrastructure startup failed: {0}")]
    InfrastructureStartup(String),

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Validation error for statically checked inputs (scenarios, tables).
    #[error("validation error: {0}")]
    Validation(String),

    /// External command failed to launch or misbehaved.
    #[error("command `{program}` failed: {message}")]
    Command {
        /// Program that was invoked.
        program: String,
        /// Failure description.
        message: String,
    },

    /// Transport-level HTTP failure (connect, reset, decode).
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error while writing artifacts or spawning processes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },
}

impl QaError {
    /// Creates an `Assertion` variant.
    #[must_use]
    pub fn assertion(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Assertion {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Creates an `Http` variant, deriving the class from the status.
    #[must_use]
    pub fn http(status: u16) -> Self {
        let class = match status {
            400..=499 => "http_4xx",
            500..=599 => "http_5xx",
            _ => "unexpected_status",
        };
        Self::Http { status, class }
    }

    /// Creates a `Validation` variant.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a `Command` variant.
    #[must_use]
    pub fn command(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error must abort the run instead of being recorded.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InfrastructureStartup(_) | Self::Config(_) | Self::Internal { .. }
        )
    }
}

impl From<serde_json::Error> for QaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for QaError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Convenient result alias for pipeline operations.
pub type QaResult<T> = Result<T, QaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_timeout_names_unready_endpoints() {
        let err = QaError::ReadinessTimeout {
            unready: vec!["render".to_string(), "script".to_string()],
            waited: Duration::from_secs(120),
        };
        let text = err.to_string();
        assert!(text.contains("render, script"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn startup_failure_is_fatal() {
        assert!(QaError::InfrastructureStartup("compose".into()).is_fatal());
        assert!(!QaError::assertion("create", "status").is_fatal());
    }

    #[test]
    fn http_class_follows_status() {
        assert_eq!(QaError::http(503).to_string(), "http error 503 (http_5xx)");
        assert!(matches!(QaError::http(404), QaError::Http { class: "http_4xx", .. }));
        assert!(matches!(QaError::http(204), QaError::Http { class: "unexpected_status", .. }));
    }
}
