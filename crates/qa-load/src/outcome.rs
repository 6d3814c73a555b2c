use std::time::Duration;

use qa_core::config::HttpConfig;
use qa_core::{ApiResponse, Outcome, QaError, QaResult};

/// Maps a request result to an [`Outcome`].
///
/// A response is an error when its status is outside the success range or
/// when its latency exceeds the absolute ceiling, whatever the status.
/// Out-of-range statuses below 500 count as client errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeClassifier {
    pub success_min: u16,
    pub success_max: u16,
    pub latency_ceiling: Duration,
}

impl OutcomeClassifier {
    pub fn new(success_min: u16, success_max: u16, latency_ceiling: Duration) -> Self {
        Self {
            success_min,
            success_max,
            latency_ceiling,
        }
    }

    /// Classifier from the HTTP settings, with an optional ceiling override.
    pub fn from_config(http: &HttpConfig, latency_ceiling_ms: Option<u64>) -> Self {
        let ceiling = latency_ceiling_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| http.request_timeout());
        Self::new(http.success_status_min, http.success_status_max, ceiling)
    }

    pub fn classify_status(&self, status: u16, latency: Duration) -> Outcome {
        if latency > self.latency_ceiling {
            Outcome::Timeout
        } else if (self.success_min..=self.success_max).contains(&status) {
            Outcome::Success
        } else if status >= 500 {
            Outcome::Http5xx
        } else {
            Outcome::Http4xx
        }
    }

    /// Classify a full result. Returns the status when a response arrived.
    pub fn classify(&self, result: &QaResult<ApiResponse>, latency: Duration) -> (Outcome, Option<u16>) {
        match result {
            Ok(response) => (self.classify_status(response.status, latency), Some(response.status)),
            Err(QaError::RequestTimeout { .. }) => (Outcome::Timeout, None),
            Err(_) if latency > self.latency_ceiling => (Outcome::Timeout, None),
            Err(_) => (Outcome::Transport, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn classifier() -> OutcomeClassifier {
        OutcomeClassifier::new(200, 399, Duration::from_secs(15))
    }

    fn response(status: u16) -> QaResult<ApiResponse> {
        Ok(ApiResponse {
            status,
            body: Value::Null,
            latency: Duration::from_millis(5),
        })
    }

    #[test]
    fn test_status_classes() {
        let c = classifier();
        let fast = Duration::from_millis(5);
        assert_eq!(c.classify_status(200, fast), Outcome::Success);
        assert_eq!(c.classify_status(302, fast), Outcome::Success);
        assert_eq!(c.classify_status(404, fast), Outcome::Http4xx);
        assert_eq!(c.classify_status(503, fast), Outcome::Http5xx);
        assert_eq!(c.classify_status(101, fast), Outcome::Http4xx);
    }

    #[test]
    fn test_latency_ceiling_overrides_status() {
        let c = classifier();
        assert_eq!(c.classify_status(200, Duration::from_secs(16)), Outcome::Timeout);
        assert_eq!(c.classify_status(200, Duration::from_secs(15)), Outcome::Success);
    }

    #[test]
    fn test_errors() {
        let c = classifier();
        let fast = Duration::from_millis(1);
        assert_eq!(c.classify(&response(500), fast), (Outcome::Http5xx, Some(500)));
        assert_eq!(
            c.classify(&Err(QaError::RequestTimeout { after: Duration::from_secs(15) }), fast),
            (Outcome::Timeout, None)
        );
        assert_eq!(
            c.classify(&Err(QaError::Transport("connection refused".into())), fast),
            (Outcome::Transport, None)
        );
    }

    #[test]
    fn test_default_ceiling_is_request_timeout() {
        let c = OutcomeClassifier::from_config(&HttpConfig::default(), None);
        assert_eq!(c.latency_ceiling, Duration::from_secs(15));
        let c = OutcomeClassifier::from_config(&HttpConfig::default(), Some(2000));
        assert_eq!(c.latency_ceiling, Duration::from_secs(2));
    }
}
