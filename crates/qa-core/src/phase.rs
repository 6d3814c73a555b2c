use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical phase names, in execution order.
pub mod names {
    pub const ENVIRONMENT_UP: &str = "environment_up";
    pub const READINESS: &str = "readiness";
    pub const LINT: &str = "lint";
    pub const UNIT_TESTS: &str = "unit_tests";
    pub const E2E: &str = "e2e";
    pub const LOAD: &str = "load";
    pub const INFRA_STATS: &str = "infra_stats";
    pub const ENVIRONMENT_DOWN: &str = "environment_down";
}

/// Outcome of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pass,
    Fail,
    Skip,
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Skip => "SKIP",
        };
        f.write_str(label)
    }
}

/// Result of a single pipeline phase. Built once when the phase ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub name: String,
    pub status: PhaseStatus,
    pub duration_ms: u64,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl PhaseResult {
    pub fn new(
        name: impl Into<String>,
        status: PhaseStatus,
        duration: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            status,
            duration_ms: duration.as_millis() as u64,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn pass(name: impl Into<String>, duration: Duration, message: impl Into<String>) -> Self {
        Self::new(name, PhaseStatus::Pass, duration, message)
    }

    pub fn fail(name: impl Into<String>, duration: Duration, message: impl Into<String>) -> Self {
        Self::new(name, PhaseStatus::Fail, duration, message)
    }

    /// A phase excluded by the run mode or by a blocking failure.
    pub fn skip(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, PhaseStatus::Skip, Duration::ZERO, message)
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn passed(&self) -> bool {
        self.status == PhaseStatus::Pass
    }

    pub fn failed(&self) -> bool {
        self.status == PhaseStatus::Fail
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let result = PhaseResult::pass("lint", Duration::from_millis(1500), "ok");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "pass");
        assert_eq!(json["duration_ms"], 1500);
        assert_eq!(PhaseStatus::Skip.to_string(), "SKIP");
    }
}
