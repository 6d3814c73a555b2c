//! Service-level objective evaluation
//!
//! Thresholds are built once from [`SloConfig`] and compared against the
//! observed values of a run. A threshold whose metric was never observed
//! (the load phase was skipped, say) is reported as not evaluated and
//! cannot fail the run.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::SloConfig;
use crate::metrics::MetricsSnapshot;

pub const READ_LATENCY_P95: &str = "read_latency_p95_ms";
pub const WRITE_LATENCY_P95: &str = "write_latency_p95_ms";
pub const ERROR_RATE: &str = "error_rate_pct";
pub const INFRA_RESTARTS: &str = "infra_restarts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    LessThan,
    LessOrEqual,
}

impl Comparator {
    pub fn holds(self, observed: f64, limit: f64) -> bool {
        match self {
            Self::LessThan => observed < limit,
            Self::LessOrEqual => observed <= limit,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LessThan => f.write_str("<"),
            Self::LessOrEqual => f.write_str("<="),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloThreshold {
    pub metric_name: String,
    pub comparator: Comparator,
    pub limit: f64,
}

impl SloThreshold {
    pub fn new(metric_name: impl Into<String>, comparator: Comparator, limit: f64) -> Self {
        Self {
            metric_name: metric_name.into(),
            comparator,
            limit,
        }
    }

    /// The standard threshold set.
    pub fn standard(config: &SloConfig) -> Vec<Self> {
        vec![
            Self::new(READ_LATENCY_P95, Comparator::LessThan, config.read_p95_ms),
            Self::new(WRITE_LATENCY_P95, Comparator::LessThan, config.write_p95_ms),
            Self::new(ERROR_RATE, Comparator::LessThan, config.error_rate_pct),
            Self::new(
                INFRA_RESTARTS,
                Comparator::LessOrEqual,
                f64::from(config.max_restarts),
            ),
        ]
    }
}

/// Values observed during a run, keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observations(BTreeMap<String, f64>);

impl Observations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, metric_name: impl Into<String>, value: f64) {
        self.0.insert(metric_name.into(), value);
    }

    pub fn get(&self, metric_name: &str) -> Option<f64> {
        self.0.get(metric_name).copied()
    }

    /// Observations derived from a load run and, when sampled, the
    /// infrastructure restart count. A category with no samples is not
    /// observed.
    pub fn from_run(metrics: Option<&MetricsSnapshot>, restarts: Option<u32>) -> Self {
        let mut observations = Self::new();
        if let Some(metrics) = metrics {
            if metrics.read.count > 0 {
                observations.insert(READ_LATENCY_P95, metrics.read.p95_ms);
            }
            if metrics.write.count > 0 {
                observations.insert(WRITE_LATENCY_P95, metrics.write.p95_ms);
            }
            if metrics.total.count > 0 {
                observations.insert(ERROR_RATE, metrics.total.error_rate_pct);
            }
        }
        if let Some(restarts) = restarts {
            observations.insert(INFRA_RESTARTS, f64::from(restarts));
        }
        observations
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloResult {
    pub metric_name: String,
    pub comparator: Comparator,
    pub observed: Option<f64>,
    pub threshold: f64,
    pub passed: bool,
    pub evaluated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloCompliance {
    pub results: Vec<SloResult>,
    pub compliant: bool,
}

impl SloCompliance {
    /// Names of the thresholds that failed.
    pub fn violations(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.metric_name.as_str())
            .collect()
    }

    pub fn result(&self, metric_name: &str) -> Option<&SloResult> {
        self.results.iter().find(|r| r.metric_name == metric_name)
    }
}

/// Compare observations against thresholds. Compliance is the logical AND
/// of every threshold.
pub fn evaluate(thresholds: &[SloThreshold], observations: &Observations) -> SloCompliance {
    let results: Vec<SloResult> = thresholds
        .iter()
        .map(|threshold| {
            let observed = observations.get(&threshold.metric_name);
            let passed = observed.map_or(true, |value| {
                threshold.comparator.holds(value, threshold.limit)
            });
            SloResult {
                metric_name: threshold.metric_name.clone(),
                comparator: threshold.comparator,
                observed,
                threshold: threshold.limit,
                passed,
                evaluated: observed.is_some(),
            }
        })
        .collect();

    let compliant = results.iter().all(|r| r.passed);
    SloCompliance { results, compliant }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_p95_over_limit_fails() {
        let thresholds = SloThreshold::standard(&SloConfig::default());
        let mut observations = Observations::new();
        observations.insert(READ_LATENCY_P95, 650.0);
        observations.insert(WRITE_LATENCY_P95, 300.0);
        observations.insert(ERROR_RATE, 0.0);
        observations.insert(INFRA_RESTARTS, 0.0);

        let compliance = evaluate(&thresholds, &observations);
        assert!(!compliance.compliant);
        assert_eq!(compliance.violations(), vec![READ_LATENCY_P95]);
        let read = compliance.result(READ_LATENCY_P95).unwrap();
        assert_eq!(read.observed, Some(650.0));
        assert!(!read.passed);
    }

    #[test]
    fn bounds_are_exclusive_except_restarts() {
        let thresholds = SloThreshold::standard(&SloConfig::default());
        let mut observations = Observations::new();
        observations.insert(ERROR_RATE, 1.0);
        observations.insert(INFRA_RESTARTS, 0.0);

        let compliance = evaluate(&thresholds, &observations);
        assert!(!compliance.result(ERROR_RATE).unwrap().passed);
        assert!(compliance.result(INFRA_RESTARTS).unwrap().passed);
    }

    #[test]
    fn unobserved_metrics_do_not_fail() {
        let thresholds = SloThreshold::standard(&SloConfig::default());
        let compliance = evaluate(&thresholds, &Observations::new());
        assert!(compliance.compliant);
        assert!(compliance.results.iter().all(|r| !r.evaluated && r.observed.is_none()));
    }

    #[test]
    fn restarts_fail_when_above_bound() {
        let thresholds = SloThreshold::standard(&SloConfig::default());
        let compliance = evaluate(&thresholds, &Observations::from_run(None, Some(2)));
        assert!(!compliance.compliant);
        assert_eq!(compliance.violations(), vec![INFRA_RESTARTS]);
    }
}
