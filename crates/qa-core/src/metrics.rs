//! Metrics collection and aggregation
//!
//! Workers record one [`MetricSample`] per request. Samples are folded
//! into per-scenario, per-operation series as they arrive; distributions
//! are computed on demand from the retained latencies.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Operation category used for the read/write split and the latency SLOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationCategory {
    Read,
    Write,
}

impl fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Classified result of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    #[serde(rename = "http_4xx")]
    Http4xx,
    #[serde(rename = "http_5xx")]
    Http5xx,
    Timeout,
    Transport,
}

impl Outcome {
    pub fn is_error(self) -> bool {
        self != Self::Success
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Http4xx => "http_4xx",
            Self::Http5xx => "http_5xx",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
        }
    }
}

/// One request observation. Write-once.
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub scenario: String,
    pub operation: String,
    pub category: OperationCategory,
    pub latency: Duration,
    /// HTTP status, when a response was received
    pub status: Option<u16>,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

/// Error tallies per class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounts {
    pub http_4xx: u64,
    pub http_5xx: u64,
    pub timeout: u64,
    pub transport: u64,
}

impl ErrorCounts {
    pub fn total(&self) -> u64 {
        self.http_4xx + self.http_5xx + self.timeout + self.transport
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => {}
            Outcome::Http4xx => self.http_4xx += 1,
            Outcome::Http5xx => self.http_5xx += 1,
            Outcome::Timeout => self.timeout += 1,
            Outcome::Transport => self.transport += 1,
        }
    }

    fn merge(&mut self, other: &ErrorCounts) {
        self.http_4xx += other.http_4xx;
        self.http_5xx += other.http_5xx;
        self.timeout += other.timeout;
        self.transport += other.transport;
    }
}

/// Distribution of one operation (or a rollup). Derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetric {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<OperationCategory>,
    pub count: u64,
    pub errors: ErrorCounts,
    pub error_rate_pct: f64,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// Nearest-rank-by-floor percentile over a sorted slice.
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = ((sorted.len() as f64) * p) as usize;
    sorted[index.min(sorted.len() - 1)]
}

fn us_to_ms(us: u64) -> f64 {
    us as f64 / 1000.0
}

#[derive(Debug, Clone, Default)]
struct Series {
    category: Option<OperationCategory>,
    latencies_us: Vec<u64>,
    errors: ErrorCounts,
}

impl Series {
    fn merge(&mut self, other: &Series) {
        if self.category != other.category {
            self.category = if self.latencies_us.is_empty() {
                other.category
            } else {
                None
            };
        }
        self.latencies_us.extend_from_slice(&other.latencies_us);
        self.errors.merge(&other.errors);
    }

    fn aggregate(&self, scenario: Option<&str>, operation: &str) -> AggregatedMetric {
        let mut sorted = self.latencies_us.clone();
        sorted.sort_unstable();

        let count = sorted.len() as u64;
        let error_rate_pct = if count == 0 {
            0.0
        } else {
            self.errors.total() as f64 / count as f64 * 100.0
        };
        let avg_ms = if count == 0 {
            0.0
        } else {
            us_to_ms(sorted.iter().sum::<u64>()) / count as f64
        };

        AggregatedMetric {
            scenario: scenario.map(str::to_string),
            operation: operation.to_string(),
            category: self.category,
            count,
            errors: self.errors,
            error_rate_pct,
            min_ms: us_to_ms(sorted.first().copied().unwrap_or(0)),
            avg_ms,
            p50_ms: us_to_ms(percentile(&sorted, 0.50)),
            p95_ms: us_to_ms(percentile(&sorted, 0.95)),
            p99_ms: us_to_ms(percentile(&sorted, 0.99)),
            max_ms: us_to_ms(sorted.last().copied().unwrap_or(0)),
        }
    }
}

/// Per-scenario view in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    pub name: String,
    pub overall: AggregatedMetric,
    pub operations: Vec<AggregatedMetric>,
}

/// Everything the SLO evaluator and the report need from a load run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub duration_ms: u64,
    pub total_requests: u64,
    pub throughput_rps: f64,
    pub total: AggregatedMetric,
    pub read: AggregatedMetric,
    pub write: AggregatedMetric,
    /// Per operation, merged across scenarios
    pub operations: Vec<AggregatedMetric>,
    pub scenarios: Vec<ScenarioMetrics>,
}

/// Thread-safe sample sink shared by every worker of a run.
#[derive(Debug, Default)]
pub struct MetricAggregator {
    // (scenario, operation) -> series
    series: Mutex<BTreeMap<(String, String), Series>>,
}

impl MetricAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample.
    pub fn record(&self, sample: MetricSample) {
        let latency_us = sample.latency.as_micros().min(u128::from(u64::MAX)) as u64;
        let mut series = self.series.lock();
        let entry = series
            .entry((sample.scenario, sample.operation))
            .or_insert_with(|| Series {
                category: Some(sample.category),
                ..Series::default()
            });
        entry.latencies_us.push(latency_us);
        entry.errors.record(sample.outcome);
    }

    /// Total samples recorded so far.
    pub fn total_count(&self) -> u64 {
        self.series
            .lock()
            .values()
            .map(|s| s.latencies_us.len() as u64)
            .sum()
    }

    /// Per (scenario, operation) distributions, ordered by scenario then
    /// operation.
    pub fn aggregate(&self) -> Vec<AggregatedMetric> {
        self.series
            .lock()
            .iter()
            .map(|((scenario, operation), series)| series.aggregate(Some(scenario), operation))
            .collect()
    }

    /// Overall distribution across every scenario and operation.
    pub fn overall(&self) -> AggregatedMetric {
        let series = self.series.lock();
        let mut total = Series::default();
        for s in series.values() {
            total.merge(s);
        }
        total.category = None;
        total.aggregate(None, "all")
    }

    /// Full snapshot with rollups. `elapsed` is the wall-clock duration of
    /// the load phase, used for throughput.
    pub fn snapshot(&self, elapsed: Duration) -> MetricsSnapshot {
        let series = self.series.lock().clone();

        let mut total = Series::default();
        let mut read = Series {
            category: Some(OperationCategory::Read),
            ..Series::default()
        };
        let mut write = Series {
            category: Some(OperationCategory::Write),
            ..Series::default()
        };
        let mut by_operation: BTreeMap<&str, Series> = BTreeMap::new();
        let mut by_scenario: BTreeMap<&str, (Series, Vec<AggregatedMetric>)> = BTreeMap::new();

        for ((scenario, operation), s) in &series {
            total.merge(s);
            match s.category {
                Some(OperationCategory::Read) => read.merge(s),
                Some(OperationCategory::Write) => write.merge(s),
                None => {}
            }
            by_operation.entry(operation.as_str()).or_default().merge(s);

            let (scenario_total, ops) = by_scenario.entry(scenario.as_str()).or_default();
            scenario_total.merge(s);
            ops.push(s.aggregate(Some(scenario), operation));
        }
        total.category = None;

        let total = total.aggregate(None, "all");
        let elapsed_secs = elapsed.as_secs_f64();
        let throughput_rps = if elapsed_secs > 0.0 {
            total.count as f64 / elapsed_secs
        } else {
            0.0
        };

        MetricsSnapshot {
            duration_ms: elapsed.as_millis() as u64,
            total_requests: total.count,
            throughput_rps,
            read: read.aggregate(None, "read"),
            write: write.aggregate(None, "write"),
            operations: by_operation
                .iter()
                .map(|(operation, s)| s.aggregate(None, operation))
                .collect(),
            scenarios: by_scenario
                .into_iter()
                .map(|(name, (mut s, operations))| {
                    s.category = None;
                    ScenarioMetrics {
                        name: name.to_string(),
                        overall: s.aggregate(Some(name), "all"),
                        operations,
                    }
                })
                .collect(),
            total,
        }
    }
}
