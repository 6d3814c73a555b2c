//! Report model and builder
//!
//! [`build_report`] is a pure function: the same inputs always produce the
//! same value, and every rendering is derived from that value.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ReportConfig, SloConfig};
use crate::ids::RunId;
use crate::metrics::{AggregatedMetric, MetricsSnapshot};
use crate::phase::{names, PhaseResult, PhaseStatus};
use crate::slo::{SloCompliance, ERROR_RATE, READ_LATENCY_P95, WRITE_LATENCY_P95};

/// Resource usage of one container over the sampling window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub name: String,
    pub samples: usize,
    pub cpu_pct_avg: f64,
    pub cpu_pct_max: f64,
    pub mem_mb_avg: f64,
    pub mem_mb_max: f64,
    pub mem_pct_max: f64,
}

/// Infrastructure observations collected around the load phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraSummary {
    pub restarts: Option<u32>,
    pub containers: Vec<ContainerStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub severity: Severity,
    pub message: String,
}

impl Recommendation {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// Everything a report is built from.
#[derive(Debug, Clone)]
pub struct ReportInputs {
    pub run_id: RunId,
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub duration: Duration,
    pub phases: Vec<PhaseResult>,
    pub load: Option<MetricsSnapshot>,
    pub infra: Option<InfraSummary>,
    pub slo: SloCompliance,
    pub slo_config: SloConfig,
    pub report_config: ReportConfig,
}

/// Final report of a run. Never mutated after it is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub run_id: RunId,
    pub mode: String,
    pub generated_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub overall_pass: bool,
    pub phases: Vec<PhaseResult>,
    pub load: Option<MetricsSnapshot>,
    /// Operations ranked by p95, slowest first
    pub slowest_operations: Vec<AggregatedMetric>,
    pub slo: SloCompliance,
    pub infra: Option<InfraSummary>,
    pub recommendations: Vec<Recommendation>,
}

impl Report {
    /// Phases that ran and failed.
    pub fn failed_phases(&self) -> impl Iterator<Item = &PhaseResult> {
        self.phases.iter().filter(|p| p.status == PhaseStatus::Fail)
    }
}

/// The verdict: every phase that ran passed and every SLO holds.
pub fn overall_pass(phases: &[PhaseResult], slo: &SloCompliance) -> bool {
    phases
        .iter()
        .filter(|p| p.status != PhaseStatus::Skip)
        .all(PhaseResult::passed)
        && slo.compliant
}

/// Rank operations by p95 latency, slowest first; ties break on name.
pub fn slowest_operations(operations: &[AggregatedMetric], top_n: usize) -> Vec<AggregatedMetric> {
    let mut ranked: Vec<AggregatedMetric> = operations
        .iter()
        .filter(|m| m.count > 0)
        .cloned()
        .collect();
    ranked.sort_by(|a, b| {
        b.p95_ms
            .total_cmp(&a.p95_ms)
            .then_with(|| a.operation.cmp(&b.operation))
    });
    ranked.truncate(top_n);
    ranked
}

/// Assemble the report.
pub fn build_report(inputs: ReportInputs) -> Report {
    let overall_pass = overall_pass(&inputs.phases, &inputs.slo);
    let slowest = inputs
        .load
        .as_ref()
        .map(|load| slowest_operations(&load.operations, inputs.report_config.top_n))
        .unwrap_or_default();
    let recommendations = recommendations(&inputs);

    Report {
        run_id: inputs.run_id,
        mode: inputs.mode,
        generated_at: inputs.generated_at,
        started_at: inputs.started_at,
        duration_ms: inputs.duration.as_millis() as u64,
        overall_pass,
        phases: inputs.phases,
        load: inputs.load,
        slowest_operations: slowest,
        slo: inputs.slo,
        infra: inputs.infra,
        recommendations,
    }
}

fn recommendations(inputs: &ReportInputs) -> Vec<Recommendation> {
    let mut recs = Vec::new();
    let slo = &inputs.slo_config;
    let failed = |name: &str| inputs.slo.result(name).is_some_and(|r| !r.passed);

    if let Some(load) = &inputs.load {
        if failed(READ_LATENCY_P95) {
            recs.push(Recommendation::new(
                Severity::Critical,
                format!(
                    "Read latency p95 ({:.0}ms) exceeds the {:.0}ms objective. Review indexes on list queries, query caching and connection pool size.",
                    load.read.p95_ms, slo.read_p95_ms
                ),
            ));
        }
        if failed(WRITE_LATENCY_P95) {
            recs.push(Recommendation::new(
                Severity::Critical,
                format!(
                    "Write latency p95 ({:.0}ms) exceeds the {:.0}ms objective. Investigate the write path: pool exhaustion, batching, commit latency.",
                    load.write.p95_ms, slo.write_p95_ms
                ),
            ));
        }
        if failed(ERROR_RATE) {
            recs.push(Recommendation::new(
                Severity::Critical,
                format!(
                    "Error rate ({:.2}%) exceeds the {}% objective. Check for connection pool exhaustion, OOM kills or broker backpressure.",
                    load.total.error_rate_pct, slo.error_rate_pct
                ),
            ));
        }
        if load.read.count > 0 && load.read.p99_ms > slo.read_p95_ms * 3.0 {
            recs.push(Recommendation::new(
                Severity::Warning,
                format!(
                    "Read latency p99 ({:.0}ms) is more than 3x the read objective. Tail latency may indicate GC pauses or lock contention.",
                    load.read.p99_ms
                ),
            ));
        }
        if load.total_requests > 0 && load.throughput_rps < inputs.report_config.min_throughput_rps {
            recs.push(Recommendation::new(
                Severity::Warning,
                format!(
                    "Throughput ({:.1} req/s) is below {:.0} req/s. Consider more server workers or horizontal scaling.",
                    load.throughput_rps, inputs.report_config.min_throughput_rps
                ),
            ));
        }
    }

    if let Some(restarts) = inputs.infra.as_ref().and_then(|i| i.restarts) {
        if restarts > 0 {
            recs.push(Recommendation::new(
                Severity::Critical,
                format!(
                    "{restarts} container restart(s) detected. Check OOM kills, failing health checks or uncaught exceptions."
                ),
            ));
        }
    }

    for phase in inputs.phases.iter().filter(|p| p.failed()) {
        match phase.name.as_str() {
            names::LINT => recs.push(Recommendation::new(
                Severity::Warning,
                "Fix lint issues before merging and enforce them in CI.",
            )),
            names::UNIT_TESTS => recs.push(Recommendation::new(
                Severity::Critical,
                "Unit tests must pass. Fix failures before any load testing.",
            )),
            names::E2E => recs.push(Recommendation::new(
                Severity::Critical,
                "End-to-end workflow failed. See the failed steps in the e2e phase details.",
            )),
            names::READINESS => recs.push(Recommendation::new(
                Severity::Critical,
                "Services never became ready. Check container logs and dependency health.",
            )),
            _ => {}
        }
    }

    if recs.is_empty() {
        recs.push(Recommendation::new(
            Severity::Info,
            "All checks passed. System is within SLO bounds.",
        ));
    }
    recs
}
