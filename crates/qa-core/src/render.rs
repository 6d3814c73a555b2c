//! Report renderers
//!
//! Every rendering consumes the same [`Report`] value.

use std::fmt::Write;

use crate::error::QaResult;
use crate::metrics::AggregatedMetric;
use crate::phase::PhaseStatus;
use crate::report::{Report, Severity};
use crate::slo::SloResult;

/// Report format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    Json,
    Console,
}

impl ReportFormat {
    /// Artifact file name, when the format is written to disk.
    pub fn file_name(self) -> Option<&'static str> {
        match self {
            Self::Markdown => Some("report.md"),
            Self::Json => Some("report.json"),
            Self::Console => None,
        }
    }
}

/// Render a report in the given format.
pub fn render(report: &Report, format: ReportFormat) -> QaResult<String> {
    match format {
        ReportFormat::Json => render_json(report),
        ReportFormat::Markdown => Ok(render_markdown(report)),
        ReportFormat::Console => Ok(render_console(report)),
    }
}

/// Pretty-printed JSON. Deterministic for a given report.
pub fn render_json(report: &Report) -> QaResult<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

fn verdict(pass: bool) -> &'static str {
    if pass {
        "PASS"
    } else {
        "FAIL"
    }
}

fn slo_observed(result: &SloResult) -> String {
    match result.observed {
        Some(value) => format!("{value:.2}"),
        None => "n/a".to_string(),
    }
}

fn slo_status(result: &SloResult) -> &'static str {
    if !result.evaluated {
        "not evaluated"
    } else if result.passed {
        "PASS"
    } else {
        "FAIL"
    }
}

fn severity_tag(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "[critical]",
        Severity::Warning => "[warning]",
        Severity::Info => "[info]",
    }
}

fn latency_row(out: &mut String, m: &AggregatedMetric) {
    let _ = writeln!(
        out,
        "| {} | {} | {:.2}% | {:.1} | {:.1} | {:.1} | {:.1} | {:.1} |",
        m.operation, m.count, m.error_rate_pct, m.avg_ms, m.p50_ms, m.p95_ms, m.p99_ms, m.max_ms
    );
}

/// Human-readable Markdown rendering.
pub fn render_markdown(report: &Report) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Quality Report: {}", report.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out);
    let _ = writeln!(out, "**Overall**: {}  ", verdict(report.overall_pass));
    let _ = writeln!(out, "**Mode**: {}  ", report.mode);
    let _ = writeln!(out, "**Run**: `{}`  ", report.run_id);
    let _ = writeln!(out, "**Duration**: {:.1}s  ", report.duration_ms as f64 / 1000.0);
    if let Some(restarts) = report.infra.as_ref().and_then(|i| i.restarts) {
        let _ = writeln!(out, "**Container restarts**: {restarts}");
    }

    let _ = writeln!(out, "\n## Phases\n");
    let _ = writeln!(out, "| Phase | Status | Duration | Detail |");
    let _ = writeln!(out, "|-------|--------|----------|--------|");
    for phase in &report.phases {
        let duration = if phase.status == PhaseStatus::Skip {
            "-".to_string()
        } else {
            format!("{}ms", phase.duration_ms)
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            phase.name,
            phase.status,
            duration,
            phase.message.replace('|', "\\|")
        );
    }

    let _ = writeln!(out, "\n## Service Level Objectives\n");
    let _ = writeln!(out, "| Metric | Observed | Threshold | Status |");
    let _ = writeln!(out, "|--------|----------|-----------|--------|");
    for result in &report.slo.results {
        let _ = writeln!(
            out,
            "| {} | {} | {} {} | {} |",
            result.metric_name,
            slo_observed(result),
            result.comparator,
            result.threshold,
            slo_status(result)
        );
    }

    if let Some(load) = &report.load {
        let _ = writeln!(out, "\n## Load Test Metrics\n");
        let _ = writeln!(out, "- **Total requests**: {}", load.total_requests);
        let _ = writeln!(out, "- **Throughput**: {:.1} req/s", load.throughput_rps);
        let _ = writeln!(out, "- **Error rate**: {:.2}%", load.total.error_rate_pct);
        let _ = writeln!(
            out,
            "- **Errors**: 4xx={} 5xx={} timeout={} transport={}",
            load.total.errors.http_4xx,
            load.total.errors.http_5xx,
            load.total.errors.timeout,
            load.total.errors.transport
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "| Operation | Count | Errors | Avg ms | p50 ms | p95 ms | p99 ms | Max ms |");
        let _ = writeln!(out, "|-----------|-------|--------|--------|--------|--------|--------|--------|");
        latency_row(&mut out, &load.read);
        latency_row(&mut out, &load.write);
        for op in &load.operations {
            latency_row(&mut out, op);
        }

        if !load.scenarios.is_empty() {
            let _ = writeln!(out, "\n### Scenarios\n");
            let _ = writeln!(out, "| Scenario | Count | Errors | Avg ms | p50 ms | p95 ms | p99 ms | Max ms |");
            let _ = writeln!(out, "|----------|-------|--------|--------|--------|--------|--------|--------|");
            for scenario in &load.scenarios {
                let mut row = scenario.overall.clone();
                row.operation = scenario.name.clone();
                latency_row(&mut out, &row);
            }
        }
    }

    if !report.slowest_operations.is_empty() {
        let _ = writeln!(out, "\n## Slowest Operations (p95)\n");
        for (rank, op) in report.slowest_operations.iter().enumerate() {
            let _ = writeln!(out, "{}. `{}`: {:.1}ms", rank + 1, op.operation, op.p95_ms);
        }
    }

    if let Some(infra) = &report.infra {
        if !infra.containers.is_empty() {
            let _ = writeln!(out, "\n## Container Stats\n");
            let _ = writeln!(out, "| Container | Samples | CPU avg % | CPU max % | Mem avg MB | Mem max MB | Mem max % |");
            let _ = writeln!(out, "|-----------|---------|-----------|-----------|------------|------------|-----------|");
            for c in &infra.containers {
                let _ = writeln!(
                    out,
                    "| {} | {} | {:.1} | {:.1} | {:.1} | {:.1} | {:.1} |",
                    c.name, c.samples, c.cpu_pct_avg, c.cpu_pct_max, c.mem_mb_avg, c.mem_mb_max, c.mem_pct_max
                );
            }
        }
    }

    let _ = writeln!(out, "\n## Recommendations\n");
    for rec in &report.recommendations {
        let _ = writeln!(out, "- {} {}", severity_tag(rec.severity), rec.message);
    }

    let _ = writeln!(out, "\n## Artifacts\n");
    let _ = writeln!(out, "- `report.json`");
    let _ = writeln!(out, "- `report.md`");
    if report.load.is_some() {
        let _ = writeln!(out, "- `load-summary.json`");
    }
    if report.phases.iter().any(|p| p.name == crate::phase::names::UNIT_TESTS && p.status != PhaseStatus::Skip) {
        let _ = writeln!(out, "- `test-results-<service>.json`, `junit-<service>.xml`");
    }

    out
}

/// Compact terminal summary.
pub fn render_console(report: &Report) -> String {
    let mut out = String::new();
    let rule = "=".repeat(60);

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "  QUALITY REPORT  {}", verdict(report.overall_pass));
    let _ = writeln!(out, "{rule}");
    for phase in &report.phases {
        let _ = writeln!(out, "  {:<18} {:<5} {:>8}ms  {}", phase.name, phase.status, phase.duration_ms, phase.message);
    }

    if let Some(load) = &report.load {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "  requests={} throughput={:.1} req/s errors={:.2}%",
            load.total_requests, load.throughput_rps, load.total.error_rate_pct
        );
        let _ = writeln!(
            out,
            "  read  p50={:.0}ms p95={:.0}ms p99={:.0}ms",
            load.read.p50_ms, load.read.p95_ms, load.read.p99_ms
        );
        let _ = writeln!(
            out,
            "  write p50={:.0}ms p95={:.0}ms p99={:.0}ms",
            load.write.p50_ms, load.write.p95_ms, load.write.p99_ms
        );
    }

    let _ = writeln!(out);
    for result in &report.slo.results {
        let _ = writeln!(
            out,
            "  SLO {:<22} {:>10} {} {:<8} {}",
            result.metric_name,
            slo_observed(result),
            result.comparator,
            result.threshold,
            slo_status(result)
        );
    }

    let _ = writeln!(out);
    for rec in &report.recommendations {
        let _ = writeln!(out, "  {} {}", severity_tag(rec.severity), rec.message);
    }
    let _ = writeln!(out, "{rule}");
    out
}
