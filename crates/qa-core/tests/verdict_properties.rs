// Property-based tests for the run verdict and report determinism
//
// Properties tested:
// 1. overall_pass holds iff every non-skipped phase passed and every SLO holds
// 2. Building a report twice from the same inputs yields identical JSON
//    (apart from generated_at)
// 3. The slowest-operations ranking is sorted by p95 and bounded by top_n

use std::time::Duration;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use qa_core::config::{ReportConfig, SloConfig};
use qa_core::render::render_json;
use qa_core::report::slowest_operations;
use qa_core::slo::{ERROR_RATE, INFRA_RESTARTS, READ_LATENCY_P95, WRITE_LATENCY_P95};
use qa_core::{
    build_report, evaluate, AggregatedMetric, ErrorCounts, Observations, PhaseResult, PhaseStatus, ReportInputs,
    RunId, SloThreshold,
};

fn phase_status() -> impl Strategy<Value = PhaseStatus> {
    prop_oneof![
        Just(PhaseStatus::Pass),
        Just(PhaseStatus::Fail),
        Just(PhaseStatus::Skip),
    ]
}

fn make_phases(statuses: &[PhaseStatus]) -> Vec<PhaseResult> {
    statuses
        .iter()
        .enumerate()
        .map(|(i, status)| PhaseResult::new(format!("phase_{i}"), *status, Duration::from_millis(i as u64 * 10), "synthetic"))
        .collect()
}

fn make_inputs(phases: Vec<PhaseResult>, observations: &Observations) -> ReportInputs {
    let slo_config = SloConfig::default();
    ReportInputs {
        run_id: RunId::from_uuid(uuid::Uuid::nil()),
        mode: "full".to_string(),
        started_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        generated_at: Utc::now(),
        duration: Duration::from_secs(60),
        phases,
        load: None,
        infra: None,
        slo: evaluate(&SloThreshold::standard(&slo_config), observations),
        slo_config,
        report_config: ReportConfig::default(),
    }
}

proptest! {
    #[test]
    fn prop_verdict_matches_phases_and_slos(
        statuses in prop::collection::vec(phase_status(), 0..8),
        read_p95 in prop::option::of(0.0f64..1000.0),
        write_p95 in prop::option::of(0.0f64..3000.0),
        error_rate in prop::option::of(0.0f64..5.0),
        restarts in prop::option::of(0u32..3),
    ) {
        let mut observations = Observations::new();
        if let Some(v) = read_p95 { observations.insert(READ_LATENCY_P95, v); }
        if let Some(v) = write_p95 { observations.insert(WRITE_LATENCY_P95, v); }
        if let Some(v) = error_rate { observations.insert(ERROR_RATE, v); }
        if let Some(v) = restarts { observations.insert(INFRA_RESTARTS, f64::from(v)); }

        let report = build_report(make_inputs(make_phases(&statuses), &observations));

        let phases_ok = statuses.iter().all(|s| *s != PhaseStatus::Fail);
        let slos_ok = read_p95.map_or(true, |v| v < 500.0)
            && write_p95.map_or(true, |v| v < 1500.0)
            && error_rate.map_or(true, |v| v < 1.0)
            && restarts.map_or(true, |v| v == 0);

        prop_assert_eq!(report.overall_pass, phases_ok && slos_ok);
        prop_assert_eq!(report.slo.compliant, slos_ok);
        prop_assert!(report.slo.results.iter().all(|r| r.passed || r.evaluated));
    }

    #[test]
    fn prop_report_json_is_idempotent(
        statuses in prop::collection::vec(phase_status(), 1..6),
        read_p95 in 0.0f64..1000.0,
    ) {
        let mut observations = Observations::new();
        observations.insert(READ_LATENCY_P95, read_p95);

        let first = build_report(make_inputs(make_phases(&statuses), &observations));
        let mut second = build_report(make_inputs(make_phases(&statuses), &observations));
        second.generated_at = first.generated_at;

        prop_assert_eq!(render_json(&first).unwrap(), render_json(&second).unwrap());
    }

    #[test]
    fn prop_slowest_ranking_sorted_and_bounded(
        p95s in prop::collection::vec(0.0f64..2000.0, 0..20),
        top_n in 0usize..10,
    ) {
        let ops: Vec<AggregatedMetric> = p95s
            .iter()
            .enumerate()
            .map(|(i, p95)| AggregatedMetric {
                scenario: None,
                operation: format!("op_{i:02}"),
                category: None,
                count: 1,
                errors: ErrorCounts::default(),
                error_rate_pct: 0.0,
                min_ms: *p95,
                avg_ms: *p95,
                p50_ms: *p95,
                p95_ms: *p95,
                p99_ms: *p95,
                max_ms: *p95,
            })
            .collect();

        let ranked = slowest_operations(&ops, top_n);
        prop_assert_eq!(ranked.len(), top_n.min(ops.len()));
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].p95_ms >= pair[1].p95_ms);
        }
    }
}
