//! Phase orchestrator.
//!
//! Phases run one at a time in dependency order:
//!
//! ```text
//! environment_up -> readiness -> lint -> unit_tests -> e2e -> load -> infra_stats -> environment_down
//! ```
//!
//! Readiness is blocking: when it fails, e2e and load are recorded as
//! skipped. Every other failure is recorded and the run continues so the
//! report is complete. Each phase is bounded by its own timeout, and a
//! requested teardown runs on every exit path.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use qa_core::phase::names;
use qa_core::slo::{evaluate, Observations, SloThreshold};
use qa_core::{
    build_report, ApiTransport, InfraSummary, PhaseResult, PhaseStatus, QaConfig, QaError, QaResult, Report,
    ReportInputs, RunId, ServiceClient,
};
use qa_e2e::{listing_pipeline, ExecutorSettings, WorkflowExecutor};
use qa_load::{EngineSettings, HttpTarget, LoadEngine, LoadPlan, LoadRunReport, LoadTarget, OperationCatalog};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactWriter;
use crate::environment::{ComposeStack, TeardownGuard};
use crate::external::{run_lint, run_unit_tests, Shell, SuiteResult, SystemShell};
use crate::infra::{restart_count, sample_once, summarize, ContainerSample, StatsSampler};
use crate::mode::RunMode;
use crate::readiness::{Endpoint, ReadinessProber};

/// Process exit code of a passing run.
pub const EXIT_PASS: i32 = 0;
/// Process exit code of a completed run with a failing verdict.
pub const EXIT_FAIL: i32 = 1;
/// Process exit code when the run aborted before producing a report.
pub const EXIT_FATAL: i32 = 2;

/// How this run was invoked.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Start the compose stack first
    pub compose: bool,
    /// Tear the compose stack down at the end
    pub teardown: bool,
    pub show_progress: bool,
}

/// Everything the orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn ApiTransport>,
    pub load_target: Arc<dyn LoadTarget>,
    pub shell: Arc<dyn Shell>,
}

impl Collaborators {
    /// Real HTTP and real processes.
    pub fn live(config: &QaConfig) -> QaResult<Self> {
        let client = ServiceClient::new(&config.http)?;
        Ok(Self {
            transport: Arc::new(client.clone()),
            load_target: Arc::new(HttpTarget::new(client, base_urls(config))),
            shell: Arc::new(SystemShell),
        })
    }
}

fn base_urls(config: &QaConfig) -> BTreeMap<String, String> {
    config
        .services
        .iter()
        .map(|(name, service)| (name.clone(), service.base_url.trim_end_matches('/').to_string()))
        .collect()
}

/// A completed run.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: Report,
    pub load: Option<LoadRunReport>,
    pub artifacts: Vec<PathBuf>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        if self.report.overall_pass {
            EXIT_PASS
        } else {
            EXIT_FAIL
        }
    }
}

#[derive(Default)]
struct RunState {
    phases: Vec<PhaseResult>,
    load: Option<LoadRunReport>,
    suites: Vec<SuiteResult>,
    sampler: Option<StatsSampler>,
    samples: Vec<ContainerSample>,
    infra: Option<InfraSummary>,
}

impl RunState {
    async fn drain_sampler(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            self.samples.extend(sampler.finish().await);
        }
    }
}

pub struct Orchestrator {
    config: Arc<QaConfig>,
    options: RunOptions,
    deps: Collaborators,
    stack: ComposeStack,
    artifacts: ArtifactWriter,
    progress: ProgressBar,
}

impl Orchestrator {
    pub fn new(config: Arc<QaConfig>, options: RunOptions, deps: Collaborators) -> Self {
        let stack = ComposeStack::new(Arc::clone(&deps.shell), &config.environment);
        let artifacts = ArtifactWriter::new(config.artifacts_dir());
        let progress = if options.show_progress {
            spinner()
        } else {
            ProgressBar::hidden()
        };
        Self {
            config,
            options,
            deps,
            stack,
            artifacts,
            progress,
        }
    }

    fn teardown_requested(&self) -> bool {
        self.options.teardown || (self.options.compose && self.config.environment.teardown)
    }

    /// Run the selected phases and build the report.
    ///
    /// Returns an error only for fatal conditions (the environment could not
    /// be started); every phase failure is part of the returned report.
    pub async fn run(&self) -> QaResult<RunOutcome> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let started = Instant::now();
        info!(run_id = %run_id, mode = %self.options.mode, "starting quality pipeline");

        let guard = self
            .teardown_requested()
            .then(|| TeardownGuard::arm(self.stack.clone()));
        let mut state = RunState::default();

        let outcome = self.run_phases(&mut state).await;
        state.drain_sampler().await;
        if let Some(guard) = guard {
            self.progress.set_message("environment_down running");
            state.phases.push(guard.release().await);
        }
        self.progress.finish_and_clear();
        outcome?;

        let restarts = state.infra.as_ref().and_then(|infra| infra.restarts);
        let metrics = state.load.as_ref().map(|load| &load.metrics);
        let slo = evaluate(
            &SloThreshold::standard(&self.config.slo),
            &Observations::from_run(metrics, restarts),
        );
        if !slo.compliant {
            let violation = QaError::SloViolation {
                metrics: slo.violations().into_iter().map(str::to_string).collect(),
            };
            warn!(error = %violation, "service-level objectives not met");
        }

        let report = build_report(ReportInputs {
            run_id,
            mode: self.options.mode.label().to_string(),
            started_at,
            generated_at: Utc::now(),
            duration: started.elapsed(),
            phases: state.phases,
            load: state.load.as_ref().map(|load| load.metrics.clone()),
            infra: state.infra,
            slo,
            slo_config: self.config.slo.clone(),
            report_config: self.config.report.clone(),
        });
        info!(
            run_id = %run_id,
            overall_pass = report.overall_pass,
            duration_ms = report.duration_ms,
            "quality pipeline finished"
        );

        let artifacts = self
            .write_artifacts(&report, state.load.as_ref(), &state.suites)
            .await;

        Ok(RunOutcome {
            report,
            load: state.load,
            artifacts,
        })
    }

    async fn run_phases(&self, state: &mut RunState) -> QaResult<()> {
        let mode = self.options.mode;
        let limits = &self.config.phases;
        let not_selected = || format!("not selected in {mode} mode");

        if self.options.compose {
            self.progress.set_message("environment_up running");
            state.phases.push(self.stack.up().await?);
        }

        let ready = if mode.runs(names::READINESS) {
            let phase = self
                .timed(names::READINESS, secs(limits.readiness_secs), self.readiness_phase())
                .await;
            let ready = phase.passed();
            state.phases.push(phase);
            ready
        } else {
            state.phases.push(PhaseResult::skip(names::READINESS, not_selected()));
            false
        };

        let phase = if mode.runs(names::LINT) {
            self.timed(
                names::LINT,
                secs(limits.lint_secs),
                run_lint(self.deps.shell.as_ref(), &self.config),
            )
            .await
        } else {
            PhaseResult::skip(names::LINT, not_selected())
        };
        state.phases.push(phase);

        let phase = if mode.runs(names::UNIT_TESTS) {
            self.timed(names::UNIT_TESTS, secs(limits.unit_secs), self.unit_phase(state))
                .await
        } else {
            PhaseResult::skip(names::UNIT_TESTS, not_selected())
        };
        state.phases.push(phase);

        let phase = if !mode.runs(names::E2E) {
            PhaseResult::skip(names::E2E, not_selected())
        } else if !ready {
            PhaseResult::skip(names::E2E, "services not ready")
        } else {
            self.timed(names::E2E, secs(limits.e2e_secs), self.e2e_phase())
                .await
        };
        state.phases.push(phase);

        let phase = if !mode.runs(names::LOAD) {
            PhaseResult::skip(names::LOAD, not_selected())
        } else if !ready {
            PhaseResult::skip(names::LOAD, "services not ready")
        } else {
            self.timed(names::LOAD, secs(limits.load_secs), self.load_phase(state))
                .await
        };
        state.phases.push(phase);

        let phase = if mode.runs(names::INFRA_STATS) {
            self.timed(names::INFRA_STATS, secs(limits.infra_secs), self.infra_phase(state))
                .await
        } else {
            PhaseResult::skip(names::INFRA_STATS, not_selected())
        };
        state.phases.push(phase);

        Ok(())
    }

    async fn timed<F>(&self, name: &'static str, limit: Duration, phase: F) -> PhaseResult
    where
        F: Future<Output = PhaseResult>,
    {
        self.progress.set_message(format!("{name} running"));
        info!(phase = name, "phase started");
        let started = Instant::now();

        let result = match tokio::time::timeout(limit, phase).await {
            Ok(result) => result,
            Err(_) => PhaseResult::fail(
                name,
                started.elapsed(),
                format!("timed out after {}s", limit.as_secs()),
            ),
        };

        match result.status {
            PhaseStatus::Pass => {
                info!(phase = name, duration_ms = result.duration_ms, message = %result.message, "phase passed")
            }
            PhaseStatus::Fail => {
                warn!(phase = name, duration_ms = result.duration_ms, message = %result.message, "phase failed")
            }
            PhaseStatus::Skip => info!(phase = name, message = %result.message, "phase skipped"),
        }
        result
    }

    async fn readiness_phase(&self) -> PhaseResult {
        let started = Instant::now();
        let endpoints = Endpoint::for_services(&self.config);
        let prober = ReadinessProber::new(Arc::clone(&self.deps.transport), &self.config.readiness);

        match prober.await_ready(&endpoints).await {
            Ok(report) => PhaseResult::pass(
                names::READINESS,
                started.elapsed(),
                format!("All {} services ready", endpoints.len()),
            )
            .with_details(serde_json::to_value(&report).unwrap_or_default()),
            Err(e) => PhaseResult::fail(names::READINESS, started.elapsed(), e.to_string()),
        }
    }

    async fn unit_phase(&self, state: &mut RunState) -> PhaseResult {
        let (phase, suites) = run_unit_tests(self.deps.shell.as_ref(), &self.config, self.artifacts.dir()).await;
        state.suites = suites;
        phase
    }

    async fn e2e_phase(&self) -> PhaseResult {
        let started = Instant::now();
        let executor = WorkflowExecutor::new(
            Arc::clone(&self.deps.transport),
            base_urls(&self.config),
            ExecutorSettings::from_config(&self.config.e2e),
        );
        let services: Vec<&str> = self.config.services.keys().map(String::as_str).collect();
        let scenario = listing_pipeline(&services);

        match executor.run(&scenario).await {
            Ok(report) => {
                let phase = if report.passed() {
                    PhaseResult::pass(names::E2E, started.elapsed(), report.summary())
                } else {
                    PhaseResult::fail(names::E2E, started.elapsed(), report.summary())
                };
                phase.with_details(report.to_details())
            }
            Err(e) => PhaseResult::fail(names::E2E, started.elapsed(), e.to_string()),
        }
    }

    async fn load_phase(&self, state: &mut RunState) -> PhaseResult {
        let started = Instant::now();
        let fail = |message: String| PhaseResult::fail(names::LOAD, started.elapsed(), message);

        let catalog = match OperationCatalog::standard() {
            Ok(catalog) => catalog,
            Err(e) => return fail(e.to_string()),
        };
        if let Some(missing) = catalog
            .services()
            .into_iter()
            .find(|service| !self.config.services.contains_key(*service))
        {
            return fail(format!("load operations target unconfigured service `{missing}`"));
        }
        let plan = match LoadPlan::from_config(&self.config.load, &catalog) {
            Ok(plan) => plan,
            Err(e) => return fail(e.to_string()),
        };

        if self.config.infra.docker_stats_enabled && self.options.mode.runs(names::INFRA_STATS) {
            state.sampler = Some(StatsSampler::spawn(self.stack.clone(), &self.config.infra));
        }

        self.progress.set_message(format!(
            "load running: {} scenario(s), about {}s",
            plan.scenarios.len(),
            plan.total_duration().as_secs()
        ));
        let engine = LoadEngine::new(
            Arc::clone(&self.deps.load_target),
            Arc::new(catalog),
            EngineSettings::from_config(&self.config),
        );
        let result = engine.run(&plan).await;
        state.drain_sampler().await;

        match result {
            Ok(report) => {
                let metrics = &report.metrics;
                let message = format!(
                    "{} requests, {:.1} req/s, error rate {:.2}%, peak {} VUs",
                    metrics.total_requests, metrics.throughput_rps, metrics.total.error_rate_pct, report.peak_vus
                );
                let details = json!({
                    "seeded": report.seeded,
                    "seed_failures": report.seed_failures,
                    "peak_vus": report.peak_vus,
                    "scenarios": report.scenarios,
                });
                state.load = Some(report);
                PhaseResult::pass(names::LOAD, started.elapsed(), message).with_details(details)
            }
            Err(e) => fail(e.to_string()),
        }
    }

    async fn infra_phase(&self, state: &mut RunState) -> PhaseResult {
        let started = Instant::now();
        state.drain_sampler().await;

        if state.samples.is_empty() && self.config.infra.docker_stats_enabled {
            match sample_once(&self.stack).await {
                Ok(batch) => state.samples.extend(batch),
                Err(e) => debug!(error = %e, "stats sample failed"),
            }
        }
        let containers = summarize(&state.samples);
        let sampled = containers.len();

        match restart_count(&self.stack).await {
            Ok(restarts) => {
                state.infra = Some(InfraSummary {
                    restarts: Some(restarts),
                    containers,
                });
                PhaseResult::pass(
                    names::INFRA_STATS,
                    started.elapsed(),
                    format!("{restarts} restart(s), {sampled} container(s) sampled"),
                )
                .with_details(json!({ "restarts": restarts, "samples": state.samples.len() }))
            }
            Err(e) => {
                warn!(error = %e, "restart counts unavailable");
                state.infra = Some(InfraSummary {
                    restarts: None,
                    containers,
                });
                PhaseResult::skip(names::INFRA_STATS, format!("container runtime unavailable: {e}"))
            }
        }
    }

    async fn write_artifacts(
        &self,
        report: &Report,
        load: Option<&LoadRunReport>,
        suites: &[SuiteResult],
    ) -> Vec<PathBuf> {
        let mut written = Vec::new();

        match self.artifacts.write_report(report).await {
            Ok(paths) => written.extend(paths),
            Err(e) => warn!(error = %e, "failed to write report"),
        }
        if let Some(load) = load {
            match self.artifacts.write_load_summary(load).await {
                Ok(path) => written.push(path),
                Err(e) => warn!(error = %e, "failed to write load summary"),
            }
        }
        match self.artifacts.write_test_results(suites).await {
            Ok(paths) => written.extend(paths),
            Err(e) => warn!(error = %e, "failed to write test results"),
        }
        written
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}
