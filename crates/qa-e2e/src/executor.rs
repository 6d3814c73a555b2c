//! Workflow executor.
//!
//! Runs every step of a scenario in order with one correlation id for the
//! whole run. A failing step never stops the scenario; steps that need a
//! variable no earlier step produced are skipped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use qa_core::config::E2eConfig;
use qa_core::{
    ApiRequest, ApiResponse, ApiTransport, CorrelationId, PhaseStatus, QaConfig, QaError, QaResult, ServiceClient,
};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::expect::all_hold;
use crate::poll::{PollState, PollUntil};
use crate::step::{Action, Call, OnExhausted, Poll, Scenario, Step};
use crate::template::{render, render_value, Vars};

/// Variable holding a short random suffix, unique per run.
pub const RUN_SUFFIX_VAR: &str = "run_suffix";
/// Variable holding a random UUID no service knows about.
pub const UNKNOWN_ID_VAR: &str = "unknown_id";

/// Poll defaults applied when a poll does not set its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
}

impl ExecutorSettings {
    pub fn from_config(e2e: &E2eConfig) -> Self {
        Self {
            poll_interval: e2e.poll_interval(),
            poll_max_attempts: e2e.poll_max_attempts(),
        }
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub name: String,
    pub status: PhaseStatus,
    pub duration_ms: u64,
    pub message: String,
    pub negative: bool,
    /// Attempts used by the last poll of the step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    pub assertions: Vec<String>,
}

impl StepResult {
    pub fn passed(&self) -> bool {
        self.status == PhaseStatus::Pass
    }
}

/// Outcome of a scenario run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowReport {
    pub scenario: String,
    pub correlation_id: CorrelationId,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
}

impl WorkflowReport {
    /// Every step passed.
    pub fn passed(&self) -> bool {
        self.steps.iter().all(StepResult::passed)
    }

    pub fn count(&self, status: PhaseStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// One-line summary for the phase result.
    pub fn summary(&self) -> String {
        format!(
            "{}/{} steps passed, {} failed, {} skipped",
            self.count(PhaseStatus::Pass),
            self.steps.len(),
            self.count(PhaseStatus::Fail),
            self.count(PhaseStatus::Skip)
        )
    }

    pub fn to_details(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Default)]
struct StepLog {
    assertions: Vec<String>,
    attempts: Option<u32>,
}

impl StepLog {
    fn ok(&mut self, line: String) {
        self.assertions.push(format!("ok   {line}"));
    }

    fn failed(&mut self, line: String) {
        self.assertions.push(format!("FAIL {line}"));
    }

    fn note(&mut self, line: String) {
        self.assertions.push(format!("note {line}"));
    }
}

/// Sends scenario requests through an [`ApiTransport`].
pub struct WorkflowExecutor {
    transport: Arc<dyn ApiTransport>,
    base_urls: BTreeMap<String, String>,
    settings: ExecutorSettings,
}

impl WorkflowExecutor {
    pub fn new(
        transport: Arc<dyn ApiTransport>,
        base_urls: BTreeMap<String, String>,
        settings: ExecutorSettings,
    ) -> Self {
        let base_urls = base_urls
            .into_iter()
            .map(|(name, url)| (name, url.trim_end_matches('/').to_string()))
            .collect();
        Self {
            transport,
            base_urls,
            settings,
        }
    }

    pub fn from_config(config: &QaConfig) -> QaResult<Self> {
        let client = ServiceClient::new(&config.http)?;
        let base_urls = config
            .services
            .iter()
            .map(|(name, service)| (name.clone(), service.base_url.clone()))
            .collect();
        Ok(Self::new(
            Arc::new(client),
            base_urls,
            ExecutorSettings::from_config(&config.e2e),
        ))
    }

    /// Run the scenario. Fails only when the scenario itself is invalid;
    /// request and assertion failures are reported per step.
    pub async fn run(&self, scenario: &Scenario) -> QaResult<WorkflowReport> {
        scenario.validate()?;

        let correlation_id = CorrelationId::new();
        let started_at = Utc::now();
        let started = Instant::now();
        let mut vars = initial_vars();

        info!(
            scenario = %scenario.name,
            correlation_id = %correlation_id,
            steps = scenario.steps.len(),
            "starting workflow"
        );

        let mut steps = Vec::with_capacity(scenario.steps.len());
        for step in &scenario.steps {
            let result = self.run_step(step, &mut vars, correlation_id).await;
            match result.status {
                PhaseStatus::Pass => info!(step = %result.name, duration_ms = result.duration_ms, "step passed"),
                PhaseStatus::Fail => warn!(step = %result.name, message = %result.message, "step failed"),
                PhaseStatus::Skip => warn!(step = %result.name, message = %result.message, "step skipped"),
            }
            steps.push(result);
        }

        let report = WorkflowReport {
            scenario: scenario.name.clone(),
            correlation_id,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            steps,
        };
        info!(scenario = %report.scenario, passed = report.passed(), summary = %report.summary(), "workflow finished");
        Ok(report)
    }

    async fn run_step(&self, step: &Step, vars: &mut Vars, correlation_id: CorrelationId) -> StepResult {
        let missing = step.missing_vars(vars);
        if !missing.is_empty() {
            return StepResult {
                name: step.name.clone(),
                status: PhaseStatus::Skip,
                duration_ms: 0,
                message: format!("missing variable(s): {}", missing.join(", ")),
                negative: step.negative,
                attempts: None,
                assertions: Vec::new(),
            };
        }

        let started = Instant::now();
        let mut log = StepLog::default();
        let mut outcome = Ok(());
        for action in &step.actions {
            outcome = match action {
                Action::Call(call) => self.run_call(&step.name, call, vars, correlation_id, &mut log).await,
                Action::Poll(poll) => self.run_poll(&step.name, poll, vars, correlation_id, &mut log).await,
            };
            if outcome.is_err() {
                break;
            }
        }

        let (status, message) = match outcome {
            Ok(()) => (PhaseStatus::Pass, format!("{} checks passed", log.assertions.len())),
            Err(e) => (PhaseStatus::Fail, e.to_string()),
        };
        StepResult {
            name: step.name.clone(),
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            message,
            negative: step.negative,
            attempts: log.attempts,
            assertions: log.assertions,
        }
    }

    async fn send(
        &self,
        step: &str,
        call: &Call,
        vars: &Vars,
        correlation_id: CorrelationId,
    ) -> QaResult<ApiResponse> {
        let unknown = |name: String| QaError::assertion(step, format!("unknown variable `{name}`"));
        let base = self
            .base_urls
            .get(&call.service)
            .ok_or_else(|| QaError::validation(format!("no base URL for service `{}`", call.service)))?;
        let path = render(&call.path, vars).map_err(unknown)?;

        let mut request = ApiRequest::new(call.method.clone(), format!("{base}{path}"), correlation_id)
            .with_api_key(call.api_key.clone());
        if let Some(body) = &call.body {
            request = request.with_body(render_value(body, vars).map_err(unknown)?);
        }
        self.transport.send(request).await
    }

    async fn run_call(
        &self,
        step: &str,
        call: &Call,
        vars: &mut Vars,
        correlation_id: CorrelationId,
        log: &mut StepLog,
    ) -> QaResult<()> {
        let response = match self.send(step, call, vars, correlation_id).await {
            Ok(response) => response,
            Err(e) => {
                log.failed(format!("{}: {e}", call.title()));
                return Err(e);
            }
        };
        verify(step, call, &response, vars, log)
    }

    async fn run_poll(
        &self,
        step: &str,
        poll: &Poll,
        vars: &mut Vars,
        correlation_id: CorrelationId,
        log: &mut StepLog,
    ) -> QaResult<()> {
        let mut state = PollUntil::new(
            poll.max_attempts.unwrap_or(self.settings.poll_max_attempts),
            poll.interval.unwrap_or(self.settings.poll_interval),
        );
        let title = poll.call.title();
        let mut last_state = String::from("no response");

        loop {
            tokio::time::sleep(state.interval()).await;

            let response = match self.send(step, &poll.call, vars, correlation_id).await {
                Ok(response) => {
                    last_state = response.summary();
                    Some(response)
                }
                Err(e) => {
                    last_state = e.to_string();
                    None
                }
            };
            let holds = response
                .as_ref()
                .map_or(false, |r| all_hold(&poll.until, r, vars));

            match (state.observe(holds), response) {
                (PollState::Satisfied { attempts }, Some(response)) => {
                    log.attempts = Some(attempts);
                    log.ok(format!("{title}: condition met after {attempts} attempt(s)"));
                    return verify(step, &poll.call, &response, vars, log);
                }
                (PollState::Exhausted { attempts }, _) => {
                    log.attempts = Some(attempts);
                    return match poll.on_exhausted {
                        OnExhausted::Fail => {
                            log.failed(format!("{title}: condition not met after {attempts} attempt(s)"));
                            Err(QaError::PollTimeout {
                                step: step.to_string(),
                                attempts,
                                last_state,
                            })
                        }
                        OnExhausted::Tolerate => {
                            log.note(format!("{title}: still pending after {attempts} attempt(s), tolerated"));
                            Ok(())
                        }
                    };
                }
                _ => debug!(step, attempt = state.attempts_used(), last_state = %last_state, "condition not met yet"),
            }
        }
    }
}

/// Check the call's expectations in order, then extract its variables.
fn verify(step: &str, call: &Call, response: &ApiResponse, vars: &mut Vars, log: &mut StepLog) -> QaResult<()> {
    let title = call.title();
    for expect in &call.expect {
        let described = expect.describe();
        match expect.check(response, vars) {
            Ok(()) => log.ok(format!("{title}: {described}")),
            Err(observed) => {
                log.failed(format!("{title}: {described} ({observed})"));
                return Err(QaError::assertion(step, format!("{title}: expected {described}, {observed}")));
            }
        }
    }

    for (var, pointer) in &call.extract {
        let value = response.pointer(pointer).and_then(scalar).ok_or_else(|| {
            log.failed(format!("{title}: extract {var} from {pointer}"));
            QaError::assertion(step, format!("{title}: no value at {pointer} for `{var}`"))
        })?;
        vars.insert(var.clone(), value);
    }
    Ok(())
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn initial_vars() -> Vars {
    let suffix = Uuid::new_v4().simple().to_string();
    Vars::from([
        (RUN_SUFFIX_VAR.to_string(), suffix[..8].to_string()),
        (UNKNOWN_ID_VAR.to_string(), Uuid::new_v4().to_string()),
    ])
}
