//! Executor behaviour against a scripted transport on a paused clock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use qa_core::{ApiRequest, ApiResponse, ApiTransport, PhaseStatus, QaError, QaResult};
use qa_e2e::{Call, ExecutorSettings, Expect, Poll, Scenario, Step, WorkflowExecutor};
use serde_json::{json, Value};

type Handler = dyn Fn(&ApiRequest, usize) -> (u16, Value) + Send + Sync;

/// Answers through a handler that sees how many times the URL was hit.
struct Scripted {
    handler: Box<Handler>,
    hits: Mutex<HashMap<String, usize>>,
    seen: Mutex<Vec<ApiRequest>>,
}

impl Scripted {
    fn new(handler: impl Fn(&ApiRequest, usize) -> (u16, Value) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            hits: Mutex::new(HashMap::new()),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ApiTransport for Scripted {
    async fn send(&self, request: ApiRequest) -> QaResult<ApiResponse> {
        let hit = {
            let mut hits = self.hits.lock();
            let count = hits.entry(request.url.clone()).or_default();
            *count += 1;
            *count
        };
        let (status, body) = (self.handler)(&request, hit);
        self.seen.lock().push(request);
        Ok(ApiResponse {
            status,
            body,
            latency: Duration::ZERO,
        })
    }
}

fn executor(transport: Arc<Scripted>) -> WorkflowExecutor {
    WorkflowExecutor::new(
        transport,
        BTreeMap::from([("jobs".to_string(), "http://jobs.local/".to_string())]),
        ExecutorSettings {
            poll_interval: Duration::from_secs(2),
            poll_max_attempts: 60,
        },
    )
}

fn rejection_step() -> Step {
    Step::new("rejects_bad_input")
        .negative()
        .then(Call::post("jobs", "/jobs").body(json!({})).status(422))
}

fn job_poll(attempts: u32) -> Poll {
    Poll::new(
        Call::get("jobs", "/jobs/{job_id}").equals("/status", json!("completed")),
        vec![Expect::Equals("/status".into(), json!("completed"))],
    )
    .attempts(attempts)
    .every(Duration::from_secs(1))
}

/// POST /jobs creates job 7; GET /jobs/7 completes on the given hit.
fn jobs(completes_on: usize) -> Arc<Scripted> {
    Scripted::new(move |request, hit| match (request.method.as_str(), request.url.as_str()) {
        ("POST", "http://jobs.local/jobs") if request.body == Some(json!({})) => (422, json!({"error": "invalid"})),
        ("POST", "http://jobs.local/jobs") => (201, json!({"id": "7", "status": "queued"})),
        ("GET", "http://jobs.local/jobs/7") if hit >= completes_on => (200, json!({"id": "7", "status": "completed"})),
        ("GET", "http://jobs.local/jobs/7") => (200, json!({"id": "7", "status": "processing"})),
        _ => (404, json!({"error": "not_found"})),
    })
}

fn create_job() -> Step {
    Step::new("create_job").then(
        Call::post("jobs", "/jobs")
            .body(json!({"kind": "render"}))
            .status(201)
            .extract("job_id", "/id"),
    )
}

#[tokio::test(start_paused = true)]
async fn test_poll_satisfied_on_third_attempt() {
    let scenario = Scenario::new(
        "jobs",
        vec![
            rejection_step(),
            create_job(),
            Step::new("wait_for_job").then(job_poll(5)),
        ],
    );

    let report = executor(jobs(3)).run(&scenario).await.unwrap();
    let wait = report.step("wait_for_job").unwrap();

    assert!(report.passed(), "{:#?}", report.steps);
    assert_eq!(wait.status, PhaseStatus::Pass);
    assert_eq!(wait.attempts, Some(3));
    assert!(
        (3000..3100).contains(&wait.duration_ms),
        "duration {}ms",
        wait.duration_ms
    );
}

#[tokio::test(start_paused = true)]
async fn test_poll_exhaustion_names_last_state() {
    let scenario = Scenario::new(
        "jobs",
        vec![
            rejection_step(),
            create_job(),
            Step::new("wait_for_job").then(job_poll(5)),
            Step::new("after").then(Call::get("jobs", "/jobs/{job_id}").status(200)),
        ],
    );

    let report = executor(jobs(usize::MAX)).run(&scenario).await.unwrap();
    let wait = report.step("wait_for_job").unwrap();

    assert!(!report.passed());
    assert_eq!(wait.status, PhaseStatus::Fail);
    assert_eq!(wait.attempts, Some(5));
    assert!(wait.message.contains("5 attempts"), "{}", wait.message);
    assert!(wait.message.contains("processing"), "{}", wait.message);
    // a failed step does not stop the scenario
    assert_eq!(report.step("after").unwrap().status, PhaseStatus::Pass);
}

#[tokio::test(start_paused = true)]
async fn test_tolerated_poll_passes() {
    let scenario = Scenario::new(
        "jobs",
        vec![
            rejection_step(),
            create_job(),
            Step::new("wait_for_job").then(job_poll(2).tolerate_timeout()),
        ],
    );

    let report = executor(jobs(usize::MAX)).run(&scenario).await.unwrap();
    let wait = report.step("wait_for_job").unwrap();

    assert_eq!(wait.status, PhaseStatus::Pass);
    assert_eq!(wait.attempts, Some(2));
    assert!(wait.assertions.iter().any(|a| a.contains("tolerated")));
}

#[tokio::test(start_paused = true)]
async fn test_dependents_of_failed_step_are_skipped() {
    let failing_create = Scripted::new(|_, _| (500, json!({"error": "boom"})));
    let scenario = Scenario::new(
        "jobs",
        vec![
            create_job(),
            Step::new("wait_for_job").then(job_poll(5)),
            rejection_step(),
        ],
    );

    let report = executor(failing_create).run(&scenario).await.unwrap();

    assert_eq!(report.step("create_job").unwrap().status, PhaseStatus::Fail);
    let wait = report.step("wait_for_job").unwrap();
    assert_eq!(wait.status, PhaseStatus::Skip);
    assert!(wait.message.contains("job_id"));
    // independent steps still run
    assert_eq!(report.step("rejects_bad_input").unwrap().status, PhaseStatus::Fail);
    assert_eq!(report.count(PhaseStatus::Skip), 1);
}

#[tokio::test(start_paused = true)]
async fn test_one_correlation_id_per_run() {
    let transport = jobs(1);
    let scenario = Scenario::new(
        "jobs",
        vec![
            rejection_step(),
            create_job(),
            Step::new("wait_for_job").then(job_poll(5)),
        ],
    );

    let report = executor(Arc::clone(&transport)).run(&scenario).await.unwrap();
    let seen = transport.seen.lock();

    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|r| r.correlation_id == report.correlation_id));
}

#[tokio::test]
async fn test_scenario_without_negative_step_is_rejected() {
    let scenario = Scenario::new("jobs", vec![create_job()]);
    let err = executor(jobs(1)).run(&scenario).await.unwrap_err();
    assert!(matches!(err, QaError::Validation(_)));
}
