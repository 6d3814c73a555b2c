//! Readiness prober timing on a paused clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use qa_core::config::{BackoffConfig, ReadinessConfig};
use qa_core::{ApiRequest, ApiResponse, ApiTransport, QaError, QaResult};
use qa_runner::{Endpoint, ReadinessProber};
use serde_json::json;

/// Each URL turns ready on a given poll; URLs absent from the map never do.
struct Warming {
    ready_on: HashMap<String, usize>,
    polls: Mutex<HashMap<String, usize>>,
}

impl Warming {
    fn new(ready_on: &[(&str, usize)]) -> Arc<Self> {
        Arc::new(Self {
            ready_on: ready_on.iter().map(|(url, n)| ((*url).to_string(), *n)).collect(),
            polls: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl ApiTransport for Warming {
    async fn send(&self, request: ApiRequest) -> QaResult<ApiResponse> {
        let poll = {
            let mut polls = self.polls.lock();
            let count = polls.entry(request.url.clone()).or_default();
            *count += 1;
            *count
        };
        match self.ready_on.get(&request.url) {
            Some(n) if poll >= *n => Ok(ApiResponse {
                status: 200,
                body: json!({"status": "ready"}),
                latency: Duration::ZERO,
            }),
            Some(_) => Ok(ApiResponse {
                status: 503,
                body: json!({"status": "starting"}),
                latency: Duration::ZERO,
            }),
            None => Err(QaError::Transport("connection refused".to_string())),
        }
    }
}

fn config(timeout_secs: f64) -> ReadinessConfig {
    ReadinessConfig {
        path: "/readyz".to_string(),
        ready_status: 200,
        timeout_secs,
        backoff: BackoffConfig {
            initial_interval_ms: 2000,
            max_interval_ms: 10_000,
            multiplier: 1.5,
        },
    }
}

fn endpoints() -> Vec<Endpoint> {
    ["poi", "asset", "script", "transcription", "render"]
        .iter()
        .map(|name| Endpoint::new(*name, format!("http://{name}/readyz")))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_slow_endpoint_waits_with_backoff() {
    let transport = Warming::new(&[
        ("http://poi/readyz", 1),
        ("http://asset/readyz", 1),
        ("http://script/readyz", 1),
        ("http://transcription/readyz", 1),
        ("http://render/readyz", 3),
    ]);
    let prober = ReadinessProber::new(transport, &config(120.0));

    let report = prober.await_ready(&endpoints()).await.unwrap();

    assert!(report.ready);
    assert_eq!(report.per_endpoint.len(), 5);
    assert_eq!(report.per_endpoint["poi"], Duration::ZERO);
    let render = report.per_endpoint["render"];
    assert!(render >= Duration::from_secs(2), "{render:?}");
    assert!(render <= Duration::from_secs(30), "{render:?}");
    // 2s after the first poll, 3s after the second
    assert_eq!(render, Duration::from_secs(5));
    assert_eq!(report.polls["render"], 3);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_names_unready_endpoints() {
    let transport = Warming::new(&[
        ("http://poi/readyz", 1),
        ("http://asset/readyz", 1),
        ("http://script/readyz", 1),
        ("http://transcription/readyz", 1000),
    ]);
    let prober = ReadinessProber::new(transport, &config(20.0));

    let err = prober.await_ready(&endpoints()).await.unwrap_err();

    match err {
        QaError::ReadinessTimeout { unready, waited } => {
            assert_eq!(unready, vec!["transcription".to_string(), "render".to_string()]);
            assert_eq!(waited, Duration::from_secs(20));
        }
        other => panic!("unexpected error: {other}"),
    }
}
