//! Readiness prober.
//!
//! Every endpoint is polled concurrently. After each unready answer (or
//! transport error) the endpoint waits `backoff_for_attempt(n)` before the
//! next poll; the whole probe shares one deadline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use qa_core::config::{BackoffConfig, ReadinessConfig};
use qa_core::{ApiRequest, ApiTransport, CorrelationId, Method, QaConfig, QaError, QaResult};
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// A named readiness URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    /// The readiness URL of every configured service.
    pub fn for_services(config: &QaConfig) -> Vec<Self> {
        config
            .services
            .iter()
            .map(|(name, service)| {
                Self::new(
                    name,
                    format!("{}{}", service.base_url.trim_end_matches('/'), config.readiness.path),
                )
            })
            .collect()
    }
}

/// Time each endpoint took to report ready.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    #[serde(serialize_with = "millis_map")]
    pub per_endpoint: BTreeMap<String, Duration>,
    pub polls: BTreeMap<String, u32>,
}

fn millis_map<S: serde::Serializer>(map: &BTreeMap<String, Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(map.iter().map(|(name, elapsed)| (name, elapsed.as_millis() as u64)))
}

enum Probe {
    Ready { elapsed: Duration, polls: u32 },
    Unready { name: String },
}

/// Polls readiness endpoints with exponential backoff.
pub struct ReadinessProber {
    transport: Arc<dyn ApiTransport>,
    ready_status: u16,
    timeout: Duration,
    backoff: BackoffConfig,
}

impl ReadinessProber {
    pub fn new(transport: Arc<dyn ApiTransport>, config: &ReadinessConfig) -> Self {
        Self {
            transport,
            ready_status: config.ready_status,
            timeout: config.timeout(),
            backoff: config.backoff.clone(),
        }
    }

    /// Wait until every endpoint answers with the ready status, or fail
    /// with [`QaError::ReadinessTimeout`] naming the ones that never did.
    pub async fn await_ready(&self, endpoints: &[Endpoint]) -> QaResult<ReadinessReport> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        info!(endpoints = endpoints.len(), timeout_secs = self.timeout.as_secs_f64(), "waiting for readiness");

        let probes = join_all(endpoints.iter().map(|endpoint| self.probe(endpoint, started, deadline))).await;

        let mut report = ReadinessReport {
            ready: true,
            per_endpoint: BTreeMap::new(),
            polls: BTreeMap::new(),
        };
        let mut unready = Vec::new();
        for (endpoint, probe) in endpoints.iter().zip(probes) {
            match probe {
                Probe::Ready { elapsed, polls } => {
                    report.per_endpoint.insert(endpoint.name.clone(), elapsed);
                    report.polls.insert(endpoint.name.clone(), polls);
                }
                Probe::Unready { name } => unready.push(name),
            }
        }

        if !unready.is_empty() {
            return Err(QaError::ReadinessTimeout {
                unready,
                waited: started.elapsed(),
            });
        }
        Ok(report)
    }

    async fn probe(&self, endpoint: &Endpoint, started: Instant, deadline: Instant) -> Probe {
        let correlation_id = CorrelationId::new();
        let mut attempt = 0u32;
        loop {
            let request = ApiRequest::new(Method::GET, endpoint.url.clone(), correlation_id);
            match self.transport.send(request).await {
                Ok(response) if response.status == self.ready_status => {
                    let elapsed = started.elapsed();
                    info!(endpoint = %endpoint.name, elapsed_ms = elapsed.as_millis() as u64, "ready");
                    return Probe::Ready {
                        elapsed,
                        polls: attempt + 1,
                    };
                }
                Ok(response) => debug!(endpoint = %endpoint.name, error = %QaError::http(response.status), "not ready"),
                Err(e) => debug!(endpoint = %endpoint.name, error = %e, "probe failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(endpoint = %endpoint.name, polls = attempt + 1, "never became ready");
                return Probe::Unready {
                    name: endpoint.name.clone(),
                };
            }
            let wait = self.backoff.backoff_for_attempt(attempt).min(deadline - now);
            sleep(wait).await;
            attempt += 1;
        }
    }
}
