//! Virtual-user loop

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use qa_core::{CorrelationId, MetricAggregator, MetricSample, Outcome};
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;

use crate::cache::TargetCache;
use crate::catalog::{OperationCatalog, OperationDef};
use crate::mix::TrafficMix;
use crate::outcome::OutcomeClassifier;
use crate::target::{LoadTarget, TargetRequest};

/// State shared by every worker of a run.
pub(crate) struct RunShared {
    pub target: Arc<dyn LoadTarget>,
    pub catalog: Arc<OperationCatalog>,
    pub cache: Arc<TargetCache>,
    pub aggregator: Arc<MetricAggregator>,
    pub classifier: OutcomeClassifier,
    pub think_time: (Duration, Duration),
}

impl RunShared {
    /// Issue one operation, classify it and harvest any produced target.
    /// The sample is recorded under `scenario` when one is given.
    pub(crate) async fn perform(
        &self,
        scenario: Option<&str>,
        op: &OperationDef,
        target_id: Option<&str>,
        unique: &str,
    ) -> Outcome {
        let request = TargetRequest {
            operation: op.name.clone(),
            service: op.service.clone(),
            method: op.method.clone(),
            path: op.render_path(target_id, unique),
            body: op.render_body(target_id, unique),
            correlation_id: CorrelationId::new(),
        };

        let started = Instant::now();
        let result = self.target.execute(request).await;
        let latency = started.elapsed();
        let (outcome, status) = self.classifier.classify(&result, latency);

        if outcome == Outcome::Success {
            if let (Some(pointer), Ok(response)) = (&op.produces_target, &result) {
                if let Some(id) = response.pointer(pointer).and_then(identifier) {
                    self.cache.insert(id);
                }
            }
        }

        trace!(
            scenario = scenario.unwrap_or("seed"),
            operation = %op.name,
            status = ?status,
            outcome = outcome.label(),
            latency_ms = latency.as_millis() as u64,
            "load request"
        );

        if let Some(scenario) = scenario {
            self.aggregator.record(MetricSample {
                scenario: scenario.to_string(),
                operation: op.name.clone(),
                category: op.category,
                latency,
                status,
                outcome,
                timestamp: Utc::now(),
            });
        }

        outcome
    }
}

fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Random token for unique names in request bodies.
pub(crate) fn unique_token<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{:012x}", rng.gen::<u64>() & 0xffff_ffff_ffff)
}

fn think_time<R: Rng + ?Sized>(rng: &mut R, (min, max): (Duration, Duration)) -> Duration {
    if max <= min {
        return min;
    }
    let ms = rng.gen_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(ms)
}

/// Per-scenario worker context.
pub(crate) struct ScenarioWorkers {
    pub shared: Arc<RunShared>,
    pub scenario: String,
    pub mix: Arc<TrafficMix>,
}

/// Run one virtual user until `stop` flips or its sender is dropped. An
/// in-flight request always completes and is recorded.
pub(crate) async fn run_worker(ctx: Arc<ScenarioWorkers>, mut rng: StdRng, mut stop: watch::Receiver<bool>) {
    let shared = &ctx.shared;

    loop {
        if *stop.borrow() {
            break;
        }

        let (_, name) = ctx.mix.choose(&mut rng);
        let Some(op) = shared.catalog.get(name) else {
            break;
        };

        let mut target_id = None;
        if op.needs_target {
            target_id = shared.cache.sample(&mut rng);
            if target_id.is_none() {
                let unique = unique_token(&mut rng);
                shared
                    .perform(Some(&ctx.scenario), shared.catalog.seed_operation(), None, &unique)
                    .await;
                target_id = shared.cache.sample(&mut rng);
            }
        }

        if op.needs_target && target_id.is_none() {
            trace!(scenario = %ctx.scenario, operation = %op.name, "no target available");
        } else {
            let unique = unique_token(&mut rng);
            shared
                .perform(Some(&ctx.scenario), op, target_id.as_deref(), &unique)
                .await;
        }

        let pause = think_time(&mut rng, shared.think_time);
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = stop.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_think_time_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let bounds = (Duration::from_millis(100), Duration::from_millis(500));
        for _ in 0..1000 {
            let pause = think_time(&mut rng, bounds);
            assert!(pause >= bounds.0 && pause <= bounds.1);
        }
        let fixed = (Duration::from_millis(50), Duration::from_millis(50));
        assert_eq!(think_time(&mut rng, fixed), Duration::from_millis(50));
    }

    #[test]
    fn test_identifier_extraction() {
        assert_eq!(identifier(&Value::from("abc")), Some("abc".to_string()));
        assert_eq!(identifier(&Value::from(42)), Some("42".to_string()));
        assert_eq!(identifier(&Value::from("")), None);
        assert_eq!(identifier(&Value::Null), None);
    }

    #[test]
    fn test_unique_token_is_hex() {
        let mut rng = StdRng::seed_from_u64(9);
        let token = unique_token(&mut rng);
        assert_eq!(token.len(), 12);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
