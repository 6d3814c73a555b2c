//! Load engine: seeding, per-scenario population control and progress
//! reporting.
//!
//! Each scenario runs its own controller task. On every control tick the
//! controller compares the live population with the schedule's target and
//! spawns or retires workers to match. Retired workers finish their
//! in-flight request, so no sample is lost.
//!
//! Every task the engine starts is owned by a `JoinSet` or an abort guard:
//! dropping the `run` future (a phase timeout) stops all traffic.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use qa_core::config::LoadConfig;
use qa_core::{parse_duration, MetricAggregator, MetricsSnapshot, Outcome, QaConfig, QaError, QaResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::TargetCache;
use crate::catalog::OperationCatalog;
use crate::mix::TrafficMix;
use crate::outcome::OutcomeClassifier;
use crate::schedule::{Schedule, Stage};
use crate::target::LoadTarget;
use crate::worker::{run_worker, unique_token, RunShared, ScenarioWorkers};

const SPIKE_EDGE: Duration = Duration::from_secs(10);

/// One named scenario of a load run.
#[derive(Debug, Clone)]
pub struct ScenarioSpec {
    pub name: String,
    pub schedule: Schedule,
    pub mix: Arc<TrafficMix>,
    pub start_offset: Duration,
}

/// Ordered set of scenarios.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub scenarios: Vec<ScenarioSpec>,
}

impl LoadPlan {
    /// Build the plan from configuration. Scenarios without an explicit
    /// start offset begin when the previous scenario's schedule ends.
    pub fn from_config(load: &LoadConfig, catalog: &OperationCatalog) -> QaResult<Self> {
        let mut scenarios = Vec::with_capacity(load.scenarios.len());
        let mut next_offset = Duration::ZERO;

        for name in &load.scenarios {
            let schedule = scenario_schedule(name, load)?;
            let mix = TrafficMix::new(load.read_pct_for(name), &load.read_weights, &load.write_weights, catalog)
                .map_err(|e| QaError::validation(format!("scenario `{name}`: {e}")))?;
            let start_offset = match load.start_offsets.get(name) {
                Some(raw) => parse_duration(raw)?,
                None => next_offset,
            };
            next_offset = start_offset + schedule.total_duration();

            scenarios.push(ScenarioSpec {
                name: name.clone(),
                schedule,
                mix: Arc::new(mix),
                start_offset,
            });
        }

        let plan = Self { scenarios };
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> QaResult<()> {
        if self.scenarios.is_empty() {
            return Err(QaError::validation("load plan has no scenarios"));
        }
        for scenario in &self.scenarios {
            scenario
                .schedule
                .validate()
                .map_err(|e| QaError::validation(format!("scenario `{}`: {e}", scenario.name)))?;
        }
        Ok(())
    }

    /// Wall-clock length of the plan, from the first start to the last end.
    pub fn total_duration(&self) -> Duration {
        self.scenarios
            .iter()
            .map(|s| s.start_offset + s.schedule.total_duration())
            .max()
            .unwrap_or_default()
    }
}

fn scenario_schedule(name: &str, load: &LoadConfig) -> QaResult<Schedule> {
    let ramp = parse_duration(&load.ramp_duration)?;
    let schedule = match name {
        "baseline" => Schedule::constant(load.vus_baseline, parse_duration(&load.duration_baseline)?),
        "soak" => Schedule::constant(load.vus_soak, parse_duration(&load.duration_soak)?),
        "high_load" => Schedule::ramping(
            0,
            vec![
                Stage::new(ramp, load.vus_high),
                Stage::new(parse_duration(&load.duration_high)?, load.vus_high),
                Stage::new(ramp, 0),
            ],
        ),
        "spike" => Schedule::ramping(
            0,
            vec![
                Stage::new(SPIKE_EDGE, load.vus_baseline),
                Stage::new(SPIKE_EDGE, load.vus_spike),
                Stage::new(parse_duration(&load.duration_spike)?, load.vus_spike),
                Stage::new(SPIKE_EDGE, load.vus_baseline),
                Stage::new(ramp, 0),
            ],
        ),
        other => return Err(QaError::validation(format!("unknown scenario `{other}`"))),
    };
    Ok(schedule)
}

/// Engine tuning, derived from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub seed_entities: usize,
    pub cache_capacity: usize,
    pub think_time: (Duration, Duration),
    pub classifier: OutcomeClassifier,
    pub control_interval: Duration,
    pub progress_interval: Duration,
    /// Fixed RNG seed for reproducible traffic
    pub rng_seed: Option<u64>,
}

impl EngineSettings {
    pub fn from_config(config: &QaConfig) -> Self {
        let load = &config.load;
        Self {
            seed_entities: load.seed_entities,
            cache_capacity: load.target_cache_capacity,
            think_time: load.think_time(),
            classifier: OutcomeClassifier::from_config(&config.http, load.latency_ceiling_ms),
            control_interval: Duration::from_millis(load.control_interval_ms),
            progress_interval: Duration::from_secs(load.progress_interval_secs),
            rng_seed: load.seed,
        }
    }
}

/// Live population at one control tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PopulationSample {
    pub elapsed_ms: u64,
    pub target: usize,
    pub live: usize,
}

/// Outcome of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioRun {
    pub name: String,
    pub schedule: String,
    pub start_offset_ms: u64,
    pub duration_ms: u64,
    pub peak_vus: usize,
    pub workers_spawned: u64,
    #[serde(skip)]
    pub timeline: Vec<PopulationSample>,
}

/// Result of a load run; serialized as the load summary artifact.
#[derive(Debug, Clone, Serialize)]
pub struct LoadRunReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub seeded: usize,
    pub seed_failures: usize,
    pub cache_size: usize,
    pub peak_vus: usize,
    pub scenarios: Vec<ScenarioRun>,
    pub metrics: MetricsSnapshot,
}

/// Drives a [`LoadPlan`] against a [`LoadTarget`].
pub struct LoadEngine {
    target: Arc<dyn LoadTarget>,
    catalog: Arc<OperationCatalog>,
    settings: EngineSettings,
}

impl LoadEngine {
    pub fn new(target: Arc<dyn LoadTarget>, catalog: Arc<OperationCatalog>, settings: EngineSettings) -> Self {
        Self {
            target,
            catalog,
            settings,
        }
    }

    /// Run every scenario of the plan and return aggregated metrics.
    /// Individual request failures never abort the run.
    pub async fn run(&self, plan: &LoadPlan) -> QaResult<LoadRunReport> {
        plan.validate()?;

        let aggregator = Arc::new(MetricAggregator::new());
        let shared = Arc::new(RunShared {
            target: Arc::clone(&self.target),
            catalog: Arc::clone(&self.catalog),
            cache: Arc::new(TargetCache::new(self.settings.cache_capacity)),
            aggregator: Arc::clone(&aggregator),
            classifier: self.settings.classifier,
            think_time: self.settings.think_time,
        });

        let (seeded, seed_failures) = self.seed(&shared).await;
        info!(
            seeded,
            seed_failures,
            scenarios = plan.scenarios.len(),
            planned_secs = plan.total_duration().as_secs(),
            "starting load run"
        );

        let started_at = Utc::now();
        let started = Instant::now();
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let _progress = (!self.settings.progress_interval.is_zero()).then(|| {
            AbortOnDrop(tokio::spawn(report_progress(
                Arc::clone(&aggregator),
                Arc::clone(&live),
                self.settings.progress_interval,
                started,
            )))
        });

        let mut controllers = JoinSet::new();
        for (index, spec) in plan.scenarios.iter().cloned().enumerate() {
            let control = Controller {
                shared: Arc::clone(&shared),
                control_interval: self.settings.control_interval,
                rng_seed: self.settings.rng_seed,
                live: Arc::clone(&live),
                peak: Arc::clone(&peak),
            };
            controllers.spawn(async move { (index, control.run(spec).await) });
        }

        let mut finished = Vec::with_capacity(plan.scenarios.len());
        while let Some(joined) = controllers.join_next().await {
            finished.push(joined.map_err(|e| QaError::internal(format!("scenario controller failed: {e}")))?);
        }
        finished.sort_by_key(|(index, _)| *index);
        let scenarios: Vec<ScenarioRun> = finished.into_iter().map(|(_, run)| run).collect();

        let elapsed = started.elapsed();
        let metrics = aggregator.snapshot(elapsed);
        info!(
            requests = metrics.total_requests,
            throughput_rps = metrics.throughput_rps,
            error_rate_pct = metrics.total.error_rate_pct,
            "load run complete"
        );

        Ok(LoadRunReport {
            started_at,
            duration_ms: elapsed.as_millis() as u64,
            seeded,
            seed_failures,
            cache_size: shared.cache.len(),
            peak_vus: peak.load(Ordering::Relaxed),
            scenarios,
            metrics,
        })
    }

    /// Create the initial entities so reads have targets from time zero.
    /// Seeding requests are not part of the measured run.
    async fn seed(&self, shared: &RunShared) -> (usize, usize) {
        let mut rng = worker_rng(self.settings.rng_seed, "seed", 0);
        let op = self.catalog.seed_operation();
        let mut failures = 0;

        for _ in 0..self.settings.seed_entities {
            let unique = unique_token(&mut rng);
            if shared.perform(None, op, None, &unique).await != Outcome::Success {
                failures += 1;
            }
        }
        if failures > 0 {
            warn!(failures, operation = %op.name, "some seed requests failed");
        }
        (self.settings.seed_entities - failures, failures)
    }
}

fn worker_rng(seed: Option<u64>, scenario: &str, index: u64) -> StdRng {
    match seed {
        Some(seed) => {
            let mut hasher = DefaultHasher::new();
            seed.hash(&mut hasher);
            scenario.hash(&mut hasher);
            index.hash(&mut hasher);
            StdRng::seed_from_u64(hasher.finish())
        }
        None => StdRng::from_entropy(),
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Controller {
    shared: Arc<RunShared>,
    control_interval: Duration,
    rng_seed: Option<u64>,
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Controller {
    async fn run(self, spec: ScenarioSpec) -> ScenarioRun {
        tokio::time::sleep(spec.start_offset).await;
        info!(scenario = %spec.name, schedule = %spec.schedule.description(), "scenario started");

        let ctx = Arc::new(ScenarioWorkers {
            shared: Arc::clone(&self.shared),
            scenario: spec.name.clone(),
            mix: Arc::clone(&spec.mix),
        });

        let started = Instant::now();
        let total = spec.schedule.total_duration();
        // Stop signals of the live workers; the tasks themselves live in
        // `workers` until the scenario ends.
        let mut active: Vec<watch::Sender<bool>> = Vec::new();
        let mut workers = JoinSet::new();
        let mut timeline = Vec::new();
        let mut spawned = 0u64;
        let mut peak = 0usize;

        let mut ticker = interval(self.control_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let elapsed = started.elapsed();
            if elapsed >= total {
                break;
            }

            let target = spec.schedule.target_at(elapsed);
            if target != active.len() {
                debug!(scenario = %spec.name, from = active.len(), to = target, "adjusting population");
            }

            while active.len() < target {
                let (stop_tx, stop_rx) = watch::channel(false);
                let rng = worker_rng(self.rng_seed, &spec.name, spawned);
                spawned += 1;
                workers.spawn(run_worker(Arc::clone(&ctx), rng, stop_rx));
                active.push(stop_tx);
                let now = self.live.fetch_add(1, Ordering::Relaxed) + 1;
                self.peak.fetch_max(now, Ordering::Relaxed);
            }
            while active.len() > target {
                if let Some(stop_tx) = active.pop() {
                    let _ = stop_tx.send(true);
                    self.live.fetch_sub(1, Ordering::Relaxed);
                }
            }

            peak = peak.max(active.len());
            timeline.push(PopulationSample {
                elapsed_ms: elapsed.as_millis() as u64,
                target,
                live: active.len(),
            });
        }

        for stop_tx in active.drain(..) {
            let _ = stop_tx.send(true);
            self.live.fetch_sub(1, Ordering::Relaxed);
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(scenario = %spec.name, error = %e, "worker task failed");
            }
        }

        let duration = started.elapsed();
        info!(scenario = %spec.name, workers = spawned, elapsed_ms = duration.as_millis() as u64, "scenario finished");

        ScenarioRun {
            name: spec.name,
            schedule: spec.schedule.description(),
            start_offset_ms: spec.start_offset.as_millis() as u64,
            duration_ms: duration.as_millis() as u64,
            peak_vus: peak,
            workers_spawned: spawned,
            timeline,
        }
    }
}

async fn report_progress(aggregator: Arc<MetricAggregator>, live: Arc<AtomicUsize>, every: Duration, started: Instant) {
    let mut ticker = interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let overall = aggregator.overall();
        info!(
            elapsed_s = started.elapsed().as_secs(),
            requests = overall.count,
            p95_ms = overall.p95_ms,
            error_rate_pct = overall.error_rate_pct,
            live_vus = live.load(Ordering::Relaxed),
            "load progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_from_default_config() {
        let config = QaConfig::default();
        let catalog = OperationCatalog::standard().unwrap();
        let plan = LoadPlan::from_config(&config.load, &catalog).unwrap();

        let names: Vec<_> = plan.scenarios.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["baseline", "high_load", "spike"]);

        // Sequential by default
        assert_eq!(plan.scenarios[0].start_offset, Duration::ZERO);
        assert_eq!(plan.scenarios[1].start_offset, Duration::from_secs(60));
        // high_load: 30s ramp + 3m hold + 30s ramp down
        assert_eq!(plan.scenarios[2].start_offset, Duration::from_secs(60 + 240));

        assert_eq!(plan.scenarios[0].mix.read_pct(), 80);
        assert_eq!(plan.scenarios[2].mix.read_pct(), 90);
        assert_eq!(plan.scenarios[2].schedule.peak_vus(), 1000);
    }

    #[test]
    fn test_explicit_offsets_allow_overlap() {
        let mut config = QaConfig::default();
        config.load.scenarios = vec!["baseline".into(), "soak".into()];
        config.load.start_offsets.insert("soak".into(), "10s".into());
        let catalog = OperationCatalog::standard().unwrap();
        let plan = LoadPlan::from_config(&config.load, &catalog).unwrap();

        assert_eq!(plan.scenarios[1].start_offset, Duration::from_secs(10));
        assert_eq!(plan.total_duration(), Duration::from_secs(610));
    }

    #[test]
    fn test_seeded_worker_rng_is_reproducible() {
        use rand::Rng;
        let a: u64 = worker_rng(Some(7), "baseline", 3).gen();
        let b: u64 = worker_rng(Some(7), "baseline", 3).gen();
        let c: u64 = worker_rng(Some(7), "baseline", 4).gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
