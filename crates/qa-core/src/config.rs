//! Configuration management for the quality pipeline
//!
//! This module provides a centralized configuration system that supports:
//! - TOML/YAML/JSON configuration files
//! - Environment variable overrides (`QA_` prefix, `__` nesting)
//! - The flat environment names used by existing CI jobs (`API_KEY`,
//!   `SLO_READ_P95_MS`, `POI_BASE_URL`, ...)
//! - Reasonable defaults
//! - Configuration validation
//!
//! The loaded [`QaConfig`] is immutable for the rest of the run and is
//! passed explicitly to every component.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{QaError, QaResult};

/// Flat environment names accepted for backwards compatibility, mapped to
/// their configuration keys. Applied after every other source.
const LEGACY_ENV_ALIASES: &[(&str, &str)] = &[
    ("POI_BASE_URL", "services.poi.base_url"),
    ("ASSET_BASE_URL", "services.asset.base_url"),
    ("SCRIPT_BASE_URL", "services.script.base_url"),
    ("TRANSCRIPTION_BASE_URL", "services.transcription.base_url"),
    ("RENDER_BASE_URL", "services.render.base_url"),
    ("API_KEY", "http.api_key"),
    ("QA_REQUEST_TIMEOUT", "http.request_timeout_secs"),
    ("QA_POLL_INTERVAL", "e2e.poll_interval_secs"),
    ("QA_POLL_MAX_WAIT", "e2e.poll_max_wait_secs"),
    ("SLO_ERROR_RATE_PCT", "slo.error_rate_pct"),
    ("SLO_READ_P95_MS", "slo.read_p95_ms"),
    ("SLO_WRITE_P95_MS", "slo.write_p95_ms"),
    ("SLO_MAX_RESTARTS", "slo.max_restarts"),
    ("LOAD_VUS_BASELINE", "load.vus_baseline"),
    ("LOAD_VUS_HIGH", "load.vus_high"),
    ("LOAD_VUS_SPIKE", "load.vus_spike"),
    ("LOAD_VUS_SOAK", "load.vus_soak"),
    ("LOAD_DURATION_BASELINE", "load.duration_baseline"),
    ("LOAD_DURATION_HIGH", "load.duration_high"),
    ("LOAD_DURATION_SOAK", "load.duration_soak"),
    ("QA_DOCKER_STATS", "infra.docker_stats_enabled"),
    ("QA_DOCKER_STATS_INTERVAL", "infra.interval_secs"),
    ("QA_DOCKER_STATS_SAMPLES", "infra.samples"),
    ("QA_COVERAGE", "coverage.enabled"),
    ("LOG_FORMAT", "logging.format"),
];

/// Scenario names the load engine knows how to build.
pub const KNOWN_SCENARIOS: &[&str] = &["baseline", "high_load", "spike", "soak"];

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QaConfig {
    /// Target services keyed by short name (`poi`, `asset`, ...).
    pub services: BTreeMap<String, ServiceTarget>,

    pub http: HttpConfig,

    pub readiness: ReadinessConfig,

    pub e2e: E2eConfig,

    pub slo: SloConfig,

    pub load: LoadConfig,

    pub environment: EnvironmentConfig,

    pub lint: LintConfig,

    pub unit: UnitConfig,

    pub coverage: CoverageConfig,

    pub infra: InfraConfig,

    pub phases: PhaseTimeoutConfig,

    pub report: ReportConfig,

    pub logging: LoggingConfig,
}

impl Default for QaConfig {
    fn default() -> Self {
        let services = [
            ("poi", 8001),
            ("asset", 8002),
            ("script", 8003),
            ("transcription", 8004),
            ("render", 8005),
        ]
        .into_iter()
        .map(|(name, port)| {
            (
                name.to_string(),
                ServiceTarget {
                    base_url: format!("http://localhost:{port}"),
                    source_dir: format!("services/{name}-service"),
                },
            )
        })
        .collect();

        Self {
            services,
            http: HttpConfig::default(),
            readiness: ReadinessConfig::default(),
            e2e: E2eConfig::default(),
            slo: SloConfig::default(),
            load: LoadConfig::default(),
            environment: EnvironmentConfig::default(),
            lint: LintConfig::default(),
            unit: UnitConfig::default(),
            coverage: CoverageConfig::default(),
            infra: InfraConfig::default(),
            phases: PhaseTimeoutConfig::default(),
            report: ReportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl QaConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Flat legacy environment names (highest priority)
    /// 2. `QA_`-prefixed environment variables
    /// 3. Config file given explicitly, else the one named by `QA_CONFIG`
    /// 4. ./config/qa.{toml,yaml,json}
    /// 5. Hardcoded defaults (lowest priority)
    pub fn load(explicit_file: Option<&Path>) -> QaResult<Self> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        builder = builder.add_source(File::with_name("./config/qa").required(false));

        match explicit_file {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                if let Ok(config_path) = std::env::var("QA_CONFIG") {
                    builder = builder.add_source(File::with_name(&config_path).required(false));
                }
            }
        }

        // Example: QA_SLO__READ_P95_MS=400
        builder = builder.add_source(
            Environment::with_prefix("QA")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("load.scenarios")
                .try_parsing(true),
        );

        for (var, key) in LEGACY_ENV_ALIASES {
            builder = builder.set_override_option(*key, std::env::var(var).ok())?;
        }

        let config: QaConfig = builder.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Seed the builder with the serialized [`Default`] value so that
    /// partial overrides of nested maps keep their sibling entries.
    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Ok(builder.add_source(Config::try_from(&Self::default())?))
    }

    /// Load configuration from a specific file path, without environment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> QaResult<Self> {
        let config: QaConfig = Self::set_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> QaResult<()> {
        if self.services.is_empty() {
            return Err(QaError::validation("at least one target service is required"));
        }

        for (name, service) in &self.services {
            if !service.base_url.starts_with("http://") && !service.base_url.starts_with("https://")
            {
                return Err(QaError::validation(format!(
                    "services.{name}.base_url must be an http(s) URL, got `{}`",
                    service.base_url
                )));
            }
        }

        if self.http.request_timeout_secs <= 0.0 {
            return Err(QaError::validation("http.request_timeout_secs must be > 0"));
        }

        if self.http.success_status_min > self.http.success_status_max {
            return Err(QaError::validation(
                "http.success_status_min must be <= success_status_max",
            ));
        }

        let backoff = &self.readiness.backoff;
        if backoff.initial_interval_ms == 0 || backoff.max_interval_ms < backoff.initial_interval_ms
        {
            return Err(QaError::validation(
                "readiness.backoff intervals must be > 0 and max >= initial",
            ));
        }
        if backoff.multiplier < 1.0 {
            return Err(QaError::validation("readiness.backoff.multiplier must be >= 1.0"));
        }

        if self.e2e.poll_interval_secs <= 0.0 || self.e2e.poll_max_wait_secs <= 0.0 {
            return Err(QaError::validation("e2e poll interval and max wait must be > 0"));
        }

        if self.slo.error_rate_pct < 0.0 || self.slo.read_p95_ms <= 0.0 || self.slo.write_p95_ms <= 0.0
        {
            return Err(QaError::validation("slo thresholds must be positive"));
        }

        self.load.validate()?;

        if self.infra.interval_secs <= 0.0 {
            return Err(QaError::validation("infra.interval_secs must be > 0"));
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(QaError::validation(format!(
                "logging.format must be `text` or `json`, got `{}`",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Base URL of a named service.
    pub fn service_url(&self, name: &str) -> QaResult<&str> {
        self.services
            .get(name)
            .map(|s| s.base_url.trim_end_matches('/'))
            .ok_or_else(|| QaError::validation(format!("unknown service `{name}`")))
    }

    /// Directory where artifacts of this run are written.
    pub fn artifacts_dir(&self) -> PathBuf {
        PathBuf::from(&self.report.artifacts_dir)
    }
}

/// One target service of the platform under test
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceTarget {
    /// Base URL, e.g. `http://localhost:8001`
    pub base_url: String,

    /// Source directory relative to the project root (lint/unit phases)
    pub source_dir: String,
}

/// Outbound HTTP settings shared by every component
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// API key injected on every request
    pub api_key: String,

    /// Header carrying the API key
    pub api_key_header: String,

    /// Bounded per-request timeout in seconds
    pub request_timeout_secs: f64,

    /// Lowest status code counted as success
    pub success_status_min: u16,

    /// Highest status code counted as success
    pub success_status_max: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            api_key: "dev-api-key".to_string(),
            api_key_header: "X-API-Key".to_string(),
            request_timeout_secs: 15.0,
            success_status_min: 200,
            success_status_max: 399,
        }
    }
}

impl HttpConfig {
    /// Per-request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs)
    }
}

/// Readiness probing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Path of the readiness probe on every service
    pub path: String,

    /// Status code that designates "ready"
    pub ready_status: u16,

    /// Global deadline in seconds
    pub timeout_secs: f64,

    pub backoff: BackoffConfig,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            path: "/readyz".to_string(),
            ready_status: 200,
            timeout_secs: 120.0,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ReadinessConfig {
    /// Global deadline as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackoffConfig {
    /// Initial interval in milliseconds
    pub initial_interval_ms: u64,

    /// Maximum interval in milliseconds
    pub max_interval_ms: u64,

    /// Multiplicative growth per attempt
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 2000,
            max_interval_ms: 10_000,
            multiplier: 1.5,
        }
    }
}

impl BackoffConfig {
    /// Get initial interval
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    /// Get maximum interval
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    /// Calculate the wait after a given zero-based failed attempt
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = (self.initial_interval_ms as f64 * self.multiplier.powi(exponent))
            .min(self.max_interval_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Workflow executor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct E2eConfig {
    /// Fixed interval between poll attempts in seconds
    pub poll_interval_secs: f64,

    /// Upper bound on total poll time in seconds; with the interval it
    /// determines the default attempt budget
    pub poll_max_wait_secs: f64,
}

impl Default for E2eConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2.0,
            poll_max_wait_secs: 120.0,
        }
    }
}

impl E2eConfig {
    /// Interval between poll attempts
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    /// Attempt budget derived from max wait and interval (at least 1)
    pub fn poll_max_attempts(&self) -> u32 {
        let attempts = (self.poll_max_wait_secs / self.poll_interval_secs).ceil();
        (attempts as u32).max(1)
    }
}

/// Service-level objective thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SloConfig {
    /// Read latency p95 upper bound (exclusive) in milliseconds
    pub read_p95_ms: f64,

    /// Write latency p95 upper bound (exclusive) in milliseconds
    pub write_p95_ms: f64,

    /// Aggregate error rate upper bound (exclusive) in percent
    pub error_rate_pct: f64,

    /// Maximum tolerated infrastructure restarts (inclusive)
    pub max_restarts: u32,
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            read_p95_ms: 500.0,
            write_p95_ms: 1500.0,
            error_rate_pct: 1.0,
            max_restarts: 0,
        }
    }
}

/// Load generation sizing and behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Scenarios to run, in start order
    pub scenarios: Vec<String>,

    pub vus_baseline: usize,
    pub vus_high: usize,
    pub vus_spike: usize,
    pub vus_soak: usize,

    /// Durations accept `ms`/`s`/`m`/`h` suffixes
    pub duration_baseline: String,
    pub duration_high: String,
    pub duration_soak: String,

    /// Hold time at peak for the spike scenario
    pub duration_spike: String,

    /// Ramp up/down length for ramping scenarios
    pub ramp_duration: String,

    /// Explicit start offsets per scenario. Scenarios without one start
    /// when the previous scenario's schedule ends.
    pub start_offsets: BTreeMap<String, String>,

    /// Percentage of read operations per scenario name
    pub read_split_pct: BTreeMap<String, u32>,

    /// Weights within the read category, summing to 100
    pub read_weights: BTreeMap<String, u32>,

    /// Weights within the write category, summing to 100
    pub write_weights: BTreeMap<String, u32>,

    /// Entities synthesized before the first scenario starts
    pub seed_entities: usize,

    /// Capacity of the shared target cache
    pub target_cache_capacity: usize,

    /// Randomized pause between iterations
    pub think_time_min_ms: u64,
    pub think_time_max_ms: u64,

    /// Absolute latency ceiling; responses slower than this are timeouts.
    /// Defaults to the request timeout when unset.
    pub latency_ceiling_ms: Option<u64>,

    /// Population controller tick
    pub control_interval_ms: u64,

    /// Progress log interval
    pub progress_interval_secs: u64,

    /// Fixed RNG seed for reproducible traffic mixes
    pub seed: Option<u64>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        let split = |pairs: &[(&str, u32)]| -> BTreeMap<String, u32> {
            pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
        };

        Self {
            scenarios: vec![
                "baseline".to_string(),
                "high_load".to_string(),
                "spike".to_string(),
            ],
            vus_baseline: 10,
            vus_high: 200,
            vus_spike: 1000,
            vus_soak: 100,
            duration_baseline: "1m".to_string(),
            duration_high: "3m".to_string(),
            duration_soak: "10m".to_string(),
            duration_spike: "1m".to_string(),
            ramp_duration: "30s".to_string(),
            start_offsets: BTreeMap::new(),
            read_split_pct: split(&[
                ("baseline", 80),
                ("soak", 80),
                ("high_load", 90),
                ("spike", 90),
            ]),
            read_weights: split(&[
                ("list_pois", 35),
                ("list_assets", 25),
                ("list_scripts", 15),
                ("list_renders", 10),
                ("health", 15),
            ]),
            write_weights: split(&[("create_poi", 60), ("create_asset", 25), ("update_poi", 15)]),
            seed_entities: 5,
            target_cache_capacity: 500,
            think_time_min_ms: 100,
            think_time_max_ms: 500,
            latency_ceiling_ms: None,
            control_interval_ms: 250,
            progress_interval_secs: 10,
            seed: None,
        }
    }
}

impl LoadConfig {
    /// Validate sizing, weights and durations
    pub fn validate(&self) -> QaResult<()> {
        for name in &self.scenarios {
            if !KNOWN_SCENARIOS.contains(&name.as_str()) {
                return Err(QaError::validation(format!(
                    "load.scenarios: unknown scenario `{name}` (known: {})",
                    KNOWN_SCENARIOS.join(", ")
                )));
            }
            let read_pct = self.read_split_pct.get(name).copied().unwrap_or(80);
            if read_pct > 100 {
                return Err(QaError::validation(format!(
                    "load.read_split_pct.{name} must be <= 100"
                )));
            }
        }

        for (label, weights) in [("read_weights", &self.read_weights), ("write_weights", &self.write_weights)] {
            let total: u64 = weights.values().map(|w| u64::from(*w)).sum();
            if total != 100 {
                return Err(QaError::validation(format!(
                    "load.{label} must sum to 100, got {total}"
                )));
            }
        }

        for raw in [
            &self.duration_baseline,
            &self.duration_high,
            &self.duration_soak,
            &self.duration_spike,
            &self.ramp_duration,
        ]
        .into_iter()
        .chain(self.start_offsets.values())
        {
            parse_duration(raw)?;
        }

        if self.think_time_min_ms > self.think_time_max_ms {
            return Err(QaError::validation(
                "load.think_time_min_ms must be <= think_time_max_ms",
            ));
        }

        if self.target_cache_capacity == 0 {
            return Err(QaError::validation("load.target_cache_capacity must be > 0"));
        }

        if self.control_interval_ms == 0 {
            return Err(QaError::validation("load.control_interval_ms must be > 0"));
        }

        Ok(())
    }

    /// Read percentage configured for a scenario
    pub fn read_pct_for(&self, scenario: &str) -> u32 {
        self.read_split_pct.get(scenario).copied().unwrap_or(80)
    }

    /// Think time bounds
    pub fn think_time(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.think_time_min_ms),
            Duration::from_millis(self.think_time_max_ms),
        )
    }
}

/// Externally managed environment (compose stack)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Project root used as working directory for external commands
    pub project_root: String,

    /// Compose file, relative to the project root
    pub compose_file: String,

    /// Tear the stack down after the run when this run started it
    pub teardown: bool,

    pub startup_timeout_secs: u64,

    pub teardown_timeout_secs: u64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            project_root: ".".to_string(),
            compose_file: "docker-compose.yml".to_string(),
            teardown: false,
            startup_timeout_secs: 600,
            teardown_timeout_secs: 120,
        }
    }
}

impl EnvironmentConfig {
    /// Absolute-or-relative path to the compose file
    pub fn compose_path(&self) -> PathBuf {
        Path::new(&self.project_root).join(&self.compose_file)
    }
}

/// An external command template
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandSpec {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Skip the command for a target lacking this relative path
    #[serde(default)]
    pub requires: Option<String>,
}

/// Lint / format / type-check phase
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LintConfig {
    /// Tools run in every target directory, keyed by tool name
    pub tools: BTreeMap<String, CommandSpec>,

    /// Extra directories (shared libraries) linted besides service sources
    pub extra_targets: Vec<String>,

    /// Per-command timeout
    pub timeout_secs: u64,
}

impl Default for LintConfig {
    fn default() -> Self {
        let mut tools = BTreeMap::new();
        tools.insert(
            "ruff".to_string(),
            CommandSpec {
                program: "ruff".to_string(),
                args: vec!["check".to_string(), ".".to_string()],
                requires: None,
            },
        );
        tools.insert(
            "black".to_string(),
            CommandSpec {
                program: "black".to_string(),
                args: vec!["--check".to_string(), ".".to_string()],
                requires: None,
            },
        );
        tools.insert(
            "mypy".to_string(),
            CommandSpec {
                program: "mypy".to_string(),
                args: vec![
                    "app/".to_string(),
                    "--ignore-missing-imports".to_string(),
                    "--no-error-summary".to_string(),
                ],
                requires: Some("app".to_string()),
            },
        );

        Self {
            tools,
            extra_targets: vec!["libs/contracts".to_string(), "libs/common".to_string()],
            timeout_secs: 120,
        }
    }
}

/// Unit test phase (one external suite per target service)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UnitConfig {
    /// Command run inside each service's source directory. Arguments may
    /// use `{service}`, `{service_dir}` and `{junit_path}` placeholders.
    pub command: CommandSpec,

    /// Extra environment for every suite; values take the same placeholders
    pub env: BTreeMap<String, String>,

    pub timeout_secs: u64,
}

impl Default for UnitConfig {
    fn default() -> Self {
        let env = [
            ("POSTGRES_HOST", ""),
            ("POSTGRES_DB", ""),
            ("API_KEY", "test-key"),
            ("LOG_FORMAT", "text"),
            ("RUNWAY_MODE", "stub"),
            ("NLP_PROVIDER", "stub"),
            ("ELEVENLABS_MODE", "stub"),
            ("PYTHONPATH", "{service_dir}"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            command: CommandSpec {
                program: "python".to_string(),
                args: vec![
                    "-m".to_string(),
                    "pytest".to_string(),
                    "tests/".to_string(),
                    "-v".to_string(),
                    "--tb=short".to_string(),
                    "--junitxml={junit_path}".to_string(),
                ],
                requires: None,
            },
            env,
            timeout_secs: 300,
        }
    }
}

/// Coverage collection toggle
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoverageConfig {
    pub enabled: bool,

    /// Arguments appended to the unit command; `{coverage_path}` is expanded
    pub args: Vec<String>,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            args: vec![
                "--cov=app".to_string(),
                "--cov-report=xml:{coverage_path}".to_string(),
                "--cov-report=term-missing:skip-covered".to_string(),
            ],
        }
    }
}

/// Infrastructure statistics sampling
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InfraConfig {
    /// Sample container CPU/memory during the load phase
    pub docker_stats_enabled: bool,

    pub interval_secs: f64,

    /// Upper bound on samples taken
    pub samples: usize,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            docker_stats_enabled: true,
            interval_secs: 5.0,
            samples: 6,
        }
    }
}

impl InfraConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }
}

/// Bounded timeout per phase, in seconds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PhaseTimeoutConfig {
    pub readiness_secs: u64,
    pub lint_secs: u64,
    pub unit_secs: u64,
    pub e2e_secs: u64,
    pub load_secs: u64,
    pub infra_secs: u64,
}

impl Default for PhaseTimeoutConfig {
    fn default() -> Self {
        Self {
            readiness_secs: 180,
            lint_secs: 900,
            unit_secs: 900,
            e2e_secs: 900,
            load_secs: 1800,
            infra_secs: 60,
        }
    }
}

/// Report generation
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportConfig {
    pub artifacts_dir: String,

    /// Length of the slowest-operations ranking
    pub top_n: usize,

    /// Throughput below which a scaling recommendation is emitted
    pub min_throughput_rps: f64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: "artifacts/qa".to_string(),
            top_n: 5,
            min_throughput_rps: 50.0,
        }
    }
}

/// Logging output
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `text` or `json`
    pub format: String,

    /// Default filter when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            filter: "info,qa=debug".to_string(),
        }
    }
}

/// Parse a human duration: `250ms`, `30s`, `1m`, `2h` or bare seconds.
pub fn parse_duration(raw: &str) -> QaResult<Duration> {
    let raw = raw.trim();
    let invalid = || QaError::validation(format!("invalid duration `{raw}`"));

    let (number, unit_ms) = if let Some(n) = raw.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = raw.strip_suffix('s') {
        (n, 1_000.0)
    } else if let Some(n) = raw.strip_suffix('m') {
        (n, 60_000.0)
    } else if let Some(n) = raw.strip_suffix('h') {
        (n, 3_600_000.0)
    } else {
        (raw, 1_000.0)
    };

    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    Ok(Duration::from_millis((value * unit_ms).round() as u64))
}
