//! External tools: the command seam, lint checks and unit test suites.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use qa_core::config::CommandSpec;
use qa_core::phase::names;
use qa_core::{PhaseResult, QaConfig, QaError, QaResult};
use serde::Serialize;
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Characters of output kept in results.
const OUTPUT_TAIL: usize = 300;

/// Lint failures listed in phase details.
const MAX_LISTED_ERRORS: usize = 10;

/// One external command to run.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.into(),
            env: BTreeMap::new(),
            timeout,
        }
    }

    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// `program arg arg ...`, for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What a finished command produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last characters of stdout and stderr, for diagnostics.
    pub fn tail(&self, max_chars: usize) -> String {
        let combined = match (self.stdout.trim(), self.stderr.trim()) {
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{out}\n{err}"),
        };
        tail_chars(&combined, max_chars)
    }
}

fn tail_chars(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

/// Runs external commands. [`SystemShell`] spawns real processes; tests
/// substitute scripted shells.
#[async_trait]
pub trait Shell: Send + Sync {
    /// Run to completion. A non-zero exit is a normal output; spawn
    /// failures and timeouts are errors.
    async fn run(&self, invocation: Invocation) -> QaResult<CommandOutput>;
}

/// Spawns processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShell;

#[async_trait]
impl Shell for SystemShell {
    async fn run(&self, invocation: Invocation) -> QaResult<CommandOutput> {
        debug!(command = %invocation.display(), cwd = %invocation.cwd.display(), "spawning");

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = command
            .spawn()
            .map_err(|e| QaError::command(&invocation.program, format!("spawn failed: {e}")))?;
        let output = tokio::time::timeout(invocation.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                QaError::command(
                    &invocation.program,
                    format!("timed out after {}s", invocation.timeout.as_secs()),
                )
            })?
            .map_err(|e| QaError::command(&invocation.program, e.to_string()))?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        })
    }
}

/// Directories linted: every service source plus the extra targets that
/// exist on disk.
fn lint_targets(config: &QaConfig) -> Vec<(String, PathBuf)> {
    let root = Path::new(&config.environment.project_root);
    let services = config
        .services
        .values()
        .map(|service| (service.source_dir.clone(), root.join(&service.source_dir)));
    let extras = config
        .lint
        .extra_targets
        .iter()
        .map(|target| (target.clone(), root.join(target)))
        .filter(|(_, dir)| dir.is_dir());
    services.chain(extras).collect()
}

/// Run every configured lint tool in every target directory.
pub async fn run_lint(shell: &dyn Shell, config: &QaConfig) -> PhaseResult {
    let started = Instant::now();
    let timeout = Duration::from_secs(config.lint.timeout_secs);
    let mut errors = Vec::new();
    let mut commands = 0usize;

    for (label, dir) in lint_targets(config) {
        for (tool, spec) in &config.lint.tools {
            if spec.requires.as_ref().is_some_and(|rel| !dir.join(rel).exists()) {
                debug!(target_dir = %label, tool = %tool, "required path missing, skipping tool");
                continue;
            }
            commands += 1;
            let invocation = Invocation::new(&spec.program, spec.args.clone(), &dir, timeout);
            match shell.run(invocation).await {
                Ok(output) if output.success() => {}
                Ok(output) => errors.push(format!("{label}/{tool}: {}", output.tail(200))),
                Err(e) => errors.push(format!("{label}/{tool}: {e}")),
            }
        }
    }

    let elapsed = started.elapsed();
    let tools = config.lint.tools.keys().cloned().collect::<Vec<_>>().join(" + ");
    if errors.is_empty() {
        info!(commands, "lint clean");
        return PhaseResult::pass(names::LINT, elapsed, format!("{tools} OK"))
            .with_details(json!({ "commands": commands }));
    }

    warn!(errors = errors.len(), "lint errors");
    PhaseResult::fail(names::LINT, elapsed, format!("{} lint error(s)", errors.len())).with_details(json!({
        "commands": commands,
        "errors": errors.iter().take(MAX_LISTED_ERRORS).collect::<Vec<_>>(),
    }))
}

/// Test counts read from a JUnit XML file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JunitCounts {
    pub tests: u64,
    pub passed: u64,
    pub failures: u64,
    pub errors: u64,
    pub skipped: u64,
}

impl JunitCounts {
    fn add(&mut self, other: JunitCounts) {
        self.tests += other.tests;
        self.passed += other.passed;
        self.failures += other.failures;
        self.errors += other.errors;
        self.skipped += other.skipped;
    }
}

/// Sum the counters of every `<testsuite>` element. Handles both a
/// `<testsuites>` wrapper and a bare `<testsuite>` root.
pub fn parse_junit(xml: &str) -> JunitCounts {
    let mut counts = JunitCounts::default();
    let mut rest = xml;
    while let Some(start) = rest.find("<testsuite") {
        rest = &rest[start + "<testsuite".len()..];
        if rest.starts_with('s') {
            continue;
        }
        let tag = &rest[..rest.find('>').unwrap_or(rest.len())];
        let attr = |name: &str| attribute(tag, name).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        let tests = attr("tests");
        let failures = attr("failures");
        let errors = attr("errors");
        let skipped = attr("skipped");
        counts.tests += tests;
        counts.failures += failures;
        counts.errors += errors;
        counts.skipped += skipped;
        counts.passed += tests.saturating_sub(failures + errors + skipped);
    }
    counts
}

/// Value of `name="..."` or `name='...'` in a start tag.
fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{name}=");
    let mut from = 0;
    while let Some(pos) = tag[from..].find(&needle) {
        let at = from + pos;
        from = at + needle.len();
        if !tag[..at].ends_with(char::is_whitespace) {
            continue;
        }
        let value = &tag[from..];
        let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let value = &value[1..];
        let len = value.find(quote)?;
        return Some(&value[..len]);
    }
    None
}

/// Outcome of one service's unit suite; written as `test-results-<service>.json`.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteResult {
    pub service: String,
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub junit_path: PathBuf,
    pub counts: Option<JunitCounts>,
    pub output_tail: String,
}

fn expand(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter()
        .fold(template.to_string(), |acc, (name, value)| acc.replace(&format!("{{{name}}}"), value))
}

/// Command for one service's suite, with coverage flags when enabled.
pub fn unit_invocation(config: &QaConfig, service: &str, artifacts_dir: &Path) -> QaResult<Invocation> {
    let target = config
        .services
        .get(service)
        .ok_or_else(|| QaError::validation(format!("unknown service `{service}`")))?;
    let service_dir = Path::new(&config.environment.project_root).join(&target.source_dir);
    let vars = [
        ("service", service.to_string()),
        ("service_dir", service_dir.display().to_string()),
        ("junit_path", artifacts_dir.join(format!("junit-{service}.xml")).display().to_string()),
        (
            "coverage_path",
            artifacts_dir.join(format!("coverage-{service}.xml")).display().to_string(),
        ),
    ];

    let CommandSpec { program, args, .. } = &config.unit.command;
    let mut args: Vec<String> = args.iter().map(|arg| expand(arg, &vars)).collect();
    if config.coverage.enabled {
        args.extend(config.coverage.args.iter().map(|arg| expand(arg, &vars)));
    }
    let env = config
        .unit
        .env
        .iter()
        .map(|(key, value)| (key.clone(), expand(value, &vars)))
        .collect();

    Ok(Invocation::new(program, args, service_dir, Duration::from_secs(config.unit.timeout_secs)).with_env(env))
}

async fn run_suite(shell: &dyn Shell, config: &QaConfig, service: &str, artifacts_dir: &Path) -> SuiteResult {
    let junit_path = artifacts_dir.join(format!("junit-{service}.xml"));
    let started = Instant::now();
    let outcome = match unit_invocation(config, service, artifacts_dir) {
        Ok(invocation) => shell.run(invocation).await,
        Err(e) => Err(e),
    };
    let counts = tokio::fs::read_to_string(&junit_path).await.ok().map(|xml| parse_junit(&xml));

    let (passed, exit_code, output_tail) = match outcome {
        Ok(output) => (output.success(), output.exit_code, output.tail(OUTPUT_TAIL)),
        Err(e) => (false, None, e.to_string()),
    };
    if passed {
        info!(service, "unit suite passed");
    } else {
        warn!(service, exit_code, "unit suite failed");
    }

    SuiteResult {
        service: service.to_string(),
        passed,
        exit_code,
        duration_ms: started.elapsed().as_millis() as u64,
        junit_path,
        counts,
        output_tail,
    }
}

/// Run every service's unit suite in parallel.
pub async fn run_unit_tests(shell: &dyn Shell, config: &QaConfig, artifacts_dir: &Path) -> (PhaseResult, Vec<SuiteResult>) {
    let started = Instant::now();
    if let Err(e) = tokio::fs::create_dir_all(artifacts_dir).await {
        let phase = PhaseResult::fail(
            names::UNIT_TESTS,
            started.elapsed(),
            format!("cannot create {}: {e}", artifacts_dir.display()),
        );
        return (phase, Vec::new());
    }

    let suites = join_all(
        config
            .services
            .keys()
            .map(|service| run_suite(shell, config, service, artifacts_dir)),
    )
    .await;

    let mut totals = JunitCounts::default();
    for counts in suites.iter().filter_map(|s| s.counts) {
        totals.add(counts);
    }
    let passed = suites.iter().filter(|s| s.passed).count();
    let message = format!(
        "{passed}/{} services passed, {} tests ({} pass, {} fail)",
        suites.len(),
        totals.tests,
        totals.passed,
        totals.failures + totals.errors
    );
    let failures: Vec<String> = suites
        .iter()
        .filter(|s| !s.passed)
        .map(|s| format!("{}: {}", s.service, s.output_tail))
        .collect();
    let details = json!({ "totals": totals, "failures": failures });

    let phase = if failures.is_empty() {
        PhaseResult::pass(names::UNIT_TESTS, started.elapsed(), message)
    } else {
        PhaseResult::fail(names::UNIT_TESTS, started.elapsed(), message)
    };
    (phase.with_details(details), suites)
}
