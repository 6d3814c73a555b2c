//! The compose stack hosting the services under test.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use qa_core::config::EnvironmentConfig;
use qa_core::phase::names;
use qa_core::{PhaseResult, QaError, QaResult};
use tracing::{error, info, warn};

use crate::external::{Invocation, Shell};

/// Drives `docker compose` for one compose file.
#[derive(Clone)]
pub struct ComposeStack {
    shell: Arc<dyn Shell>,
    project_root: PathBuf,
    compose_file: PathBuf,
    startup_timeout: Duration,
    teardown_timeout: Duration,
}

impl ComposeStack {
    pub fn new(shell: Arc<dyn Shell>, config: &EnvironmentConfig) -> Self {
        Self {
            shell,
            project_root: PathBuf::from(&config.project_root),
            compose_file: config.compose_path(),
            startup_timeout: Duration::from_secs(config.startup_timeout_secs),
            teardown_timeout: Duration::from_secs(config.teardown_timeout_secs),
        }
    }

    pub fn shell(&self) -> &Arc<dyn Shell> {
        &self.shell
    }

    pub fn project_root(&self) -> &PathBuf {
        &self.project_root
    }

    /// `docker compose -f <file> <args...>`
    pub fn invocation(&self, args: &[&str], timeout: Duration) -> Invocation {
        let mut full = vec![
            "compose".to_string(),
            "-f".to_string(),
            self.compose_file.display().to_string(),
        ];
        full.extend(args.iter().map(|arg| (*arg).to_string()));
        Invocation::new("docker", full, &self.project_root, timeout)
    }

    /// Build and start the stack, waiting for container health checks.
    /// Any failure is an infrastructure startup error.
    pub async fn up(&self) -> QaResult<PhaseResult> {
        info!(compose_file = %self.compose_file.display(), "starting compose stack");
        let started = Instant::now();
        let invocation = self.invocation(&["up", "-d", "--build", "--wait"], self.startup_timeout);

        let output = self
            .shell
            .run(invocation)
            .await
            .map_err(|e| QaError::InfrastructureStartup(e.to_string()))?;
        if !output.success() {
            return Err(QaError::InfrastructureStartup(format!(
                "docker compose up exited with {:?}: {}",
                output.exit_code,
                output.tail(300)
            )));
        }

        Ok(PhaseResult::pass(names::ENVIRONMENT_UP, started.elapsed(), "Stack started"))
    }

    /// Stop the stack and drop its volumes.
    pub async fn down(&self) -> PhaseResult {
        info!(compose_file = %self.compose_file.display(), "tearing down compose stack");
        let started = Instant::now();
        let invocation = self.invocation(&["down", "-v"], self.teardown_timeout);

        match self.shell.run(invocation).await {
            Ok(output) if output.success() => {
                PhaseResult::pass(names::ENVIRONMENT_DOWN, started.elapsed(), "Stack stopped")
            }
            Ok(output) => PhaseResult::fail(names::ENVIRONMENT_DOWN, started.elapsed(), output.tail(200)),
            Err(e) => PhaseResult::fail(names::ENVIRONMENT_DOWN, started.elapsed(), e.to_string()),
        }
    }

    fn down_blocking(&self) {
        let status = std::process::Command::new("docker")
            .args(["compose", "-f"])
            .arg(&self.compose_file)
            .args(["down", "-v"])
            .current_dir(&self.project_root)
            .status();
        match status {
            Ok(status) if status.success() => info!("stack stopped"),
            Ok(status) => error!(%status, "docker compose down failed"),
            Err(e) => error!(error = %e, "docker compose down could not be spawned"),
        }
    }
}

/// Owns the obligation to tear the stack down.
///
/// [`TeardownGuard::release`] performs the teardown and reports it as a
/// phase. A guard dropped without release (panic, early return) tears the
/// stack down synchronously.
pub struct TeardownGuard {
    stack: Option<ComposeStack>,
}

impl TeardownGuard {
    pub fn arm(stack: ComposeStack) -> Self {
        Self { stack: Some(stack) }
    }

    pub async fn release(mut self) -> PhaseResult {
        match self.stack.take() {
            Some(stack) => stack.down().await,
            None => PhaseResult::skip(names::ENVIRONMENT_DOWN, "already released"),
        }
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if let Some(stack) = self.stack.take() {
            warn!("run ended without an orderly teardown, stopping stack");
            stack.down_blocking();
        }
    }
}
