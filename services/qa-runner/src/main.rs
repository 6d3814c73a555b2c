use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use qa_core::render::render_console;
use qa_core::QaConfig;
use qa_runner::{telemetry, Collaborators, Orchestrator, RunMode, RunOptions, EXIT_FATAL};
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "qa-run")]
#[command(about = "Quality gate pipeline: readiness, lint, unit, workflow and load tests", long_about = None)]
#[command(version)]
#[command(group(ArgGroup::new("mode").args(["fast", "e2e_only", "load_only"])))]
struct Cli {
    /// Start the compose stack before any phase
    #[arg(long)]
    compose: bool,

    /// Tear the compose stack down after the run
    #[arg(long)]
    teardown: bool,

    /// Lint and unit tests only
    #[arg(long)]
    fast: bool,

    /// Workflow tests only (services must be running)
    #[arg(long)]
    e2e_only: bool,

    /// Load tests only (services must be running)
    #[arg(long)]
    load_only: bool,

    /// Configuration file (defaults to ./config/qa.{toml,yaml,json})
    #[arg(long, env = "QA_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for report artifacts
    #[arg(long, env = "QA_ARTIFACTS_DIR")]
    artifacts_dir: Option<PathBuf>,

    /// Fixed RNG seed for reproducible load traffic
    #[arg(long, env = "QA_LOAD_SEED")]
    seed: Option<u64>,

    /// Load scenarios to run, comma separated
    #[arg(long, value_delimiter = ',')]
    scenarios: Vec<String>,

    /// Do not draw the progress spinner
    #[arg(long)]
    no_progress: bool,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.fast {
            RunMode::Fast
        } else if self.e2e_only {
            RunMode::E2eOnly
        } else if self.load_only {
            RunMode::LoadOnly
        } else {
            RunMode::Full
        }
    }

    /// Command-line values override every configuration source.
    fn apply(&self, config: &mut QaConfig) {
        if let Some(dir) = &self.artifacts_dir {
            config.report.artifacts_dir = dir.display().to_string();
        }
        if self.seed.is_some() {
            config.load.seed = self.seed;
        }
        if !self.scenarios.is_empty() {
            config.load.scenarios = self.scenarios.clone();
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("❌ qa-run: {err:#}");
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = QaConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);
    config
        .validate()
        .context("invalid configuration after command-line overrides")?;

    telemetry::init_logging(&config.logging).context("failed to initialize logging")?;

    let options = RunOptions {
        mode: cli.mode(),
        compose: cli.compose,
        teardown: cli.teardown,
        show_progress: !cli.no_progress,
    };
    let deps = Collaborators::live(&config).context("failed to build HTTP client")?;
    let orchestrator = Orchestrator::new(Arc::new(config), options, deps);

    let outcome = match orchestrator.run().await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %err, "run aborted");
            return Err(anyhow::Error::new(err).context("quality pipeline aborted"));
        }
    };

    println!("{}", render_console(&outcome.report));
    for path in &outcome.artifacts {
        println!("  artifact: {}", path.display());
    }
    Ok(outcome.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_are_mutually_exclusive() {
        assert!(Cli::try_parse_from(["qa-run", "--fast", "--e2e-only"]).is_err());
        assert!(Cli::try_parse_from(["qa-run", "--load-only", "--e2e-only"]).is_err());

        let cli = Cli::try_parse_from(["qa-run", "--compose", "--teardown", "--load-only"]).unwrap();
        assert_eq!(cli.mode(), RunMode::LoadOnly);
        assert!(cli.compose && cli.teardown);

        let cli = Cli::try_parse_from(["qa-run"]).unwrap();
        assert_eq!(cli.mode(), RunMode::Full);
    }

    #[test]
    fn overrides_apply_to_config() {
        let cli = Cli::try_parse_from([
            "qa-run",
            "--artifacts-dir",
            "/tmp/qa-out",
            "--seed",
            "42",
            "--scenarios",
            "baseline,soak",
        ])
        .unwrap();
        let mut config = QaConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.report.artifacts_dir, "/tmp/qa-out");
        assert_eq!(config.load.seed, Some(42));
        assert_eq!(config.load.scenarios, vec!["baseline", "soak"]);
        assert!(config.validate().is_ok());
    }
}
