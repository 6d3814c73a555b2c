//! `qa-run`: the quality pipeline runner.
//!
//! Waits for the services to become ready, runs the external lint and unit
//! suites, the workflow scenario and the load plan, samples container
//! health, then evaluates the service-level objectives and writes the
//! report artifacts.

pub mod artifacts;
pub mod environment;
pub mod external;
pub mod infra;
pub mod mode;
pub mod orchestrator;
pub mod readiness;
pub mod telemetry;

pub use artifacts::ArtifactWriter;
pub use environment::{ComposeStack, TeardownGuard};
pub use external::{CommandOutput, Invocation, Shell, SuiteResult, SystemShell};
pub use mode::RunMode;
pub use orchestrator::{Collaborators, Orchestrator, RunOptions, RunOutcome, EXIT_FAIL, EXIT_FATAL, EXIT_PASS};
pub use readiness::{Endpoint, ReadinessProber, ReadinessReport};
