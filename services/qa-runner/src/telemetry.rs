//! Logging setup for the runner.
//!
//! `RUST_LOG` wins over the configured filter. The output is either the
//! human `fmt` layer or one JSON object per line, selected by
//! `logging.format`.

use qa_core::config::LoggingConfig;
use qa_core::{QaError, QaResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> QaResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| QaError::validation(format!("invalid logging.filter `{}`: {e}", config.filter)))?;

    let fmt_layer = match config.format.as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stderr)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| QaError::internal(format!("failed to install logging: {e}")))?;

    Ok(())
}
