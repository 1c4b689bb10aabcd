//! Logging setup for the CLI.

use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::TelemetryConfig;

/// Directive variable; overrides the configured level when set.
pub const LOG_ENV: &str = "AF_LOG";

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("invalid log filter '{value}': {source}")]
    Filter {
        value: String,
        #[source]
        source: ParseError,
    },

    #[error("logging already initialised: {0}")]
    Init(#[from] TryInitError),
}

/// The filter for `AF_LOG` if given, else the configured level.
fn filter(config: &TelemetryConfig, directive: Option<String>) -> Result<EnvFilter, TelemetryError> {
    let value = directive.unwrap_or_else(|| config.log_level.clone());
    EnvFilter::try_new(&value).map_err(|source| TelemetryError::Filter { value, source })
}

/// Install the global subscriber: one compact fmt layer to stderr.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = filter(config, std::env::var(LOG_ENV).ok())?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}
