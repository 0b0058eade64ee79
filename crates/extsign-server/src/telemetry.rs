//! Tracing subscriber setup
//!
//! Logs go to stderr. `RUST_LOG` wins over the configured level.

use thiserror::Error;
use tracing::info;
use tracing_subscriber::{
    Registry, filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::LoggingConfig;

/// Telemetry setup errors
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Invalid filter directive
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// A global subscriber is already installed
    #[error("Tracing initialization failed: {0}")]
    TracingError(String),
}

/// Install the global tracing subscriber
///
/// # Errors
///
/// Returns an error for an invalid level directive or if a subscriber is
/// already installed.
pub fn init(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| TelemetryError::InvalidLevel(e.to_string()))?;

    if config.json {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .json();
        Registry::default()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::TracingError(e.to_string()))?;
    } else {
        let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
        Registry::default()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::TracingError(e.to_string()))?;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        json_logs = config.json,
        "extsign telemetry initialized"
    );
    Ok(())
}
