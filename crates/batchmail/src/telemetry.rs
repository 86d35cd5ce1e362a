//! Process-wide logging setup.
//!
//! Library code logs through the `log` macros and opens `tracing` spans around
//! network work. [`init_logging`] installs one subscriber for both.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Logging is already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Builds the filter from `RUST_LOG`, falling back to `default_filter`.
pub fn env_filter(default_filter: &str) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_filter).map_err(|e| TelemetryError::InvalidFilter {
            filter: default_filter.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Installs the global subscriber and routes `log` records into it.
///
/// Fails if called twice in the same process.
pub fn init_logging(default_filter: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let filter = env_filter(default_filter)?;

    let result = match format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            Registry::default()
                .with(filter)
                .with(fmt::layer().with_target(true)),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            Registry::default().with(filter).with(fmt::layer().json()),
        ),
    };
    result.map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    log::debug!("Logging initialized");
    Ok(())
}
