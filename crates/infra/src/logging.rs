//! Tracing subscriber initialisation.
//!
//! `RUST_LOG` wins when set; otherwise the configured directive applies.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;
use crate::errors::{InfraError, InfraResult};

/// Install the global `fmt` subscriber described by `settings`.
///
/// # Errors
/// Returns `InfraError::Logging` if the directive does not parse or a global
/// subscriber is already installed.
pub fn init(settings: &LoggingSettings) -> InfraResult<()> {
    let filter = env_filter(settings)?;

    let installed = if settings.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init()
    };

    installed.map_err(|e| InfraError::Logging(e.to_string()))?;
    tracing::debug!(filter = %settings.filter, json = settings.json, "logging initialized");
    Ok(())
}

/// Filter from `RUST_LOG`, falling back to `settings.filter`.
///
/// # Errors
/// Returns `InfraError::Logging` if the fallback directive is malformed.
pub fn env_filter(settings: &LoggingSettings) -> InfraResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&settings.filter)
        .map_err(|e| InfraError::Logging(format!("invalid filter {:?}: {e}", settings.filter)))
}
