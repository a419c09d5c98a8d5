//! Infrastructure error type
//!
//! Everything the adapters in this crate can fail with, folded into a
//! single [`InfraError`] so binaries only need one `?`-compatible type.

use std::path::PathBuf;
use std::time::Duration;

use ratekeeper_common::error::{ConfigError, ErrorClassification, ErrorSeverity};
use thiserror::Error;

use crate::scheduling::SchedulerError;

/// Result alias for infrastructure operations.
pub type InfraResult<T> = Result<T, InfraError>;

/// Errors raised while loading configuration, starting the scheduler, or
/// installing the log subscriber.
#[derive(Debug, Error)]
pub enum InfraError {
    /// Configuration could not be found, read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration parsed but describes an invalid policy or pool.
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    /// Reading a file failed.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The global tracing subscriber could not be installed.
    #[error("logging initialisation failed: {0}")]
    Logging(String),

    /// The retry scheduler could not be built or stopped.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl InfraError {
    /// Shorthand for [`InfraError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl ErrorClassification for InfraError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Scheduler(SchedulerError::Timeout { .. }))
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Scheduler(SchedulerError::Timeout { .. }) | Self::Logging(_) => {
                ErrorSeverity::Warning
            }
            _ => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::Scheduler(SchedulerError::CreationFailed(_)))
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}
