//! Engine error taxonomy

use std::time::Duration;

use ratekeeper_common::error::{ErrorClassification, ErrorSeverity};
use thiserror::Error;

use super::ports::ScheduleError;

/// Result type resolved by a [`RetryHandle`](super::RetryHandle).
pub type EngineResult<T, E> = Result<T, EngineError<E>>;

/// Terminal failure of a call made through the retry engine.
///
/// `attempts` always counts operation invocations that actually ran.
#[derive(Debug, Error)]
pub enum EngineError<E> {
    /// The circuit breaker rejected the call; the operation never ran.
    #[error("circuit breaker is open, '{name}' was not attempted")]
    CircuitOpen {
        /// Operation name.
        name: String,
        /// Cooldown remaining when the call was rejected.
        retry_after: Option<Duration>,
    },

    /// The last attempt failed and no further retry was allowed.
    #[error("operation '{name}' failed after {attempts} attempt(s)")]
    Operation {
        /// Operation name.
        name: String,
        /// Attempts made.
        attempts: u32,
        /// Failure reported by the final attempt.
        #[source]
        source: E,
    },

    /// A retry could not be handed to, or was dropped by, the scheduler.
    #[error("retry of '{name}' could not be scheduled after {attempts} attempt(s)")]
    Scheduling {
        /// Operation name.
        name: String,
        /// Attempts made.
        attempts: u32,
        /// Scheduler rejection reason.
        #[source]
        source: ScheduleError,
    },

    /// The operation panicked; the call resolves without further retries.
    #[error("operation '{name}' panicked on attempt {attempts}")]
    OperationPanicked {
        /// Operation name.
        name: String,
        /// Attempts made, counting the one that panicked.
        attempts: u32,
    },

    /// The caller cancelled the call or dropped its handle.
    #[error("operation '{name}' was cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Operation name.
        name: String,
        /// Attempts made.
        attempts: u32,
    },

    /// The next retry would have started after the caller's deadline.
    #[error("operation '{name}' exceeded its {deadline:?} deadline after {attempts} attempt(s)")]
    DeadlineExceeded {
        /// Operation name.
        name: String,
        /// Attempts made.
        attempts: u32,
        /// Deadline requested by the caller.
        deadline: Duration,
    },
}

impl<E> EngineError<E> {
    /// Operation name the failure belongs to.
    pub fn name(&self) -> &str {
        match self {
            Self::CircuitOpen { name, .. }
            | Self::Operation { name, .. }
            | Self::Scheduling { name, .. }
            | Self::OperationPanicked { name, .. }
            | Self::Cancelled { name, .. }
            | Self::DeadlineExceeded { name, .. } => name,
        }
    }

    /// Operation invocations made before the call resolved.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::CircuitOpen { .. } => 0,
            Self::Operation { attempts, .. }
            | Self::Scheduling { attempts, .. }
            | Self::OperationPanicked { attempts, .. }
            | Self::Cancelled { attempts, .. }
            | Self::DeadlineExceeded { attempts, .. } => *attempts,
        }
    }

    /// Whether the breaker rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Whether the caller cancelled the call.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The operation's own failure, if the call ended on one.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Take ownership of the operation's own failure, if any.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl<E> ErrorClassification for EngineError<E> {
    fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } => true,
            Self::Scheduling { source, .. } => source.is_retryable(),
            Self::Operation { .. }
            | Self::OperationPanicked { .. }
            | Self::Cancelled { .. }
            | Self::DeadlineExceeded { .. } => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cancelled { .. } => ErrorSeverity::Info,
            Self::CircuitOpen { .. } | Self::DeadlineExceeded { .. } => ErrorSeverity::Warning,
            Self::Scheduling { source, .. } => source.severity(),
            Self::Operation { .. } | Self::OperationPanicked { .. } => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
