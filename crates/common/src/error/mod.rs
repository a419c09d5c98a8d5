//! Shared error vocabulary for the ratekeeper workspace
//!
//! Every error type that crosses a crate boundary implements
//! [`ErrorClassification`] so callers can make uniform decisions about
//! retrying, alerting and logging without matching on concrete variants.
//!
//! | Level | Use Case | Examples |
//! |-------|----------|----------|
//! | **Info** | Expected conditions | Caller cancelled a call |
//! | **Warning** | Degraded but operational | Circuit open, scheduler saturated, deadline missed |
//! | **Error** | Failure requiring attention | Retries exhausted, operation panicked, scheduler shut down, invalid policy |
//! | **Critical** | System integrity at risk | Not raised by the workspace; left to callers |

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result alias for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration validation error.
///
/// Raised once, at construction time, when a retry policy or breaker
/// configuration violates one of its invariants. Never produced while
/// calls are in flight.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A single field holds a value outside its permitted range.
    #[error("invalid configuration: {field} {message}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Human readable constraint description.
        message: String,
    },
}

impl ConfigError {
    /// Build an [`ConfigError::Invalid`] for `field`.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid { field, message: message.into() }
    }

    /// Name of the field that failed validation.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Invalid { field, .. } => field,
        }
    }
}

impl ErrorClassification for ConfigError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Error
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Trait for classifying errors by their characteristics
///
/// This provides a standard interface for error classification that can be
/// implemented by any error type, enabling consistent retry and alerting
/// decisions across crates.
pub trait ErrorClassification {
    /// Check if retrying the same call could plausibly succeed.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    ///
    /// Used for monitoring, alerting, and logging decisions.
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Suggested wait before retrying, when one is known
    ///
    /// For an open circuit this is the remaining cooldown.
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}
