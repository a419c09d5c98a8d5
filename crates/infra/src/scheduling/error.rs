//! Scheduler error types

use std::time::Duration;

use ratekeeper_common::error::ConfigError;
use thiserror::Error;

/// Lifecycle errors of [`TokioDelayScheduler`](super::TokioDelayScheduler).
///
/// Per-attempt refusals are reported through
/// [`ScheduleError`](ratekeeper_core::ScheduleError) instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Settings describe a pool that cannot run.
    #[error(transparent)]
    InvalidSettings(#[from] ConfigError),

    /// Failed to build the dedicated runtime
    #[error("Failed to create scheduler runtime: {0}")]
    CreationFailed(String),

    /// No tokio runtime to attach to
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// Pending attempts did not drain in time
    #[error("Scheduler did not drain within {duration:?}")]
    Timeout {
        /// How long shutdown waited.
        duration: Duration,
    },
}

/// Convenience type alias for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
