//! Port interfaces for the retry engine

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ratekeeper_common::error::{ErrorClassification, ErrorSeverity};
use ratekeeper_common::resilience::{Classify, RetryMetricsSnapshot};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::handle::RetryHandle;

/// Why a scheduler refused to accept a delayed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The scheduler is shutting down or already stopped.
    #[error("delay scheduler is shut down")]
    ShutDown,
    /// The scheduler already holds its maximum number of pending attempts.
    #[error("delay scheduler is saturated ({capacity} attempts pending)")]
    Saturated {
        /// Configured pending-attempt limit.
        capacity: usize,
    },
}

impl ErrorClassification for ScheduleError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Saturated { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ShutDown => ErrorSeverity::Error,
            Self::Saturated { .. } => ErrorSeverity::Warning,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// A retry attempt waiting for its delay to elapse.
///
/// Running it invokes the operation on the current thread. Dropping it
/// without running resolves the owning call as a scheduling failure.
pub struct ScheduledAttempt {
    operation: Arc<str>,
    attempt: u32,
    cancellation: CancellationToken,
    task: Box<dyn FnOnce() + Send + 'static>,
}

impl ScheduledAttempt {
    /// Wrap `task` as attempt number `attempt` of `operation`.
    pub fn new(
        operation: Arc<str>,
        attempt: u32,
        cancellation: CancellationToken,
        task: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self { operation, attempt, cancellation, task: Box::new(task) }
    }

    /// Operation name the attempt belongs to.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// 1-based attempt number this task will perform.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Cancelled when the caller gives up on the call.
    ///
    /// Schedulers may watch it to run the attempt early; a cancelled attempt
    /// resolves immediately without invoking the operation.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Run the attempt on the current thread.
    pub fn run(self) {
        (self.task)();
    }
}

impl fmt::Debug for ScheduledAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledAttempt")
            .field("operation", &self.operation)
            .field("attempt", &self.attempt)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Runs retry attempts after a delay without blocking the caller.
///
/// Implementations are owned by the caller and injected into engines; an
/// engine never starts or stops its scheduler.
///
/// Contract: on `Err` the attempt has been dropped unrun. On `Ok` the attempt
/// is eventually either run once or dropped (for example on shutdown).
pub trait DelayScheduler: Send + Sync {
    /// Run `attempt` once `delay` has elapsed.
    fn schedule(&self, delay: Duration, attempt: ScheduledAttempt) -> Result<(), ScheduleError>;
}

impl<S: DelayScheduler + ?Sized> DelayScheduler for Arc<S> {
    fn schedule(&self, delay: Duration, attempt: ScheduledAttempt) -> Result<(), ScheduleError> {
        (**self).schedule(delay, attempt)
    }
}

/// Entry point collaborators use to run fallible operations with retries.
pub trait RetryService: Send + Sync {
    /// Run `operation` under the service's retry policy.
    ///
    /// The first attempt runs on the calling thread; later attempts run on
    /// the scheduler. The returned handle resolves exactly once.
    fn execute_with_retry<T, E, F>(&self, operation: F, name: &str) -> RetryHandle<T, E>
    where
        T: Send + 'static,
        E: Classify + std::error::Error + Send + 'static,
        F: FnMut() -> Result<T, E> + Send + 'static;

    /// Counters aggregated over every call made through the service.
    fn retry_metrics(&self) -> RetryMetricsSnapshot;
}
