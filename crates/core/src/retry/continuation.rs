//! Per-call retry state machine
//!
//! A [`Continuation`] owns everything one call needs between attempts: the
//! boxed operation, the attempt counter, the jitter-free backoff base and the
//! promise feeding the caller's [`RetryHandle`](super::RetryHandle). It is
//! moved into each scheduled attempt, so exactly one thread touches it at a
//! time.
//!
//! Every exit path settles the promise exactly once. A continuation dropped
//! without being settled (for example by a scheduler shutting down) settles
//! itself as a scheduling failure, unless it is dropped while unwinding out
//! of the operation, in which case the call resolves as panicked.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ratekeeper_common::resilience::{CircuitBreaker, Classify, Clock, RetryMetrics, RetryPolicy};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{EngineError, EngineResult};
use super::ports::{DelayScheduler, ScheduleError, ScheduledAttempt};

/// State shared by every call through one engine.
pub(crate) struct EngineShared<C: Clock> {
    pub(crate) policy: RetryPolicy,
    pub(crate) breaker: Option<CircuitBreaker<C>>,
    pub(crate) metrics: RetryMetrics,
    pub(crate) clock: Arc<C>,
}

pub(crate) type BoxedOperation<T, E> = Box<dyn FnMut() -> Result<T, E> + Send + 'static>;

/// Caller deadline: absolute expiry plus the budget it was derived from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    pub(crate) expires_at: Instant,
    pub(crate) budget: Duration,
}

pub(crate) struct Continuation<T, E, C>
where
    T: Send + 'static,
    E: Classify + std::error::Error + Send + 'static,
    C: Clock,
{
    shared: Arc<EngineShared<C>>,
    scheduler: Arc<dyn DelayScheduler>,
    name: Arc<str>,
    operation: BoxedOperation<T, E>,
    attempt: u32,
    in_flight: bool,
    backoff: Duration,
    deadline: Option<Deadline>,
    cancellation: CancellationToken,
    promise: Option<oneshot::Sender<EngineResult<T, E>>>,
}

impl<T, E, C> Continuation<T, E, C>
where
    T: Send + 'static,
    E: Classify + std::error::Error + Send + 'static,
    C: Clock,
{
    pub(crate) fn new(
        shared: Arc<EngineShared<C>>,
        scheduler: Arc<dyn DelayScheduler>,
        name: Arc<str>,
        operation: BoxedOperation<T, E>,
        deadline: Option<Deadline>,
        cancellation: CancellationToken,
        promise: oneshot::Sender<EngineResult<T, E>>,
    ) -> Self {
        let backoff = shared.policy.initial_delay();
        Self {
            shared,
            scheduler,
            name,
            operation,
            attempt: 1,
            in_flight: false,
            backoff,
            deadline,
            cancellation,
            promise: Some(promise),
        }
    }

    /// Invoke the operation for the current attempt and act on the outcome.
    pub(crate) fn run_attempt(mut self) {
        if self.abandoned() {
            return self.settle_cancelled();
        }

        self.shared.metrics.record_attempt();
        debug!(
            operation = %self.name,
            attempt = self.attempt,
            max_attempts = self.shared.policy.max_attempts(),
            "invoking operation"
        );

        // Still set if the operation unwinds; Drop reads it.
        self.in_flight = true;
        let outcome = (self.operation)();
        self.in_flight = false;

        match outcome {
            Ok(value) => self.succeed(value),
            Err(error) => self.after_failure(error),
        }
    }

    fn abandoned(&self) -> bool {
        self.cancellation.is_cancelled()
            || self.promise.as_ref().map_or(true, oneshot::Sender::is_closed)
    }

    fn after_failure(mut self, error: E) {
        let policy = &self.shared.policy;
        let max_attempts = policy.max_attempts();

        if self.attempt >= max_attempts {
            warn!(
                operation = %self.name,
                attempt = self.attempt,
                max_attempts,
                error = %error,
                "retries exhausted"
            );
            return self.fail_with_operation_error(error);
        }

        if !policy.should_retry(&error) {
            info!(
                operation = %self.name,
                attempt = self.attempt,
                kind = %error.error_kind(),
                status = error.status_code(),
                error = %error,
                "failure is not retryable"
            );
            return self.fail_with_operation_error(error);
        }

        let delay = policy.apply_jitter(self.backoff);
        if let Some(deadline) = self.deadline {
            let resumes_at = self.shared.clock.now().checked_add(delay);
            if resumes_at.map_or(true, |at| at > deadline.expires_at) {
                warn!(
                    operation = %self.name,
                    attempt = self.attempt,
                    delay_ms = millis(delay),
                    deadline_ms = millis(deadline.budget),
                    "next retry would miss the deadline"
                );
                let failure = EngineError::DeadlineExceeded {
                    name: self.name.to_string(),
                    attempts: self.attempt,
                    deadline: deadline.budget,
                };
                return self.fail(failure);
            }
        }

        self.shared.metrics.record_retry();
        warn!(
            operation = %self.name,
            attempt = self.attempt,
            max_attempts,
            delay_ms = millis(delay),
            error = %error,
            "attempt failed, retry scheduled"
        );

        self.backoff = policy.next_backoff(self.backoff);
        self.attempt += 1;
        self.schedule(delay);
    }

    fn schedule(self, delay: Duration) {
        let scheduler = Arc::clone(&self.scheduler);
        let name = Arc::clone(&self.name);
        let attempt = self.attempt;
        let cancellation = self.cancellation.clone();

        // Shared with the scheduled task so a rejected attempt can still be
        // settled here.
        let slot = Arc::new(Mutex::new(Some(self)));
        let task_slot = Arc::clone(&slot);
        let task = ScheduledAttempt::new(Arc::clone(&name), attempt, cancellation, move || {
            let next = task_slot.lock().take();
            if let Some(next) = next {
                next.run_attempt();
            }
        });

        if let Err(source) = scheduler.schedule(delay, task) {
            let rejected = slot.lock().take();
            if let Some(rejected) = rejected {
                warn!(operation = %name, attempt, error = %source, "scheduler rejected retry");
                let failure = EngineError::Scheduling {
                    name: name.to_string(),
                    attempts: attempt - 1,
                    source,
                };
                rejected.fail(failure);
            }
        }
    }

    fn succeed(mut self, value: T) {
        self.shared.metrics.record_success();
        if let Some(breaker) = &self.shared.breaker {
            breaker.record_success();
        }
        debug!(operation = %self.name, attempt = self.attempt, "operation succeeded");
        self.settle(Ok(value));
    }

    fn fail_with_operation_error(self, source: E) {
        let failure =
            EngineError::Operation { name: self.name.to_string(), attempts: self.attempt, source };
        self.fail(failure);
    }

    fn fail(mut self, failure: EngineError<E>) {
        record_failure(&self.shared);
        self.settle(Err(failure));
    }

    fn settle_cancelled(mut self) {
        let attempts = self.attempt - 1;
        debug!(operation = %self.name, attempts, "call cancelled before next attempt");
        let cancelled = EngineError::Cancelled { name: self.name.to_string(), attempts };
        self.settle(Err(cancelled));
    }

    fn settle(&mut self, outcome: EngineResult<T, E>) {
        if let Some(promise) = self.promise.take() {
            // A receiver dropped in the meantime has nothing left to observe.
            let _ = promise.send(outcome);
        }
    }
}

impl<T, E, C> Drop for Continuation<T, E, C>
where
    T: Send + 'static,
    E: Classify + std::error::Error + Send + 'static,
    C: Clock,
{
    fn drop(&mut self) {
        let Some(promise) = self.promise.take() else {
            return;
        };

        let name = self.name.to_string();
        let failure = if self.in_flight {
            error!(operation = %self.name, attempt = self.attempt, "operation panicked");
            EngineError::OperationPanicked { name, attempts: self.attempt }
        } else {
            warn!(operation = %self.name, attempt = self.attempt, "pending retry dropped before it ran");
            EngineError::Scheduling {
                name,
                attempts: self.attempt.saturating_sub(1),
                source: ScheduleError::ShutDown,
            }
        };

        record_failure(&self.shared);
        let _ = promise.send(Err(failure));
    }
}

fn record_failure<C: Clock>(shared: &EngineShared<C>) {
    shared.metrics.record_failure();
    if let Some(breaker) = &shared.breaker {
        breaker.record_failure();
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
