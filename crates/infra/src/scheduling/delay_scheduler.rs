//! Tokio-backed delay scheduler.
//!
//! Each accepted retry becomes one tracked task that sleeps for its delay
//! and then runs the attempt on the blocking pool. A semaphore bounds how
//! many retries may wait at once.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ratekeeper_common::resilience::RetryPolicy;
//! use ratekeeper_core::RetryEngine;
//! use ratekeeper_infra::config::SchedulerSettings;
//! use ratekeeper_infra::scheduling::TokioDelayScheduler;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = Arc::new(TokioDelayScheduler::with_runtime(&SchedulerSettings::default())?);
//! let engine = RetryEngine::new(RetryPolicy::with_circuit_breaker(), scheduler.clone())?;
//! // ... application runs ...
//! scheduler.shutdown(Duration::from_secs(5)).await?;
//! # drop(engine);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ratekeeper_common::error::ConfigError;
use ratekeeper_core::{DelayScheduler, ScheduleError, ScheduledAttempt};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use super::error::{SchedulerError, SchedulerResult};
use crate::config::SchedulerSettings;

/// [`DelayScheduler`] running retries on a tokio runtime.
///
/// Either attaches to an existing runtime ([`from_handle`](Self::from_handle),
/// [`current`](Self::current)) or owns a dedicated one
/// ([`with_runtime`](Self::with_runtime)). Call [`shutdown`](Self::shutdown)
/// before dropping it to let running attempts finish.
pub struct TokioDelayScheduler {
    handle: Handle,
    runtime: Option<Runtime>,
    permits: Arc<Semaphore>,
    capacity: usize,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl TokioDelayScheduler {
    /// Schedule onto the runtime behind `handle`.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidSettings`] if `max_pending` is zero.
    pub fn from_handle(handle: Handle, max_pending: usize) -> SchedulerResult<Self> {
        if max_pending == 0 {
            return Err(ConfigError::invalid("max_pending", "must be at least 1").into());
        }
        Ok(Self::assemble(handle, None, max_pending))
    }

    /// Schedule onto the runtime this is called from.
    ///
    /// # Errors
    /// Returns [`SchedulerError::NoRuntime`] outside a tokio runtime.
    pub fn current(max_pending: usize) -> SchedulerResult<Self> {
        let handle = Handle::try_current().map_err(|e| SchedulerError::NoRuntime(e.to_string()))?;
        Self::from_handle(handle, max_pending)
    }

    /// Build a dedicated multi-threaded runtime from `settings`.
    ///
    /// # Errors
    /// Returns an error if the settings are invalid or the runtime fails to
    /// start.
    pub fn with_runtime(settings: &SchedulerSettings) -> SchedulerResult<Self> {
        settings.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(settings.worker_threads)
            .thread_name(settings.thread_name.clone())
            .enable_time()
            .build()
            .map_err(|e| SchedulerError::CreationFailed(e.to_string()))?;
        let handle = runtime.handle().clone();

        info!(
            worker_threads = settings.worker_threads,
            max_pending = settings.max_pending,
            thread_name = %settings.thread_name,
            "delay scheduler runtime started"
        );
        Ok(Self::assemble(handle, Some(runtime), settings.max_pending))
    }

    fn assemble(handle: Handle, runtime: Option<Runtime>, capacity: usize) -> Self {
        Self {
            handle,
            runtime,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Maximum retries allowed to wait at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retries currently waiting out their delay.
    pub fn pending(&self) -> usize {
        self.capacity.saturating_sub(self.permits.available_permits())
    }

    /// Whether [`shutdown`](Self::shutdown) has been requested.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting retries, drop the ones still waiting, and wait for
    /// attempts already running to finish.
    ///
    /// Dropped retries resolve their calls as scheduling failures.
    ///
    /// # Errors
    /// Returns [`SchedulerError::Timeout`] if running attempts outlast
    /// `timeout`. The scheduler stays shut down either way.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, timeout: Duration) -> SchedulerResult<()> {
        self.begin_shutdown();

        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .map_err(|_| SchedulerError::Timeout { duration: timeout })?;

        info!("delay scheduler stopped");
        Ok(())
    }

    fn begin_shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!(pending = self.pending(), "delay scheduler shutting down");
        }
        self.shutdown.cancel();
        self.permits.close();
        self.tracker.close();
    }
}

impl DelayScheduler for TokioDelayScheduler {
    fn schedule(&self, delay: Duration, attempt: ScheduledAttempt) -> Result<(), ScheduleError> {
        if self.shutdown.is_cancelled() {
            return Err(ScheduleError::ShutDown);
        }

        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(ScheduleError::ShutDown),
            Err(TryAcquireError::NoPermits) => {
                warn!(
                    operation = attempt.operation(),
                    attempt = attempt.attempt(),
                    capacity = self.capacity,
                    "delay scheduler saturated"
                );
                return Err(ScheduleError::Saturated { capacity: self.capacity });
            }
        };

        debug!(
            operation = attempt.operation(),
            attempt = attempt.attempt(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "retry queued"
        );

        let shutdown = self.shutdown.clone();
        self.tracker.spawn_on(wait_then_run(delay, attempt, permit, shutdown), &self.handle);
        Ok(())
    }
}

async fn wait_then_run(
    delay: Duration,
    attempt: ScheduledAttempt,
    permit: OwnedSemaphorePermit,
    shutdown: CancellationToken,
) {
    let cancellation = attempt.cancellation().clone();

    tokio::select! {
        biased;
        () = shutdown.cancelled() => {
            debug!(
                operation = attempt.operation(),
                attempt = attempt.attempt(),
                "scheduler stopped, dropping pending retry"
            );
            return;
        }
        // The attempt settles itself as cancelled without calling the operation.
        () = cancellation.cancelled() => {}
        () = tokio::time::sleep(delay) => {}
    }
    drop(permit);

    let operation = attempt.operation().to_owned();
    let number = attempt.attempt();
    if let Err(err) = tokio::task::spawn_blocking(move || attempt.run()).await {
        error!(operation = %operation, attempt = number, error = %err, "retry attempt did not complete");
    }
}

impl Drop for TokioDelayScheduler {
    fn drop(&mut self) {
        self.begin_shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for TokioDelayScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioDelayScheduler")
            .field("capacity", &self.capacity)
            .field("pending", &self.pending())
            .field("owns_runtime", &self.runtime.is_some())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
