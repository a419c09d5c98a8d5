//! Retry engine
//!
//! [`RetryEngine`] is the orchestrator: it gates calls on the circuit
//! breaker, runs the first attempt on the calling thread, and hands every
//! later attempt to the injected [`DelayScheduler`]. It never blocks the
//! caller while waiting out a backoff delay.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ratekeeper_common::error::ConfigResult;
use ratekeeper_common::resilience::{
    CircuitBreaker, CircuitBreakerSnapshot, CircuitState, Classify, Clock, RetryMetrics,
    RetryMetricsSnapshot, RetryPolicy, SystemClock,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::continuation::{Continuation, Deadline, EngineShared};
use super::error::EngineError;
use super::handle::RetryHandle;
use super::ports::{DelayScheduler, RetryService};

/// Per-call knobs for [`RetryEngine::execute_with_options`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Cancelling this token stops further retries of the call.
    pub cancellation: Option<CancellationToken>,
    /// Give up instead of scheduling a retry that would start after this
    /// much time has passed since the call began.
    pub deadline: Option<Duration>,
}

impl ExecuteOptions {
    /// No cancellation token and no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop retrying once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Bound the total time spent on the call.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Retry orchestrator with an optional circuit breaker.
///
/// Clones share the same breaker, metrics and scheduler.
pub struct RetryEngine<C: Clock = SystemClock> {
    shared: Arc<EngineShared<C>>,
    scheduler: Arc<dyn DelayScheduler>,
}

impl RetryEngine<SystemClock> {
    /// Validate `policy` and build an engine on the system clock.
    pub fn new(policy: RetryPolicy, scheduler: Arc<dyn DelayScheduler>) -> ConfigResult<Self> {
        Self::with_clock(policy, scheduler, SystemClock)
    }
}

impl<C: Clock> RetryEngine<C> {
    /// Validate `policy` and build an engine reading time from `clock`.
    pub fn with_clock(
        policy: RetryPolicy,
        scheduler: Arc<dyn DelayScheduler>,
        clock: C,
    ) -> ConfigResult<Self> {
        policy.validate()?;

        let clock = Arc::new(clock);
        let breaker = if policy.circuit_breaker_enabled() {
            Some(CircuitBreaker::with_shared_clock(
                policy.circuit_breaker_config(),
                Arc::clone(&clock),
            )?)
        } else {
            None
        };

        info!(
            max_attempts = policy.max_attempts(),
            initial_delay_ms = policy.initial_delay().as_millis() as u64,
            max_delay_ms = policy.max_delay().as_millis() as u64,
            circuit_breaker = policy.circuit_breaker_enabled(),
            "retry engine initialized"
        );

        let shared = EngineShared { policy, breaker, metrics: RetryMetrics::new(), clock };
        Ok(Self { shared: Arc::new(shared), scheduler })
    }

    /// Run `operation` with retries.
    ///
    /// The first attempt runs before this returns. The handle resolves with
    /// the first success, or with the failure that ended the call.
    pub fn execute_with_retry<T, E, F>(&self, operation: F, name: &str) -> RetryHandle<T, E>
    where
        T: Send + 'static,
        E: Classify + std::error::Error + Send + 'static,
        F: FnMut() -> Result<T, E> + Send + 'static,
    {
        self.execute_with_options(operation, name, ExecuteOptions::default())
    }

    /// [`execute_with_retry`](Self::execute_with_retry) with cancellation and
    /// deadline control.
    #[instrument(level = "debug", skip(self, operation, options))]
    pub fn execute_with_options<T, E, F>(
        &self,
        operation: F,
        name: &str,
        options: ExecuteOptions,
    ) -> RetryHandle<T, E>
    where
        T: Send + 'static,
        E: Classify + std::error::Error + Send + 'static,
        F: FnMut() -> Result<T, E> + Send + 'static,
    {
        let name: Arc<str> = Arc::from(name);
        let cancellation = options.cancellation.map_or_else(CancellationToken::new, |parent| {
            parent.child_token()
        });
        let (promise, receiver) = oneshot::channel();
        let handle = RetryHandle::new(Arc::clone(&name), receiver, cancellation.clone());

        if let Some(breaker) = &self.shared.breaker {
            if breaker.is_open() {
                let retry_after = breaker.snapshot().open_remaining;
                debug!(operation = %name, state = %CircuitState::Open, "call rejected by circuit breaker");
                let _ = promise.send(Err(EngineError::CircuitOpen { name: name.to_string(), retry_after }));
                return handle;
            }
        }

        let deadline = options.deadline.and_then(|budget| {
            let expires_at = self.shared.clock.now().checked_add(budget);
            if expires_at.is_none() {
                warn!(operation = %name, "deadline too far in the future, ignoring it");
            }
            expires_at.map(|expires_at| Deadline { expires_at, budget })
        });

        Continuation::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.scheduler),
            name,
            Box::new(operation),
            deadline,
            cancellation,
            promise,
        )
        .run_attempt();

        handle
    }

    /// Counters aggregated over every call through this engine.
    ///
    /// The breaker gauge goes through [`is_circuit_breaker_open`](Self::is_circuit_breaker_open),
    /// so reading it after the cooldown has elapsed moves the breaker to half-open.
    pub fn metrics(&self) -> RetryMetricsSnapshot {
        self.shared.metrics.snapshot(self.is_circuit_breaker_open())
    }

    /// Whether new calls are currently rejected; false without a breaker.
    ///
    /// Like the call path, this moves an open breaker whose cooldown has
    /// elapsed to half-open.
    pub fn is_circuit_breaker_open(&self) -> bool {
        self.shared.breaker.as_ref().is_some_and(CircuitBreaker::is_open)
    }

    /// Force the breaker closed; no-op without a breaker.
    pub fn reset_circuit_breaker(&self) {
        if let Some(breaker) = &self.shared.breaker {
            breaker.reset();
        }
    }

    /// Current breaker state, if the policy enables one.
    pub fn circuit_breaker_state(&self) -> Option<CircuitState> {
        self.shared.breaker.as_ref().map(CircuitBreaker::state)
    }

    /// Breaker state and counters, if the policy enables one.
    pub fn circuit_breaker_snapshot(&self) -> Option<CircuitBreakerSnapshot> {
        self.shared.breaker.as_ref().map(CircuitBreaker::snapshot)
    }

    /// The validated policy this engine runs.
    pub fn policy(&self) -> &RetryPolicy {
        &self.shared.policy
    }
}

impl<C: Clock> RetryService for RetryEngine<C> {
    fn execute_with_retry<T, E, F>(&self, operation: F, name: &str) -> RetryHandle<T, E>
    where
        T: Send + 'static,
        E: Classify + std::error::Error + Send + 'static,
        F: FnMut() -> Result<T, E> + Send + 'static,
    {
        RetryEngine::execute_with_retry(self, operation, name)
    }

    fn retry_metrics(&self) -> RetryMetricsSnapshot {
        self.metrics()
    }
}

impl<C: Clock> Clone for RetryEngine<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared), scheduler: Arc::clone(&self.scheduler) }
    }
}

impl<C: Clock> fmt::Debug for RetryEngine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryEngine")
            .field("policy", &self.shared.policy)
            .field("circuit_breaker", &self.circuit_breaker_state())
            .finish_non_exhaustive()
    }
}
