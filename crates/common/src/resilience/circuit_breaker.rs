//! Circuit breaker
//!
//! Three-state breaker shared by every call routed through one engine. All
//! state lives behind a single mutex, so a transition and the counter updates
//! it implies are observed atomically by concurrent callers.
//!
//! ```text
//! CLOSED ──failures >= threshold──▶ OPEN ──cooldown elapsed──▶ HALF_OPEN
//!    ▲                                ▲                            │
//!    │                                └──failures >= threshold─────┤
//!    └──────────────successes >= min_calls─────────────────────────┘
//! ```
//!
//! The OPEN to HALF_OPEN move is lazy: it happens inside
//! [`CircuitBreaker::is_open`] once the cooldown has strictly elapsed.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ConfigResult};
use crate::utils::serde::option_duration_millis;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected without invoking the operation.
    Open,
    /// Calls flow as probes; enough successes close the circuit.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Thresholds for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures that open the circuit.
    pub failure_threshold: u32,
    /// Cooldown an open circuit waits before admitting probes.
    pub timeout: Duration,
    /// Probe successes that close a half-open circuit.
    pub min_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, timeout: Duration::from_secs(60), min_calls: 3 }
    }
}

impl CircuitBreakerConfig {
    /// All three thresholds must be non-zero.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be greater than 0"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("breaker_timeout", "must be greater than 0"));
        }
        if self.min_calls == 0 {
            return Err(ConfigError::invalid("breaker_min_calls", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerSnapshot {
    /// Current state, without applying a pending cooldown transition.
    pub state: CircuitState,
    /// Failures counted toward the threshold.
    pub failure_count: u32,
    /// Probe successes counted while half-open.
    pub success_count: u32,
    /// Time since the most recent failure.
    #[serde(with = "option_duration_millis", rename = "last_failure_age_ms")]
    pub last_failure_age: Option<Duration>,
    /// Cooldown left before probes are admitted; only set while open.
    #[serde(with = "option_duration_millis", rename = "open_remaining_ms")]
    pub open_remaining: Option<Duration>,
}

#[derive(Debug)]
struct BreakerState {
    status: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self { status: CircuitState::Closed, failure_count: 0, success_count: 0, last_failure: None }
    }
}

/// Three-state circuit breaker.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    clock: Arc<C>,
}

impl CircuitBreaker<SystemClock> {
    /// Breaker on the system clock.
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Breaker reading time from `clock`.
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        Self::with_shared_clock(config, Arc::new(clock))
    }

    /// Breaker sharing a clock with its owner.
    pub fn with_shared_clock(config: CircuitBreakerConfig, clock: Arc<C>) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, state: Mutex::new(BreakerState::closed()), clock })
    }

    /// Thresholds this breaker was built with.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether calls must be rejected right now.
    ///
    /// An open circuit whose cooldown has strictly elapsed moves to
    /// HALF_OPEN here, clearing both counters, and admits the call.
    pub fn is_open(&self) -> bool {
        let mut state = self.state.lock();
        if state.status != CircuitState::Open {
            return false;
        }

        let cooled_down = state
            .last_failure
            .map_or(true, |at| self.clock.elapsed_since(at) > self.config.timeout);
        if !cooled_down {
            return true;
        }

        state.status = CircuitState::HalfOpen;
        state.failure_count = 0;
        state.success_count = 0;
        info!(state = %CircuitState::HalfOpen, "circuit breaker cooldown elapsed, admitting probes");
        false
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        match state.status {
            CircuitState::Closed => {
                state.failure_count = state.failure_count.saturating_sub(1);
            }
            CircuitState::HalfOpen => {
                state.success_count = state.success_count.saturating_add(1);
                if state.success_count >= self.config.min_calls {
                    let probes = state.success_count;
                    *state = BreakerState { last_failure: state.last_failure, ..BreakerState::closed() };
                    info!(state = %CircuitState::Closed, probes, "circuit breaker closed");
                }
            }
            CircuitState::Open => {
                debug!("success recorded for a call admitted before the circuit opened");
            }
        }
    }

    /// Record a failed call, opening the circuit once the threshold is met.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure = Some(self.clock.now());

        if state.failure_count >= self.config.failure_threshold {
            if state.status != CircuitState::Open {
                warn!(
                    state = %CircuitState::Open,
                    failures = state.failure_count,
                    cooldown_ms = self.config.timeout.as_millis() as u64,
                    "circuit breaker opened"
                );
            }
            state.status = CircuitState::Open;
        }
    }

    /// Force the circuit closed and clear all counters.
    pub fn reset(&self) {
        *self.state.lock() = BreakerState::closed();
        info!(state = %CircuitState::Closed, "circuit breaker reset");
    }

    /// Current state, without applying a pending cooldown transition.
    pub fn state(&self) -> CircuitState {
        self.state.lock().status
    }

    /// Current state and counters.
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state.lock();
        let last_failure_age = state.last_failure.map(|at| self.clock.elapsed_since(at));
        let open_remaining = match (state.status, last_failure_age) {
            (CircuitState::Open, Some(age)) => Some(self.config.timeout.saturating_sub(age)),
            _ => None,
        };

        CircuitBreakerSnapshot {
            state: state.status,
            failure_count: state.failure_count,
            success_count: state.success_count,
            last_failure_age,
            open_remaining,
        }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
