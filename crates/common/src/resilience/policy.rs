//! Retry policy
//!
//! A [`RetryPolicy`] is the immutable description of how an engine retries:
//! attempt limit, backoff shape, jitter, circuit breaker thresholds and the
//! classification sets that decide which failures deserve another attempt.
//!
//! Policies are only obtainable through [`RetryPolicyBuilder::build`] or the
//! presets, both of which hand out validated values.
//!
//! # Backoff
//!
//! The wait before attempt `n + 1` is derived from a jitter-free base:
//!
//! ```text
//! base(1)     = initial_delay
//! base(n + 1) = min(base(n) * backoff_multiplier, max_delay)   (exponential)
//! base(n + 1) = initial_delay                                  (fixed)
//! wait(n)     = clamp(base(n) ± base(n) * jitter_factor * U[0,1], 0, max_delay)
//! ```
//!
//! [`RetryPolicy::next_backoff`] and [`RetryPolicy::apply_jitter`] are the
//! incremental form used by the engine, and [`RetryPolicy::calculate_delay`]
//! is the closed form of the same sequence.

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;

use super::circuit_breaker::CircuitBreakerConfig;
use super::classify::{Classify, ErrorKind};
use crate::error::{ConfigError, ConfigResult};

/// Kinds retried by default.
pub const DEFAULT_RETRYABLE_KINDS: [ErrorKind; 3] =
    [ErrorKind::Connection, ErrorKind::Timeout, ErrorKind::ResourceAccess];

/// Kinds never retried by default.
pub const DEFAULT_NON_RETRYABLE_KINDS: [ErrorKind; 2] =
    [ErrorKind::InvalidArgument, ErrorKind::Security];

/// Status codes retried by default.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Status codes never retried by default.
pub const DEFAULT_NON_RETRYABLE_STATUSES: [u16; 5] = [400, 401, 403, 404, 422];

/// Immutable, validated retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter_factor: f64,
    exponential_backoff: bool,
    circuit_breaker_enabled: bool,
    failure_threshold: u32,
    breaker_timeout: Duration,
    breaker_min_calls: u32,
    classify_failures: bool,
    retryable_kinds: HashSet<ErrorKind>,
    non_retryable_kinds: HashSet<ErrorKind>,
    retryable_statuses: HashSet<u16>,
    non_retryable_statuses: HashSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            exponential_backoff: true,
            circuit_breaker_enabled: false,
            failure_threshold: 5,
            breaker_timeout: Duration::from_secs(60),
            breaker_min_calls: 3,
            classify_failures: true,
            retryable_kinds: DEFAULT_RETRYABLE_KINDS.into_iter().collect(),
            non_retryable_kinds: DEFAULT_NON_RETRYABLE_KINDS.into_iter().collect(),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.into_iter().collect(),
            non_retryable_statuses: DEFAULT_NON_RETRYABLE_STATUSES.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    /// Start a builder seeded with the default policy.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Default policy with the circuit breaker switched on.
    pub fn with_circuit_breaker() -> Self {
        Self { circuit_breaker_enabled: true, ..Self::default() }
    }

    /// More attempts, shorter delays, and a quicker breaker.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 1.5,
            jitter_factor: 0.2,
            circuit_breaker_enabled: true,
            failure_threshold: 3,
            breaker_timeout: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// Check every invariant, reporting the first violation.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be greater than 0"));
        }
        if self.initial_delay.is_zero() {
            return Err(ConfigError::invalid("initial_delay", "must be greater than 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::invalid(
                "max_delay",
                format!("must be at least initial_delay ({:?})", self.initial_delay),
            ));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier > 1.0) {
            return Err(ConfigError::invalid(
                "backoff_multiplier",
                format!("must be a finite value greater than 1.0, got {}", self.backoff_multiplier),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::invalid(
                "jitter_factor",
                format!("must be within [0.0, 1.0], got {}", self.jitter_factor),
            ));
        }
        if self.circuit_breaker_enabled {
            self.circuit_breaker_config().validate()?;
        }
        Ok(())
    }

    /// Maximum number of invocations, first attempt included.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before the first retry.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Upper bound for any single wait.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Growth factor between consecutive waits.
    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Relative spread applied to each wait.
    pub fn jitter_factor(&self) -> f64 {
        self.jitter_factor
    }

    /// Whether waits grow; when false every wait is based on `initial_delay`.
    pub fn exponential_backoff(&self) -> bool {
        self.exponential_backoff
    }

    /// Whether calls are gated by a circuit breaker.
    pub fn circuit_breaker_enabled(&self) -> bool {
        self.circuit_breaker_enabled
    }

    /// Consecutive failures that open the breaker.
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Cooldown before an open breaker lets a probe through.
    pub fn breaker_timeout(&self) -> Duration {
        self.breaker_timeout
    }

    /// Successful probes required to close a half-open breaker.
    pub fn breaker_min_calls(&self) -> u32 {
        self.breaker_min_calls
    }

    /// Whether failures are classified before deciding to retry.
    ///
    /// When false every failure is retried until `max_attempts` is reached.
    pub fn classify_failures(&self) -> bool {
        self.classify_failures
    }

    /// Breaker configuration derived from this policy.
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: self.breaker_timeout,
            min_calls: self.breaker_min_calls,
        }
    }

    /// Non-retryable kinds win over retryable ones; unknown kinds are not retried.
    pub fn is_retryable_error(&self, kind: ErrorKind) -> bool {
        !self.non_retryable_kinds.contains(&kind) && self.retryable_kinds.contains(&kind)
    }

    /// Non-retryable codes win over retryable ones; unknown codes are not retried.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        !self.non_retryable_statuses.contains(&status) && self.retryable_statuses.contains(&status)
    }

    /// Decide whether `failure` deserves another attempt.
    ///
    /// A non-retryable kind always aborts. Otherwise a status code, when
    /// present, decides; failing that the kind does. With classification
    /// switched off this always returns true.
    pub fn should_retry<F>(&self, failure: &F) -> bool
    where
        F: Classify + ?Sized,
    {
        if !self.classify_failures {
            return true;
        }
        let kind = failure.error_kind();
        if self.non_retryable_kinds.contains(&kind) {
            return false;
        }
        match failure.status_code() {
            Some(status) => self.is_retryable_status(status),
            None => self.is_retryable_error(kind),
        }
    }

    /// Jitter-free base for the wait that follows a wait based on `current`.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        if !self.exponential_backoff {
            return self.initial_delay;
        }
        scale(current, self.backoff_multiplier, self.max_delay)
    }

    /// Spread `base` by up to `±base * jitter_factor`, clamped to `[0, max_delay]`.
    pub fn apply_jitter(&self, base: Duration) -> Duration {
        let base = base.min(self.max_delay);
        if self.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = as_nanos_f64(base) * self.jitter_factor;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        from_nanos_f64(as_nanos_f64(base) + offset, self.max_delay)
    }

    /// Wait that follows failed attempt `attempt` (1-based).
    ///
    /// Always within `[0, max_delay]`; non-decreasing in `attempt` when
    /// `jitter_factor` is zero.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = if self.exponential_backoff {
            let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
            scale(self.initial_delay, self.backoff_multiplier.powi(exponent), self.max_delay)
        } else {
            self.initial_delay
        };
        self.apply_jitter(base)
    }
}

fn as_nanos_f64(duration: Duration) -> f64 {
    duration.as_nanos() as f64
}

fn from_nanos_f64(nanos: f64, cap: Duration) -> Duration {
    let cap_nanos = as_nanos_f64(cap);
    let clamped = if nanos.is_nan() { cap_nanos } else { nanos.clamp(0.0, cap_nanos) };
    Duration::from_nanos(clamped.round() as u64).min(cap)
}

fn scale(duration: Duration, factor: f64, cap: Duration) -> Duration {
    from_nanos_f64(as_nanos_f64(duration) * factor, cap)
}

/// Fluent builder for [`RetryPolicy`]; [`build`](Self::build) validates.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Builder seeded with [`RetryPolicy::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder seeded with an existing policy.
    pub fn from_policy(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Set the attempt limit, first attempt included.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    /// Set the wait before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Set the upper bound for any single wait.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set the growth factor between waits.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.policy.backoff_multiplier = multiplier;
        self
    }

    /// Set the relative jitter spread.
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.policy.jitter_factor = factor;
        self
    }

    /// Disable jitter entirely.
    pub fn no_jitter(self) -> Self {
        self.jitter_factor(0.0)
    }

    /// Toggle exponential growth of waits.
    pub fn exponential_backoff(mut self, enabled: bool) -> Self {
        self.policy.exponential_backoff = enabled;
        self
    }

    /// Enable the breaker with the given threshold, cooldown and probe count.
    pub fn circuit_breaker(mut self, failure_threshold: u32, timeout: Duration, min_calls: u32) -> Self {
        self.policy.circuit_breaker_enabled = true;
        self.policy.failure_threshold = failure_threshold;
        self.policy.breaker_timeout = timeout;
        self.policy.breaker_min_calls = min_calls;
        self
    }

    /// Toggle the breaker without touching its thresholds.
    pub fn circuit_breaker_enabled(mut self, enabled: bool) -> Self {
        self.policy.circuit_breaker_enabled = enabled;
        self
    }

    /// Toggle failure classification.
    pub fn classify_failures(mut self, enabled: bool) -> Self {
        self.policy.classify_failures = enabled;
        self
    }

    /// Replace the retryable kind set.
    pub fn retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.policy.retryable_kinds = kinds.into_iter().collect();
        self
    }

    /// Replace the non-retryable kind set.
    pub fn non_retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.policy.non_retryable_kinds = kinds.into_iter().collect();
        self
    }

    /// Replace the retryable status set.
    pub fn retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.policy.retryable_statuses = statuses.into_iter().collect();
        self
    }

    /// Replace the non-retryable status set.
    pub fn non_retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.policy.non_retryable_statuses = statuses.into_iter().collect();
        self
    }

    /// Validate and return the policy.
    pub fn build(self) -> ConfigResult<RetryPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}
