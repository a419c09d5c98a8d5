//! Configuration model
//!
//! Plain serde structs mirroring the on-disk format. Every section has
//! defaults, so a file only needs the keys it wants to change:
//!
//! ```toml
//! [retry]
//! max_attempts = 5
//! initial_delay_ms = 200
//! retryable_kinds = ["connection", "timeout", "rate_limited"]
//!
//! [retry.circuit_breaker]
//! enabled = true
//! timeout_ms = 30000
//!
//! [scheduler]
//! worker_threads = 4
//!
//! [logging]
//! filter = "ratekeeper=debug"
//! json = true
//! ```

use std::time::Duration;

use ratekeeper_common::error::{ConfigError, ConfigResult};
use ratekeeper_common::resilience::{
    ErrorKind, RetryPolicy, DEFAULT_NON_RETRYABLE_KINDS, DEFAULT_NON_RETRYABLE_STATUSES,
    DEFAULT_RETRYABLE_KINDS, DEFAULT_RETRYABLE_STATUSES,
};
use ratekeeper_common::duration_millis;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Retry policy and circuit breaker.
    pub retry: RetrySettings,
    /// Delay scheduler pool.
    pub scheduler: SchedulerSettings,
    /// Log subscriber.
    pub logging: LoggingSettings,
}

impl Config {
    /// Validate every section without building anything long-lived.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        self.retry.to_policy()?;
        self.scheduler.validate()
    }
}

/// Retry policy as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(rename = "initial_delay_ms", with = "duration_millis")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    #[serde(rename = "max_delay_ms", with = "duration_millis")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Relative jitter in `[0, 1]`.
    pub jitter_factor: f64,
    /// Grow delays geometrically; when false every retry waits `initial_delay`.
    pub exponential_backoff: bool,
    /// Stop early on failures the policy marks as non-retryable.
    pub classify_failures: bool,
    /// Failure kinds worth retrying.
    pub retryable_kinds: Vec<ErrorKind>,
    /// Failure kinds that end the call immediately.
    pub non_retryable_kinds: Vec<ErrorKind>,
    /// Status codes worth retrying.
    pub retryable_statuses: Vec<u16>,
    /// Status codes that end the call immediately.
    pub non_retryable_statuses: Vec<u16>,
    /// Circuit breaker section.
    pub circuit_breaker: BreakerSettings,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts(),
            initial_delay: policy.initial_delay(),
            max_delay: policy.max_delay(),
            backoff_multiplier: policy.backoff_multiplier(),
            jitter_factor: policy.jitter_factor(),
            exponential_backoff: policy.exponential_backoff(),
            classify_failures: policy.classify_failures(),
            retryable_kinds: DEFAULT_RETRYABLE_KINDS.to_vec(),
            non_retryable_kinds: DEFAULT_NON_RETRYABLE_KINDS.to_vec(),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
            non_retryable_statuses: DEFAULT_NON_RETRYABLE_STATUSES.to_vec(),
            circuit_breaker: BreakerSettings::default(),
        }
    }
}

impl RetrySettings {
    /// Build and validate the policy these settings describe.
    ///
    /// # Errors
    /// Returns [`ConfigError`] naming the first field out of range.
    pub fn into_policy(self) -> ConfigResult<RetryPolicy> {
        self.to_policy()
    }

    /// Borrowing form of [`into_policy`](Self::into_policy).
    ///
    /// # Errors
    /// Returns [`ConfigError`] naming the first field out of range.
    pub fn to_policy(&self) -> ConfigResult<RetryPolicy> {
        let breaker = &self.circuit_breaker;
        RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .initial_delay(self.initial_delay)
            .max_delay(self.max_delay)
            .backoff_multiplier(self.backoff_multiplier)
            .jitter_factor(self.jitter_factor)
            .exponential_backoff(self.exponential_backoff)
            .classify_failures(self.classify_failures)
            .retryable_kinds(self.retryable_kinds.iter().copied())
            .non_retryable_kinds(self.non_retryable_kinds.iter().copied())
            .retryable_statuses(self.retryable_statuses.iter().copied())
            .non_retryable_statuses(self.non_retryable_statuses.iter().copied())
            .circuit_breaker(breaker.failure_threshold, breaker.timeout, breaker.min_calls)
            .circuit_breaker_enabled(breaker.enabled)
            .build()
    }
}

/// Circuit breaker as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Whether the engine gates calls on a breaker at all.
    pub enabled: bool,
    /// Failures that open the breaker.
    pub failure_threshold: u32,
    /// Cooldown before an open breaker lets a probe through.
    #[serde(rename = "timeout_ms", with = "duration_millis")]
    pub timeout: Duration,
    /// Successes in half-open that close the breaker again.
    pub min_calls: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            enabled: policy.circuit_breaker_enabled(),
            failure_threshold: policy.failure_threshold(),
            timeout: policy.breaker_timeout(),
            min_calls: policy.breaker_min_calls(),
        }
    }
}

/// Worker pool that waits out retry delays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Runtime worker threads.
    pub worker_threads: usize,
    /// Retries allowed to wait at once before new ones are rejected.
    pub max_pending: usize,
    /// Name given to the worker threads.
    pub thread_name: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { worker_threads: 2, max_pending: 1024, thread_name: "retry-scheduler".to_string() }
    }
}

impl SchedulerSettings {
    /// Check the pool can actually run something.
    ///
    /// # Errors
    /// Returns [`ConfigError`] for a zero-sized pool or queue.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.worker_threads == 0 {
            return Err(ConfigError::invalid("worker_threads", "must be at least 1"));
        }
        if self.max_pending == 0 {
            return Err(ConfigError::invalid("max_pending", "must be at least 1"));
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::invalid("thread_name", "must not be empty"));
        }
        Ok(())
    }
}

/// Log subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { filter: "info".to_string(), json: false }
    }
}
