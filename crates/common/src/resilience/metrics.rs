//! Retry metrics collector
//!
//! Monotonic counters shared by every call through one engine. Each counter
//! is independently atomic; a snapshot is not a single linearizable view,
//! but attempts are always read after outcomes so that
//! `successes + failures <= attempts` holds in every snapshot.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Thread-safe retry counters.
#[derive(Debug, Default)]
pub struct RetryMetrics {
    total_attempts: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_retries: AtomicU64,
}

impl RetryMetrics {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// One operation invocation is about to run.
    pub fn record_attempt(&self) {
        self.total_attempts.fetch_add(1, Ordering::SeqCst);
    }

    /// A call resolved successfully.
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::SeqCst);
    }

    /// A call resolved with a terminal failure.
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// A retry was scheduled.
    pub fn record_retry(&self) {
        self.total_retries.fetch_add(1, Ordering::SeqCst);
    }

    /// Read all counters.
    ///
    /// `circuit_open` feeds `active_circuit_breakers`; the collector itself
    /// knows nothing about the breaker.
    pub fn snapshot(&self, circuit_open: bool) -> RetryMetricsSnapshot {
        let total_successes = self.total_successes.load(Ordering::SeqCst);
        let total_failures = self.total_failures.load(Ordering::SeqCst);
        let total_retries = self.total_retries.load(Ordering::SeqCst);
        let total_attempts = self.total_attempts.load(Ordering::SeqCst);

        RetryMetricsSnapshot {
            total_attempts,
            total_successes,
            total_failures,
            total_retries,
            active_circuit_breakers: u32::from(circuit_open),
        }
    }
}

/// Immutable view of [`RetryMetrics`] with derived rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RetryMetricsSnapshot {
    /// Operation invocations, first attempts included.
    pub total_attempts: u64,
    /// Calls that resolved successfully.
    pub total_successes: u64,
    /// Calls that resolved with a terminal failure.
    pub total_failures: u64,
    /// Retries scheduled.
    pub total_retries: u64,
    /// 1 while the engine's breaker is open, else 0.
    pub active_circuit_breakers: u32,
}

impl RetryMetricsSnapshot {
    /// Successes per attempt; 1.0 before any attempt.
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 1.0;
        }
        self.total_successes as f64 / self.total_attempts as f64
    }

    /// Complement of [`success_rate`](Self::success_rate).
    pub fn failure_rate(&self) -> f64 {
        1.0 - self.success_rate()
    }

    /// Calls that reached a terminal outcome.
    pub fn total_operations(&self) -> u64 {
        self.total_successes + self.total_failures
    }

    /// Retries per finished call; 0.0 before any call finished.
    pub fn average_retries_per_operation(&self) -> f64 {
        match self.total_operations() {
            0 => 0.0,
            operations => self.total_retries as f64 / operations as f64,
        }
    }

    /// View that serializes counters together with derived rates.
    pub fn with_rates(&self) -> RetryMetricsSnapshotView<'_> {
        RetryMetricsSnapshotView(self)
    }
}

/// Serializable view including the derived rates.
#[derive(Debug, Clone, Copy)]
pub struct RetryMetricsSnapshotView<'a>(pub &'a RetryMetricsSnapshot);

impl Serialize for RetryMetricsSnapshotView<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let snapshot = self.0;
        let mut state = serializer.serialize_struct("RetryMetrics", 9)?;
        state.serialize_field("total_attempts", &snapshot.total_attempts)?;
        state.serialize_field("total_successes", &snapshot.total_successes)?;
        state.serialize_field("total_failures", &snapshot.total_failures)?;
        state.serialize_field("total_retries", &snapshot.total_retries)?;
        state.serialize_field("total_operations", &snapshot.total_operations())?;
        state.serialize_field("success_rate", &snapshot.success_rate())?;
        state.serialize_field("failure_rate", &snapshot.failure_rate())?;
        state.serialize_field(
            "average_retries_per_operation",
            &snapshot.average_retries_per_operation(),
        )?;
        state.serialize_field("active_circuit_breakers", &snapshot.active_circuit_breakers)?;
        state.end()
    }
}

impl fmt::Display for RetryMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RetryMetrics {{ attempts: {}, successes: {}, failures: {}, retries: {}, success_rate: {:.3}, open_breakers: {} }}",
            self.total_attempts,
            self.total_successes,
            self.total_failures,
            self.total_retries,
            self.success_rate(),
            self.active_circuit_breakers
        )
    }
}
