//! Resilience primitives shared by the retry engine
//!
//! - **[`policy`]**: immutable retry configuration, backoff and classification
//! - **[`classify`]**: failure kinds and the [`Classify`] trait operations implement
//! - **[`circuit_breaker`]**: three-state breaker guarding a whole engine
//! - **[`metrics`]**: atomic counters aggregated across calls
//! - **[`clock`]**: time source abstraction with a mock for tests
//!
//! None of these types spawn tasks or sleep; scheduling is the engine's job.

pub mod circuit_breaker;
pub mod classify;
pub mod clock;
pub mod metrics;
pub mod policy;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use classify::{classify_http_status, Classify, ErrorKind, OperationFailure};
pub use clock::{Clock, MockClock, SystemClock};
pub use metrics::{RetryMetrics, RetryMetricsSnapshot, RetryMetricsSnapshotView};
pub use policy::{
    RetryPolicy, RetryPolicyBuilder, DEFAULT_NON_RETRYABLE_KINDS, DEFAULT_NON_RETRYABLE_STATUSES,
    DEFAULT_RETRYABLE_KINDS, DEFAULT_RETRYABLE_STATUSES,
};
