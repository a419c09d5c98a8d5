//! Shared building blocks for the ratekeeper retry engine.
//!
//! # Feature Tiers
//!
//! - `foundation`: error classification and serde helpers
//! - `observability`: tracing for state transitions
//! - `runtime`: resilience primitives (policy, circuit breaker, metrics, clock)
//! - `test-utils`: everything in `runtime`, for downstream test suites

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{ConfigError, ConfigResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{
    classify_http_status, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot,
    CircuitState, Classify, Clock, ErrorKind, MockClock, OperationFailure, RetryMetrics,
    RetryMetricsSnapshot, RetryPolicy, RetryPolicyBuilder, SystemClock,
};
#[cfg(feature = "foundation")]
pub use utils::serde::{duration_millis, option_duration_millis};
