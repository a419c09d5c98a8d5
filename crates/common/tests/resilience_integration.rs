//! Integration tests for resilience module
//!
//! Exercises policy, circuit breaker and metrics together through the public
//! API, the way the retry engine drives them.

#![cfg(feature = "runtime")]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ratekeeper_common::resilience::{
    CircuitBreaker, CircuitState, Classify, ErrorKind, MockClock, RetryMetrics, RetryPolicy,
};

/// Custom error type for testing
#[derive(Debug, Clone)]
struct GatewayError {
    status: Option<u16>,
    kind: ErrorKind,
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gateway error ({:?}, {})", self.status, self.kind)
    }
}

impl std::error::Error for GatewayError {}

impl Classify for GatewayError {
    fn error_kind(&self) -> ErrorKind {
        self.kind
    }

    fn status_code(&self) -> Option<u16> {
        self.status
    }
}

/// Validates that a policy-derived breaker opens and recovers on mock time.
///
/// # Test Steps
/// 1. Build the breaker from the aggressive preset (threshold 3, 30s cooldown)
/// 2. Record three failures and confirm the circuit opens
/// 3. Advance the clock past the cooldown and confirm calls are admitted again
/// 4. Record `min_calls` successes and confirm the circuit closes
#[test]
fn test_policy_breaker_open_and_recover() {
    let policy = RetryPolicy::aggressive();
    let clock = MockClock::new();
    let breaker = CircuitBreaker::with_clock(policy.circuit_breaker_config(), clock.clone())
        .expect("aggressive preset yields a valid breaker");

    for _ in 0..policy.failure_threshold() {
        assert!(!breaker.is_open());
        breaker.record_failure();
    }
    assert!(breaker.is_open());

    clock.advance(policy.breaker_timeout() + Duration::from_millis(1));
    assert!(!breaker.is_open());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    for _ in 0..policy.breaker_min_calls() {
        breaker.record_success();
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
}

/// Validates breaker mutations stay consistent under contention.
///
/// Assertions:
/// - Concurrent failures from many threads open the circuit exactly once
/// - The failure count equals the number of recorded failures
#[test]
fn test_breaker_concurrent_failures() {
    let policy = RetryPolicy::builder()
        .circuit_breaker(1_000, Duration::from_secs(60), 1)
        .build()
        .expect("valid policy");
    let breaker = Arc::new(CircuitBreaker::new(policy.circuit_breaker_config()).expect("breaker"));

    let workers: Vec<_> = (0..10)
        .map(|_| {
            let breaker = Arc::clone(&breaker);
            thread::spawn(move || {
                for _ in 0..100 {
                    breaker.record_failure();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread");
    }

    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.failure_count, 1_000);
    assert_eq!(snapshot.state, CircuitState::Open);
}

/// Validates classification of a caller-defined error type.
///
/// Assertions:
/// - Retryable status codes are retried even for an unlisted kind
/// - A non-retryable kind aborts regardless of status
/// - Kind decides when no status is present
#[test]
fn test_custom_error_classification() {
    let policy = RetryPolicy::default();

    let throttled = GatewayError { status: Some(429), kind: ErrorKind::RateLimited };
    let forbidden = GatewayError { status: Some(503), kind: ErrorKind::Security };
    let reset = GatewayError { status: None, kind: ErrorKind::Connection };
    let garbled = GatewayError { status: None, kind: ErrorKind::Serialization };

    assert!(policy.should_retry(&throttled));
    assert!(!policy.should_retry(&forbidden));
    assert!(policy.should_retry(&reset));
    assert!(!policy.should_retry(&garbled));
}

/// Validates the metrics invariant an engine relies on.
///
/// Assertions:
/// - successes + failures never exceeds attempts
/// - retries equal attempts minus finished calls for single-outcome calls
#[test]
fn test_metrics_accounting_for_retried_calls() {
    let metrics = RetryMetrics::new();

    // Call one: fails twice, succeeds on the third attempt.
    for attempt in 1..=3 {
        metrics.record_attempt();
        if attempt < 3 {
            metrics.record_retry();
        }
    }
    metrics.record_success();

    // Call two: exhausts two attempts.
    metrics.record_attempt();
    metrics.record_retry();
    metrics.record_attempt();
    metrics.record_failure();

    let snapshot = metrics.snapshot(false);
    assert!(snapshot.total_successes + snapshot.total_failures <= snapshot.total_attempts);
    assert_eq!(snapshot.total_attempts, 5);
    assert_eq!(snapshot.total_retries, snapshot.total_attempts - snapshot.total_operations());
    assert_eq!(snapshot.average_retries_per_operation(), 1.5);
}

/// Validates that the delay sequence never leaves `[0, max_delay]`.
#[test]
fn test_delay_bounds_with_full_jitter() {
    let policy = RetryPolicy::builder()
        .max_attempts(10)
        .initial_delay(Duration::from_millis(50))
        .max_delay(Duration::from_millis(400))
        .jitter_factor(1.0)
        .build()
        .expect("valid policy");

    for attempt in 1..=policy.max_attempts() {
        for _ in 0..50 {
            assert!(policy.calculate_delay(attempt) <= policy.max_delay());
        }
    }
}
