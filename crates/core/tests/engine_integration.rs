//! Integration tests for the retry engine
//!
//! Drives [`RetryEngine`] through the deterministic scheduler doubles so that
//! retry counts, backoff sequences, breaker transitions and metrics can be
//! asserted without real delays.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ratekeeper_common::error::ErrorClassification;
use ratekeeper_common::resilience::{
    CircuitState, Classify, ErrorKind, MockClock, OperationFailure, RetryPolicy,
};
use ratekeeper_core::testing::{InlineScheduler, ManualScheduler};
use ratekeeper_core::{EngineError, ExecuteOptions, RetryEngine, RetryService, ScheduleError};
use tokio_util::sync::CancellationToken;

/// Custom error type for testing
#[derive(Debug, Clone)]
struct UpstreamError {
    kind: ErrorKind,
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upstream {} error", self.kind)
    }
}

impl std::error::Error for UpstreamError {}

impl Classify for UpstreamError {
    fn error_kind(&self) -> ErrorKind {
        self.kind
    }
}

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(max_attempts)
        .initial_delay(Duration::from_millis(100))
        .max_delay(Duration::from_secs(2))
        .no_jitter()
        .build()
        .expect("valid policy")
}

/// Operation that fails with `kind` until its `succeed_on`-th invocation.
fn flaky(
    calls: &Arc<AtomicU32>,
    succeed_on: u32,
    kind: ErrorKind,
) -> impl FnMut() -> Result<&'static str, UpstreamError> + Send + 'static {
    let calls = Arc::clone(calls);
    move || {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= succeed_on {
            Ok("ok")
        } else {
            Err(UpstreamError { kind })
        }
    }
}

// ============================================================================
// Retry behaviour
// ============================================================================

/// Validates that a permanently failing operation runs exactly max_attempts times.
///
/// # Test Steps
/// 1. Execute an always-failing retryable operation with max_attempts = 4
/// 2. Release every scheduled retry
/// 3. Confirm four invocations and an Operation error carrying the last failure
#[test]
fn test_always_failing_operation_exhausts_attempts() {
    let scheduler = Arc::new(ManualScheduler::new());
    let engine = RetryEngine::new(policy(4), scheduler.clone()).expect("engine");
    let calls = Arc::new(AtomicU32::new(0));

    let mut handle = engine.execute_with_retry(flaky(&calls, u32::MAX, ErrorKind::Timeout), "always-fail");
    assert_eq!(scheduler.run_all(), 3);

    let err = handle.try_result().expect("resolved").expect_err("must fail");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    match err {
        EngineError::Operation { attempts, source, .. } => {
            assert_eq!(attempts, 4);
            assert_eq!(source.kind, ErrorKind::Timeout);
        }
        other => panic!("unexpected error: {other}"),
    }

    let metrics = engine.metrics();
    assert_eq!(metrics.total_attempts, 4);
    assert_eq!(metrics.total_retries, 3);
    assert_eq!(metrics.total_failures, 1);
    assert_eq!(metrics.total_successes, 0);
}

/// Validates success on the K-th attempt.
///
/// Assertions:
/// - Exactly K invocations happen
/// - The success value reaches the handle
/// - K - 1 retries are counted
#[test]
fn test_success_on_third_attempt() {
    let engine = RetryEngine::new(policy(5), Arc::new(InlineScheduler::new())).expect("engine");
    let calls = Arc::new(AtomicU32::new(0));

    let mut handle =
        engine.execute_with_retry(flaky(&calls, 3, ErrorKind::Connection), "succeed-third");

    assert_eq!(handle.try_result().expect("resolved").expect("success"), "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let metrics = engine.metrics();
    assert_eq!(metrics.total_retries, 2);
    assert_eq!(metrics.total_successes, 1);
    assert_eq!(metrics.success_rate(), 1.0 / 3.0);
}

/// Validates the scheduled delays follow the incremental backoff sequence.
///
/// Assertions:
/// - The first retry waits initial_delay
/// - Each later wait doubles, capped at max_delay
/// - The scheduled sequence equals calculate_delay(1..)
#[test]
fn test_scheduled_delays_follow_backoff_sequence() {
    let policy = RetryPolicy::builder()
        .max_attempts(6)
        .initial_delay(Duration::from_millis(100))
        .max_delay(Duration::from_millis(500))
        .no_jitter()
        .build()
        .expect("valid policy");
    let expected: Vec<_> = (1..6).map(|n| policy.calculate_delay(n)).collect();
    let scheduler = Arc::new(InlineScheduler::new());
    let engine = RetryEngine::new(policy, scheduler.clone()).expect("engine");
    let calls = Arc::new(AtomicU32::new(0));

    let _handle = engine.execute_with_retry(flaky(&calls, u32::MAX, ErrorKind::Timeout), "delays");

    let millis: Vec<_> = scheduler.delays().iter().map(Duration::as_millis).collect();
    assert_eq!(millis, vec![100, 200, 400, 500, 500]);
    assert_eq!(scheduler.delays(), expected);
}

/// Validates that classification aborts early on a non-retryable failure.
///
/// Assertions:
/// - A Security failure stops after the first attempt despite max_attempts = 5
/// - No retry is scheduled
#[test]
fn test_non_retryable_failure_aborts_before_max_attempts() {
    let scheduler = Arc::new(InlineScheduler::new());
    let engine = RetryEngine::new(policy(5), scheduler.clone()).expect("engine");
    let calls = Arc::new(AtomicU32::new(0));

    let mut handle = engine.execute_with_retry(flaky(&calls, u32::MAX, ErrorKind::Security), "denied");

    let err = handle.try_result().expect("resolved").expect_err("must fail");
    assert_eq!(err.attempts(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(scheduler.delays().is_empty());
    assert_eq!(engine.metrics().total_retries, 0);
}

/// Validates attempt-count-only mode when classification is switched off.
///
/// Assertions:
/// - Kinds outside every configured set are retried until max_attempts
#[test]
fn test_attempt_count_only_mode_retries_unknown_kinds() {
    let policy = RetryPolicy::builder()
        .max_attempts(3)
        .initial_delay(Duration::from_millis(10))
        .classify_failures(false)
        .build()
        .expect("valid policy");
    let engine = RetryEngine::new(policy, Arc::new(InlineScheduler::new())).expect("engine");
    let calls = Arc::new(AtomicU32::new(0));

    let mut handle =
        engine.execute_with_retry(flaky(&calls, u32::MAX, ErrorKind::Serialization), "unknown");

    let err = handle.try_result().expect("resolved").expect_err("must fail");
    assert_eq!(err.attempts(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// Validates that unknown kinds are not retried while classification is on.
#[test]
fn test_unknown_kind_is_not_retried_by_default() {
    let engine = RetryEngine::new(policy(3), Arc::new(InlineScheduler::new())).expect("engine");

    let mut handle = engine.execute_with_retry(
        || Err::<(), _>(OperationFailure::new(ErrorKind::Other, "mystery")),
        "mystery",
    );

    assert_eq!(handle.try_result().expect("resolved").expect_err("fails").attempts(), 1);
}

// ============================================================================
// Circuit breaker
// ============================================================================

/// Validates the breaker lifecycle end to end on mock time.
///
/// # Test Steps
/// 1. Threshold 2, max_attempts 1, 1s cooldown, 2 successes to close
/// 2. Two failing calls open the breaker
/// 3. A third call is rejected without invoking the operation
/// 4. After the cooldown the next call runs and the breaker is half-open
/// 5. A second success closes the breaker
#[test]
fn test_circuit_breaker_opens_half_opens_and_closes() {
    let clock = MockClock::new();
    let policy = RetryPolicy::builder()
        .max_attempts(1)
        .initial_delay(Duration::from_millis(10))
        .circuit_breaker(2, Duration::from_secs(1), 2)
        .build()
        .expect("valid policy");
    let engine = RetryEngine::with_clock(policy, Arc::new(InlineScheduler::new()), clock.clone())
        .expect("engine");
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
        let mut handle = engine.execute_with_retry(flaky(&calls, u32::MAX, ErrorKind::Connection), "svc");
        assert!(matches!(handle.try_result(), Some(Err(EngineError::Operation { .. }))));
    }
    assert_eq!(engine.circuit_breaker_state(), Some(CircuitState::Open));
    assert_eq!(engine.metrics().active_circuit_breakers, 1);

    let invoked = Arc::new(AtomicU32::new(0));
    let mut rejected = engine.execute_with_retry(flaky(&invoked, 1, ErrorKind::Connection), "svc");
    let err = rejected.try_result().expect("resolved").expect_err("rejected");
    assert!(err.is_circuit_open());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    clock.advance(Duration::from_millis(1_001));
    let mut trial = engine.execute_with_retry(flaky(&invoked, 1, ErrorKind::Connection), "svc");
    assert!(trial.try_result().expect("resolved").is_ok());
    assert_eq!(engine.circuit_breaker_state(), Some(CircuitState::HalfOpen));

    let mut second = engine.execute_with_retry(flaky(&invoked, 1, ErrorKind::Connection), "svc");
    assert!(second.try_result().expect("resolved").is_ok());
    assert_eq!(engine.circuit_breaker_state(), Some(CircuitState::Closed));
    assert_eq!(engine.metrics().active_circuit_breakers, 0);
}

/// Validates manual breaker reset.
#[test]
fn test_reset_circuit_breaker_reopens_traffic() {
    let policy = RetryPolicy::builder()
        .max_attempts(1)
        .circuit_breaker(1, Duration::from_secs(60), 1)
        .build()
        .expect("valid policy");
    let engine = RetryEngine::new(policy, Arc::new(InlineScheduler::new())).expect("engine");

    let _ = engine.execute_with_retry(|| Err::<(), _>(OperationFailure::timeout("slow")), "svc");
    assert!(engine.is_circuit_breaker_open());

    engine.reset_circuit_breaker();
    assert!(!engine.is_circuit_breaker_open());
    let snapshot = engine.circuit_breaker_snapshot().expect("breaker enabled");
    assert_eq!(snapshot.failure_count, 0);
}

// ============================================================================
// Cancellation and scheduling failures
// ============================================================================

/// Validates that cancelling a handle stops pending retries.
///
/// Assertions:
/// - The pending retry resolves as Cancelled without invoking the operation
/// - Cancelled calls touch neither failure metrics nor the breaker
#[test]
fn test_cancel_stops_pending_retry() {
    let scheduler = Arc::new(ManualScheduler::new());
    let engine = RetryEngine::new(policy(3), scheduler.clone()).expect("engine");
    let calls = Arc::new(AtomicU32::new(0));

    let mut handle = engine.execute_with_retry(flaky(&calls, u32::MAX, ErrorKind::Timeout), "cancel");
    handle.cancel();
    assert!(scheduler.run_next());

    let err = handle.try_result().expect("resolved").expect_err("cancelled");
    assert!(matches!(err, EngineError::Cancelled { attempts: 1, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.metrics().total_failures, 0);
    assert_eq!(scheduler.pending(), 0);
}

/// Validates that dropping the handle abandons the call.
#[test]
fn test_dropped_handle_abandons_retries() {
    let scheduler = Arc::new(ManualScheduler::new());
    let engine = RetryEngine::new(policy(3), scheduler.clone()).expect("engine");
    let calls = Arc::new(AtomicU32::new(0));

    drop(engine.execute_with_retry(flaky(&calls, u32::MAX, ErrorKind::Timeout), "dropped"));
    scheduler.run_all();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.metrics().total_attempts, 1);
}

/// Validates that an external cancellation token is honoured.
#[test]
fn test_external_token_cancels_call() {
    let scheduler = Arc::new(ManualScheduler::new());
    let engine = RetryEngine::new(policy(3), scheduler.clone()).expect("engine");
    let calls = Arc::new(AtomicU32::new(0));
    let token = CancellationToken::new();

    let mut handle = engine.execute_with_options(
        flaky(&calls, u32::MAX, ErrorKind::Timeout),
        "token",
        ExecuteOptions::new().with_cancellation(token.clone()),
    );
    token.cancel();
    scheduler.run_all();

    assert!(handle.try_result().expect("resolved").expect_err("cancelled").is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Validates that a saturated scheduler fails the call instead of losing it.
///
/// Assertions:
/// - The handle resolves with Scheduling { Saturated }
/// - The rejection counts as a failure
#[test]
fn test_saturated_scheduler_fails_call() {
    let scheduler = Arc::new(ManualScheduler::with_capacity(0));
    let engine = RetryEngine::new(policy(3), scheduler.clone()).expect("engine");
    let calls = Arc::new(AtomicU32::new(0));

    let mut handle = engine.execute_with_retry(flaky(&calls, u32::MAX, ErrorKind::Timeout), "full");

    let err = handle.try_result().expect("resolved").expect_err("rejected");
    assert!(matches!(
        err,
        EngineError::Scheduling { attempts: 1, source: ScheduleError::Saturated { capacity: 0 }, .. }
    ));
    assert_eq!(engine.metrics().total_failures, 1);
}

/// Validates that retries dropped by a shutting-down scheduler still resolve.
///
/// # Test Steps
/// 1. Queue a retry on a manual scheduler
/// 2. Shut the scheduler down, dropping the queued retry
/// 3. Confirm the handle resolves with Scheduling { ShutDown } and a failure is counted
#[test]
fn test_shutdown_resolves_pending_calls() {
    let scheduler = Arc::new(ManualScheduler::new());
    let engine = RetryEngine::new(policy(3), scheduler.clone()).expect("engine");
    let calls = Arc::new(AtomicU32::new(0));

    let mut handle = engine.execute_with_retry(flaky(&calls, u32::MAX, ErrorKind::Timeout), "shutdown");
    scheduler.shutdown();

    let err = handle.try_result().expect("resolved").expect_err("shut down");
    assert!(matches!(err, EngineError::Scheduling { source: ScheduleError::ShutDown, .. }));
    assert_eq!(engine.metrics().total_failures, 1);
}

// ============================================================================
// Concurrency and async consumers
// ============================================================================

/// Validates the metrics invariant under concurrent callers.
///
/// Assertions:
/// - successes + failures equals the number of calls
/// - attempts equals calls plus retries
#[test]
fn test_metrics_invariant_under_concurrency() {
    let engine = RetryEngine::new(policy(3), Arc::new(InlineScheduler::new())).expect("engine");

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let engine = engine.clone();
            thread::spawn(move || {
                for call in 0..25 {
                    let calls = Arc::new(AtomicU32::new(0));
                    let succeed_on = if (worker + call) % 4 == 0 { u32::MAX } else { 2 };
                    let mut handle =
                        engine.execute_with_retry(flaky(&calls, succeed_on, ErrorKind::Timeout), "load");
                    assert!(handle.try_result().is_some());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread");
    }

    let metrics = engine.metrics();
    assert_eq!(metrics.total_operations(), 200);
    assert_eq!(metrics.total_attempts, metrics.total_operations() + metrics.total_retries);
    assert!(metrics.total_successes + metrics.total_failures <= metrics.total_attempts);
}

/// Validates awaiting a handle through the RetryService port.
#[tokio::test]
async fn test_retry_service_handle_is_awaitable() {
    async fn fetch<S: RetryService>(service: &S) -> Result<&'static str, EngineError<UpstreamError>> {
        let calls = Arc::new(AtomicU32::new(0));
        service.execute_with_retry(flaky(&calls, 2, ErrorKind::Connection), "await").await
    }

    let engine = RetryEngine::new(policy(3), Arc::new(InlineScheduler::new())).expect("engine");

    assert_eq!(fetch(&engine).await.expect("success"), "ok");
    assert_eq!(engine.retry_metrics().total_retries, 1);
}

/// Validates that a pending handle is woken when a scheduled retry resolves it.
#[test]
fn test_pending_handle_is_woken_by_scheduled_retry() -> anyhow::Result<()> {
    let scheduler = Arc::new(ManualScheduler::new());
    let engine = RetryEngine::new(policy(2), scheduler.clone())?;
    let calls = Arc::new(AtomicU32::new(0));

    let handle = engine.execute_with_retry(flaky(&calls, 2, ErrorKind::Connection), "woken");
    let mut pending = tokio_test::task::spawn(handle);
    tokio_test::assert_pending!(pending.poll());

    assert!(scheduler.run_next());
    assert!(pending.is_woken());
    let outcome = tokio_test::assert_ready!(pending.poll());

    assert_eq!(outcome?, "ok");
    Ok(())
}

/// Validates that a blocking caller on a plain thread receives a retried result.
///
/// # Test Steps
/// 1. Hand the handle of a call waiting on its retry to a second thread
/// 2. Block that thread in wait_blocking
/// 3. Release the retry from the test thread and join the waiter
#[test]
fn test_wait_blocking_receives_scheduled_retry() {
    let scheduler = Arc::new(ManualScheduler::new());
    let engine = RetryEngine::new(policy(3), scheduler.clone()).expect("engine");
    let calls = Arc::new(AtomicU32::new(0));

    let handle = engine.execute_with_retry(flaky(&calls, 2, ErrorKind::Connection), "blocking");
    let token = handle.cancellation_token().clone();
    let waiter = thread::spawn(move || handle.wait_blocking());

    assert!(scheduler.run_next());
    let outcome = waiter.join().expect("waiter thread");

    assert_eq!(outcome.expect("success"), "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(token.is_cancelled(), "consumed handle releases its token");
}

// ============================================================================
// Panicking operations
// ============================================================================

/// Validates that an operation panicking inside a scheduled retry resolves the
/// call as panicked rather than as a scheduler shutdown.
///
/// Assertions:
/// - The panic propagates out of the scheduler thread
/// - The handle resolves with OperationPanicked carrying the attempt that panicked
/// - The panic counts as one failed call
#[test]
fn test_panicking_retry_resolves_as_panicked() {
    let scheduler = Arc::new(ManualScheduler::new());
    let engine = RetryEngine::new(policy(3), scheduler.clone()).expect("engine");
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let mut handle = engine.execute_with_retry(
        move || -> Result<&'static str, UpstreamError> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(UpstreamError { kind: ErrorKind::Timeout })
            } else {
                panic!("upstream client bug");
            }
        },
        "panics",
    );

    let ran = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| scheduler.run_next()));
    assert!(ran.is_err());

    let err = handle.try_result().expect("resolved").expect_err("panicked");
    assert!(
        matches!(err, EngineError::OperationPanicked { attempts: 2, ref name } if name == "panics"),
        "unexpected error: {err}"
    );
    assert!(!err.is_retryable());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.pending(), 0);

    let metrics = engine.metrics();
    assert_eq!(metrics.total_attempts, 2);
    assert_eq!(metrics.total_failures, 1);
}
