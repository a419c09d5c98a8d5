//! # Ratekeeper Core
//!
//! Retry orchestration on top of `ratekeeper-common` primitives.
//!
//! This crate contains:
//! - The [`RetryEngine`] orchestrator and its [`RetryHandle`] result type
//! - Port interfaces ([`DelayScheduler`], [`RetryService`])
//! - Deterministic scheduler doubles in [`testing`]
//!
//! ## Architecture Principles
//! - Only depends on `ratekeeper-common` plus tokio's sync primitives
//! - No runtime, timer or thread pool; delays are the scheduler's concern
//! - All external dependencies via traits

pub mod retry;
pub mod testing;

pub use retry::{
    DelayScheduler, EngineError, EngineResult, ExecuteOptions, RetryEngine, RetryHandle,
    RetryService, ScheduleError, ScheduledAttempt,
};
