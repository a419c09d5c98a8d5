//! Delay scheduling on tokio
//!
//! [`TokioDelayScheduler`] is the production [`DelayScheduler`] for the
//! retry engine:
//! - Bounded number of retries waiting at once
//! - Explicit shutdown that drains or drops pending retries
//! - Cancellation token support, so a cancelled call wakes up early
//! - Operations run on the blocking pool, never on an async worker
//!
//! [`DelayScheduler`]: ratekeeper_core::DelayScheduler

pub mod delay_scheduler;
pub mod error;

pub use delay_scheduler::TokioDelayScheduler;
pub use error::{SchedulerError, SchedulerResult};
