//! # Ratekeeper Infrastructure
//!
//! Adapters that plug the retry engine into a real process.
//!
//! This crate contains:
//! - [`TokioDelayScheduler`], the production
//!   [`DelayScheduler`](ratekeeper_core::DelayScheduler)
//! - Configuration loading from environment variables and TOML/JSON files
//! - Tracing subscriber initialisation
//!
//! ## Architecture
//! - Implements traits defined in `ratekeeper-core`
//! - Depends on `ratekeeper-common` and `ratekeeper-core`
//! - Contains all "impure" code (runtimes, files, environment)

pub mod config;
pub mod errors;
pub mod logging;
pub mod scheduling;

// Re-export commonly used items
pub use config::{Config, LoggingSettings, RetrySettings, SchedulerSettings};
pub use errors::{InfraError, InfraResult};
pub use scheduling::{SchedulerError, SchedulerResult, TokioDelayScheduler};
