//! Retry orchestration domain

mod continuation;
pub mod error;
pub mod handle;
pub mod ports;
pub mod service;

pub use error::{EngineError, EngineResult};
pub use handle::RetryHandle;
pub use ports::*;
pub use service::{ExecuteOptions, RetryEngine};
