//! Small helpers shared across the workspace
//!
//! - **[`serde`]**: millisecond encodings for `Duration` fields

pub mod serde;

pub use self::serde::{duration_millis, option_duration_millis};
