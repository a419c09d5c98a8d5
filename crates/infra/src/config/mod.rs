//! Configuration loading and management
//!
//! This module provides the configuration model and utilities for loading
//! it from environment variables and files.

pub mod loader;
pub mod settings;

// Re-export commonly used items
pub use loader::{
    config_from_vars, find_config_in, load, load_from_env, load_from_file, load_or_default,
    parse_config, probe_config_paths, ENV_VARS,
};
pub use settings::{BreakerSettings, Config, LoggingSettings, RetrySettings, SchedulerSettings};
