//! Configuration loader
//!
//! Loads [`Config`] from environment variables or files.
//!
//! ## Loading Strategy
//! 1. If any `RATEKEEPER_*` variable is set, build the config from defaults
//!    overlaid with the environment
//! 2. Otherwise load the first config file found by [`probe_config_paths`]
//! 3. Files may be TOML or JSON, picked by extension
//!
//! Either way the result is validated before it is returned, so a policy
//! the engine would reject never leaves this module.
//!
//! ## Environment Variables
//! - `RATEKEEPER_RETRY_MAX_ATTEMPTS`: Total attempts including the first
//! - `RATEKEEPER_RETRY_INITIAL_DELAY_MS`: Delay before the first retry
//! - `RATEKEEPER_RETRY_MAX_DELAY_MS`: Cap on any single delay
//! - `RATEKEEPER_RETRY_BACKOFF_MULTIPLIER`: Growth factor between delays
//! - `RATEKEEPER_RETRY_JITTER_FACTOR`: Relative jitter in `[0, 1]`
//! - `RATEKEEPER_RETRY_EXPONENTIAL`: Geometric growth on/off
//! - `RATEKEEPER_RETRY_CLASSIFY_FAILURES`: Stop early on non-retryable failures
//! - `RATEKEEPER_RETRY_RETRYABLE_KINDS`: Comma separated kinds, e.g. `connection,timeout`
//! - `RATEKEEPER_RETRY_RETRYABLE_STATUSES`: Comma separated status codes
//! - `RATEKEEPER_RETRY_NON_RETRYABLE_KINDS`: Kinds that end a call immediately
//! - `RATEKEEPER_RETRY_NON_RETRYABLE_STATUSES`: Status codes that end a call immediately
//! - `RATEKEEPER_BREAKER_ENABLED`: Circuit breaker on/off
//! - `RATEKEEPER_BREAKER_FAILURE_THRESHOLD`: Failures that open the breaker
//! - `RATEKEEPER_BREAKER_TIMEOUT_MS`: Open cooldown
//! - `RATEKEEPER_BREAKER_MIN_CALLS`: Half-open successes needed to close
//! - `RATEKEEPER_SCHEDULER_THREADS`: Scheduler worker threads
//! - `RATEKEEPER_SCHEDULER_MAX_PENDING`: Retries allowed to wait at once
//! - `RATEKEEPER_SCHEDULER_THREAD_NAME`: Name given to scheduler threads
//! - `RATEKEEPER_LOG_FILTER`: Default `EnvFilter` directive
//! - `RATEKEEPER_LOG_JSON`: JSON log output on/off
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./ratekeeper.toml`, `./ratekeeper.json`
//! 2. `./config/ratekeeper.toml`, `./config/ratekeeper.json`
//! 3. The same two layouts next to the executable

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ratekeeper_common::resilience::ErrorKind;

use super::settings::Config;
use crate::errors::{InfraError, InfraResult};

const MAX_ATTEMPTS: &str = "RATEKEEPER_RETRY_MAX_ATTEMPTS";
const INITIAL_DELAY_MS: &str = "RATEKEEPER_RETRY_INITIAL_DELAY_MS";
const MAX_DELAY_MS: &str = "RATEKEEPER_RETRY_MAX_DELAY_MS";
const BACKOFF_MULTIPLIER: &str = "RATEKEEPER_RETRY_BACKOFF_MULTIPLIER";
const JITTER_FACTOR: &str = "RATEKEEPER_RETRY_JITTER_FACTOR";
const EXPONENTIAL: &str = "RATEKEEPER_RETRY_EXPONENTIAL";
const CLASSIFY_FAILURES: &str = "RATEKEEPER_RETRY_CLASSIFY_FAILURES";
const RETRYABLE_KINDS: &str = "RATEKEEPER_RETRY_RETRYABLE_KINDS";
const RETRYABLE_STATUSES: &str = "RATEKEEPER_RETRY_RETRYABLE_STATUSES";
const NON_RETRYABLE_KINDS: &str = "RATEKEEPER_RETRY_NON_RETRYABLE_KINDS";
const NON_RETRYABLE_STATUSES: &str = "RATEKEEPER_RETRY_NON_RETRYABLE_STATUSES";
const BREAKER_ENABLED: &str = "RATEKEEPER_BREAKER_ENABLED";
const BREAKER_FAILURE_THRESHOLD: &str = "RATEKEEPER_BREAKER_FAILURE_THRESHOLD";
const BREAKER_TIMEOUT_MS: &str = "RATEKEEPER_BREAKER_TIMEOUT_MS";
const BREAKER_MIN_CALLS: &str = "RATEKEEPER_BREAKER_MIN_CALLS";
const SCHEDULER_THREADS: &str = "RATEKEEPER_SCHEDULER_THREADS";
const SCHEDULER_MAX_PENDING: &str = "RATEKEEPER_SCHEDULER_MAX_PENDING";
const SCHEDULER_THREAD_NAME: &str = "RATEKEEPER_SCHEDULER_THREAD_NAME";
const LOG_FILTER: &str = "RATEKEEPER_LOG_FILTER";
const LOG_JSON: &str = "RATEKEEPER_LOG_JSON";

/// Every variable [`load_from_env`] reads.
pub const ENV_VARS: [&str; 20] = [
    MAX_ATTEMPTS,
    INITIAL_DELAY_MS,
    MAX_DELAY_MS,
    BACKOFF_MULTIPLIER,
    JITTER_FACTOR,
    EXPONENTIAL,
    CLASSIFY_FAILURES,
    RETRYABLE_KINDS,
    RETRYABLE_STATUSES,
    NON_RETRYABLE_KINDS,
    NON_RETRYABLE_STATUSES,
    BREAKER_ENABLED,
    BREAKER_FAILURE_THRESHOLD,
    BREAKER_TIMEOUT_MS,
    BREAKER_MIN_CALLS,
    SCHEDULER_THREADS,
    SCHEDULER_MAX_PENDING,
    SCHEDULER_THREAD_NAME,
    LOG_FILTER,
    LOG_JSON,
];

const FILE_STEMS: [&str; 4] =
    ["ratekeeper.toml", "ratekeeper.json", "config/ratekeeper.toml", "config/ratekeeper.json"];

/// Load configuration with automatic fallback strategy
///
/// Uses the environment when any `RATEKEEPER_*` variable is set, a probed
/// config file otherwise.
///
/// # Errors
/// Returns `InfraError` if:
/// - No variable is set and no config file exists
/// - A variable or file holds a malformed value
/// - The resulting settings fail validation
pub fn load() -> InfraResult<Config> {
    if env_configured() {
        let config = load_from_env()?;
        tracing::info!("Configuration loaded from environment variables");
        return Ok(config);
    }

    tracing::debug!("No RATEKEEPER_* variables set, trying file");
    load_from_file(None)
}

/// Like [`load`], but falls back to [`Config::default`] when neither source
/// exists. Malformed sources are still errors.
///
/// # Errors
/// Returns `InfraError` for malformed or invalid configuration.
pub fn load_or_default() -> InfraResult<Config> {
    if env_configured() || probe_config_paths().is_some() {
        return load();
    }

    tracing::info!("No configuration found, using defaults");
    Ok(Config::default())
}

/// Load configuration from environment variables
///
/// Unset variables keep their defaults. At least one variable from
/// [`ENV_VARS`] must be set.
///
/// # Errors
/// Returns `InfraError::Config` when no variable is set or one fails to
/// parse, and `InfraError::InvalidConfig` when the result is out of range.
pub fn load_from_env() -> InfraResult<Config> {
    if !env_configured() {
        return Err(InfraError::config("No RATEKEEPER_* environment variables set"));
    }
    config_from_vars(|key| std::env::var(key).ok())
}

/// Build a config from defaults overlaid with whatever `lookup` returns.
///
/// [`load_from_env`] passes `std::env::var`; tests can pass a map.
///
/// # Errors
/// Same as [`load_from_env`], minus the "nothing set" case.
pub fn config_from_vars<F>(lookup: F) -> InfraResult<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = Config::default();

    let retry = &mut config.retry;
    if let Some(value) = parse_var(&lookup, MAX_ATTEMPTS)? {
        retry.max_attempts = value;
    }
    if let Some(value) = parse_millis(&lookup, INITIAL_DELAY_MS)? {
        retry.initial_delay = value;
    }
    if let Some(value) = parse_millis(&lookup, MAX_DELAY_MS)? {
        retry.max_delay = value;
    }
    if let Some(value) = parse_var(&lookup, BACKOFF_MULTIPLIER)? {
        retry.backoff_multiplier = value;
    }
    if let Some(value) = parse_var(&lookup, JITTER_FACTOR)? {
        retry.jitter_factor = value;
    }
    if let Some(value) = lookup(EXPONENTIAL) {
        retry.exponential_backoff = parse_flag(&value);
    }
    if let Some(value) = lookup(CLASSIFY_FAILURES) {
        retry.classify_failures = parse_flag(&value);
    }
    if let Some(value) = parse_list::<ErrorKind, _>(&lookup, RETRYABLE_KINDS)? {
        retry.retryable_kinds = value;
    }
    if let Some(value) = parse_list::<u16, _>(&lookup, RETRYABLE_STATUSES)? {
        retry.retryable_statuses = value;
    }
    if let Some(value) = parse_list::<ErrorKind, _>(&lookup, NON_RETRYABLE_KINDS)? {
        retry.non_retryable_kinds = value;
    }
    if let Some(value) = parse_list::<u16, _>(&lookup, NON_RETRYABLE_STATUSES)? {
        retry.non_retryable_statuses = value;
    }

    let breaker = &mut retry.circuit_breaker;
    if let Some(value) = lookup(BREAKER_ENABLED) {
        breaker.enabled = parse_flag(&value);
    }
    if let Some(value) = parse_var(&lookup, BREAKER_FAILURE_THRESHOLD)? {
        breaker.failure_threshold = value;
    }
    if let Some(value) = parse_millis(&lookup, BREAKER_TIMEOUT_MS)? {
        breaker.timeout = value;
    }
    if let Some(value) = parse_var(&lookup, BREAKER_MIN_CALLS)? {
        breaker.min_calls = value;
    }

    if let Some(value) = parse_var(&lookup, SCHEDULER_THREADS)? {
        config.scheduler.worker_threads = value;
    }
    if let Some(value) = parse_var(&lookup, SCHEDULER_MAX_PENDING)? {
        config.scheduler.max_pending = value;
    }
    if let Some(value) = lookup(SCHEDULER_THREAD_NAME) {
        config.scheduler.thread_name = value;
    }

    if let Some(value) = lookup(LOG_FILTER) {
        config.logging.filter = value;
    }
    if let Some(value) = lookup(LOG_JSON) {
        config.logging.json = parse_flag(&value);
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. Supports JSON and
/// TOML (detected by file extension).
///
/// # Errors
/// Returns `InfraError` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File cannot be read or parsed
/// - The settings fail validation
pub fn load_from_file(path: Option<PathBuf>) -> InfraResult<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(InfraError::config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            InfraError::config("No config file found in any of the standard locations")
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|source| InfraError::Io { path: config_path.clone(), source })?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content, picking the format by the
/// extension of `path`. Files without an extension are read as TOML.
///
/// # Errors
/// Returns `InfraError::Config` if the format is unsupported or parsing fails.
pub fn parse_config(contents: &str, path: &Path) -> InfraResult<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| InfraError::config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| InfraError::config(format!("Invalid JSON format: {e}"))),
        _ => Err(InfraError::config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe the standard locations for a config file
///
/// Searches the current working directory first, then the directory of the
/// running executable.
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.push(exe_dir.to_path_buf());
        }
    }

    find_config_in(&roots)
}

/// First existing config file under any of `roots`, in order.
pub fn find_config_in(roots: &[PathBuf]) -> Option<PathBuf> {
    roots
        .iter()
        .flat_map(|root| FILE_STEMS.iter().map(move |stem| root.join(stem)))
        .find(|path| path.is_file())
}

fn env_configured() -> bool {
    ENV_VARS.iter().any(|key| std::env::var_os(key).is_some())
}

fn parse_var<T, F>(lookup: &F, key: &str) -> InfraResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| InfraError::config(format!("Invalid {key} value {raw:?}: {e}")))
        })
        .transpose()
}

fn parse_millis<F>(lookup: &F, key: &str) -> InfraResult<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var::<u64, F>(lookup, key)?.map(Duration::from_millis))
}

fn parse_list<T, F>(lookup: &F, key: &str) -> InfraResult<Option<Vec<T>>>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };

    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<T>()
                .map_err(|e| InfraError::config(format!("Invalid entry {item:?} in {key}: {e}")))
        })
        .collect::<InfraResult<Vec<T>>>()
        .map(Some)
}

/// Accepts: `1`, `true`, `yes`, `on` (case-insensitive); anything else is
/// false.
fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
