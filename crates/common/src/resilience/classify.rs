//! Failure classification
//!
//! Operations report failures through their own error types. To let a
//! [`RetryPolicy`](super::RetryPolicy) decide whether a failure is worth
//! retrying, those types implement [`Classify`], mapping themselves onto a
//! closed set of [`ErrorKind`]s and, for HTTP-style failures, a status code.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ConfigError;

/// Coarse category of an operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused, reset or unreachable peer.
    Connection,
    /// The operation or a socket read timed out.
    Timeout,
    /// A shared resource (file, lock, pool) could not be acquired.
    ResourceAccess,
    /// The remote side throttled the call.
    RateLimited,
    /// The remote side failed while handling a well formed request.
    Server,
    /// The request itself was rejected.
    Client,
    /// An argument was invalid before any I/O happened.
    InvalidArgument,
    /// Authentication or authorization failure.
    Security,
    /// Encoding or decoding failed.
    Serialization,
    /// Anything else.
    Other,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 10] = [
        Self::Connection,
        Self::Timeout,
        Self::ResourceAccess,
        Self::RateLimited,
        Self::Server,
        Self::Client,
        Self::InvalidArgument,
        Self::Security,
        Self::Serialization,
        Self::Other,
    ];

    /// Stable snake_case name, as used in configuration files.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::ResourceAccess => "resource_access",
            Self::RateLimited => "rate_limited",
            Self::Server => "server",
            Self::Client => "client",
            Self::InvalidArgument => "invalid_argument",
            Self::Security => "security",
            Self::Serialization => "serialization",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| ConfigError::invalid("error_kind", format!("unknown kind '{value}'")))
    }
}

/// Map an HTTP status code onto an [`ErrorKind`].
///
/// Codes outside the 4xx and 5xx ranges map to [`ErrorKind::Other`].
pub fn classify_http_status(status: u16) -> ErrorKind {
    match status {
        408 => ErrorKind::Timeout,
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::Server,
        400..=499 => ErrorKind::Client,
        _ => ErrorKind::Other,
    }
}

/// Implemented by operation error types so retry decisions can inspect them.
pub trait Classify {
    /// Category of this failure.
    fn error_kind(&self) -> ErrorKind;

    /// Status code for protocol-level failures, if one exists.
    fn status_code(&self) -> Option<u16> {
        None
    }
}

impl Classify for std::io::Error {
    fn error_kind(&self) -> ErrorKind {
        use std::io::ErrorKind as Io;

        match self.kind() {
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::BrokenPipe
            | Io::AddrNotAvailable => ErrorKind::Connection,
            Io::TimedOut | Io::WouldBlock => ErrorKind::Timeout,
            Io::NotFound | Io::AlreadyExists => ErrorKind::ResourceAccess,
            Io::PermissionDenied => ErrorKind::Security,
            Io::InvalidInput => ErrorKind::InvalidArgument,
            Io::InvalidData | Io::UnexpectedEof => ErrorKind::Serialization,
            _ => ErrorKind::Other,
        }
    }
}

/// Ready-made failure type for operations without their own error enum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} failure: {message}")]
pub struct OperationFailure {
    kind: ErrorKind,
    status: Option<u16>,
    message: String,
}

impl OperationFailure {
    /// Failure of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, status: None, message: message.into() }
    }

    /// Failure carrying an HTTP status; the kind is derived from the code.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self { kind: classify_http_status(status), status: Some(status), message: message.into() }
    }

    /// Shorthand for [`ErrorKind::Connection`].
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    /// Shorthand for [`ErrorKind::Timeout`].
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Shorthand for [`ErrorKind::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Classify for OperationFailure {
    fn error_kind(&self) -> ErrorKind {
        self.kind
    }

    fn status_code(&self) -> Option<u16> {
        self.status
    }
}
