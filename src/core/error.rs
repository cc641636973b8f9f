//! Unified error handling for reqflow
//!
//! Three families live here: the crate-level [`Error`] used by configuration
//! and setup code, [`RequestError`] which is attached to a request record and
//! surfaced to its failure callbacks, and [`CacheError`] which only the cache
//! API returns.

use std::{fmt, time::Duration};

/// Crate-level error for configuration, logging and context setup
#[derive(Debug)]
pub enum Error {
    /// Configuration-related errors
    Configuration(String),

    /// File system and I/O errors
    Io(std::io::Error),

    /// YAML (de)serialization errors
    Yaml(serde_yaml::Error),

    /// Declarative validation failures
    Validation(validator::ValidationErrors),

    /// Logger installation errors
    Logger(String),

    /// Internal system errors
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::Yaml(err) => write!(f, "YAML error: {err}"),
            Error::Validation(err) => write!(f, "Validation error: {err}"),
            Error::Logger(msg) => write!(f, "Logger error: {msg}"),
            Error::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Yaml(err) => Some(err),
            Error::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Yaml(err)
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Error::Validation(err)
    }
}

/// Result type alias for setup operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> Result<T> {
        self.map_err(|e| Error::Internal(format!("{context}: {e}")))
    }
}

/// Convenience macros for error creation
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::error::Error::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::Error::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::core::error::Error::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::Error::Internal(format!($fmt, $($arg)*))
    };
}

/// Category of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection, DNS, TLS or any other network level failure
    Network,
    /// The per-request timeout elapsed before a response arrived
    Timeout,
    /// The transport operation was cancelled
    Cancelled,
    /// Anything else the transport reports
    Other,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Network => "network",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Cancelled => "cancelled",
            TransportErrorKind::Other => "other",
        }
    }
}

/// Error reported by a [`Transport`](crate::core::traits::Transport)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            TransportErrorKind::Timeout,
            format!("request timed out after {}ms", after.as_millis()),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(TransportErrorKind::Cancelled, "request cancelled")
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} transport error: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for TransportError {}

/// Kind of a request failure, independent of its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestErrorKind {
    Transport,
    Timeout,
    InvalidStatusCode,
    InvalidResponseFormat,
    Submission,
}

/// Failure attached to a request record before any completion hook runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Network or timeout failure passed through from the transport
    Transport(TransportError),

    /// The response status code is outside the accepted set
    InvalidStatusCode(u16),

    /// The response body failed decoding or the configured validator
    InvalidResponseFormat(String),

    /// The request could not be handed to the transport
    Submission(String),
}

impl RequestError {
    pub fn kind(&self) -> RequestErrorKind {
        match self {
            RequestError::Transport(err) if err.kind() == TransportErrorKind::Timeout => {
                RequestErrorKind::Timeout
            }
            RequestError::Transport(_) => RequestErrorKind::Transport,
            RequestError::InvalidStatusCode(_) => RequestErrorKind::InvalidStatusCode,
            RequestError::InvalidResponseFormat(_) => RequestErrorKind::InvalidResponseFormat,
            RequestError::Submission(_) => RequestErrorKind::Submission,
        }
    }

    /// The underlying transport error, if the failure came from the transport
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            RequestError::Transport(err) => Some(err),
            _ => None,
        }
    }

    /// One line description suitable for showing to an end user.
    ///
    /// The HTTP status range wins over the error payload when a status code
    /// is known, matching how servers usually explain themselves better than
    /// the client can.
    pub fn summary(&self, status_code: Option<u16>) -> String {
        if let Some(code) = status_code {
            match code {
                400..=499 => return format!("Client error (HTTP status {code})"),
                500..=599 => return format!("Server error, please retry (HTTP status {code})"),
                _ => {}
            }
        }
        match self {
            RequestError::Transport(err) => match err.kind() {
                TransportErrorKind::Timeout => "Request timed out, please retry".to_string(),
                TransportErrorKind::Cancelled => String::new(),
                TransportErrorKind::Network => {
                    "Network unavailable, please check your connection".to_string()
                }
                TransportErrorKind::Other => format!("Network error: {}", err.message()),
            },
            RequestError::InvalidStatusCode(code) => format!("Unexpected HTTP status {code}"),
            RequestError::InvalidResponseFormat(_) => "Malformed server response".to_string(),
            RequestError::Submission(msg) => format!("Request not sent: {msg}"),
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Transport(err) => write!(f, "{err}"),
            RequestError::InvalidStatusCode(code) => write!(f, "Invalid status code: {code}"),
            RequestError::InvalidResponseFormat(msg) => {
                write!(f, "Invalid response format: {msg}")
            }
            RequestError::Submission(msg) => write!(f, "Submission failed: {msg}"),
        }
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RequestError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for RequestError {
    fn from(err: TransportError) -> Self {
        RequestError::Transport(err)
    }
}

/// Errors produced by the cache API.
///
/// None of these ever reach a request's failure callback; the lifecycle
/// treats all of them as "no cache" and goes to the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The policy's cache time is negative
    InvalidTimeConfiguration(i64),

    /// Metadata exists but could not be read or decoded
    MetadataUnreadable(String),

    /// Metadata is valid but the cached body is missing or undecodable
    DataUnreadable(String),

    /// The entry is older than the policy allows, or dated in the future
    Expired { age_millis: i64, limit_secs: i64 },

    /// Stored cache version or client version differs from the current one
    VersionMismatch { stored: String, current: String },

    /// Persisting the response failed
    WriteFailed(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::InvalidTimeConfiguration(secs) => {
                write!(f, "Invalid cache time configuration: {secs}s")
            }
            CacheError::MetadataUnreadable(msg) => write!(f, "Cache metadata unreadable: {msg}"),
            CacheError::DataUnreadable(msg) => write!(f, "Cache data unreadable: {msg}"),
            CacheError::Expired {
                age_millis,
                limit_secs,
            } => write!(f, "Cache expired: age {age_millis}ms, limit {limit_secs}s"),
            CacheError::VersionMismatch { stored, current } => {
                write!(f, "Cache version mismatch: stored {stored}, current {current}")
            }
            CacheError::WriteFailed(msg) => write!(f, "Cache write failed: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Result type alias for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;
