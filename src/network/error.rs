//! Error types for the network layer.
//!
//! [`NetworkError`] is the single caller-visible failure type produced by the
//! executor, the probe and the progress streams. Construction-time contract
//! violations use separate types ([`PolicyError`], [`SetupError`]) so they can
//! never be confused with an expected runtime failure.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Category of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No response was received (DNS, connection refused, reset).
    NetworkUnreachable,
    /// The attempt exceeded its deadline.
    Timeout,
    /// HTTP 5xx, or HTTP 429 (rate limited).
    ServerError,
    /// HTTP 4xx other than 429.
    ClientError,
    /// Malformed or unexpected outcome.
    Unknown,
}

impl ErrorKind {
    /// Stable label used in logs and JSON output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetworkUnreachable => "network_unreachable",
            Self::Timeout => "timeout",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::Unknown => "unknown",
        }
    }

    /// Whether a failure of this kind (and status) is worth another attempt.
    ///
    /// | Kind | Retryable |
    /// |------|-----------|
    /// | `NetworkUnreachable` | yes |
    /// | `Timeout` | yes |
    /// | `ServerError` (5xx, 429) | yes |
    /// | `ClientError` | only for 429 |
    /// | `Unknown` | yes |
    #[must_use]
    pub fn is_retryable_for(self, status_code: Option<u16>) -> bool {
        match self {
            Self::NetworkUnreachable | Self::Timeout | Self::ServerError | Self::Unknown => true,
            Self::ClientError => status_code == Some(429),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified network failure.
///
/// Immutable once built: `retryable` is derived from `kind` and `status_code`
/// at construction and cannot drift from them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct NetworkError {
    kind: ErrorKind,
    status_code: Option<u16>,
    message: String,
    retryable: bool,
    detail: Option<String>,
    retry_after: Option<Duration>,
}

impl NetworkError {
    /// Creates an error, deriving `retryable` from `kind` and `status_code`.
    pub fn new(kind: ErrorKind, status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code,
            message: message.into(),
            retryable: kind.is_retryable_for(status_code),
            detail: None,
            retry_after: None,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, None, message)
    }

    /// Creates a transport-level connection error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkUnreachable, None, message)
    }

    /// Creates an unknown-outcome error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, None, message)
    }

    /// Attaches server-provided error text.
    #[must_use]
    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }

    /// Attaches a server-mandated retry delay.
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Server-provided error text (JSON `error`/`message` field or raw body).
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Parsed `Retry-After` header, when the server sent one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// Invalid retry policy parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    /// Multiplier below 1 or not finite would make delays shrink or explode.
    #[error("invalid backoff multiplier {value}: must be finite and >= 1")]
    InvalidMultiplier {
        /// The rejected multiplier.
        value: f64,
    },

    /// The delay cap is below the base delay.
    #[error("max delay {max_ms}ms is below base delay {base_ms}ms")]
    MaxDelayBelowBase {
        /// Base delay in milliseconds.
        base_ms: u128,
        /// Max delay in milliseconds.
        max_ms: u128,
    },
}

/// Failures while setting up a client for a target.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The base endpoint is not an absolute http(s) URL.
    #[error("invalid target URL {url}: {reason}")]
    InvalidTarget {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    HttpClient {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl SetupError {
    /// Creates an invalid-target error.
    pub fn invalid_target(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
