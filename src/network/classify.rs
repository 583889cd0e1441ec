//! Classification of raw attempt outcomes into [`NetworkError`]s.
//!
//! # Rules (first match wins)
//!
//! | Outcome | Kind | Retryable |
//! |---------|------|-----------|
//! | Deadline exceeded | `Timeout` | yes |
//! | No response (connect/send failure) | `NetworkUnreachable` | yes |
//! | HTTP >= 500 or 429 | `ServerError` | yes |
//! | HTTP 400..500 (not 429) | `ClientError` | no |
//! | Anything else | `Unknown` | yes |

use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use super::error::{ErrorKind, NetworkError};

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Longest server-provided detail kept on an error.
const MAX_DETAIL_CHARS: usize = 512;

/// The raw result of one failed attempt, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// A response arrived with a status outside 2xx.
    Status {
        /// HTTP status code.
        status: u16,
        /// Canonical reason phrase, if known.
        reason: Option<String>,
        /// Server-provided error text.
        detail: Option<String>,
        /// Parsed `Retry-After` header.
        retry_after: Option<Duration>,
    },
    /// The attempt deadline fired before a response arrived.
    TimedOut,
    /// The request never produced a response.
    ConnectionFailed {
        /// Transport error text.
        message: String,
    },
    /// Any other failure (invalid request, undecodable response, ...).
    Other {
        /// Error text.
        message: String,
    },
}

impl AttemptOutcome {
    /// Creates a status outcome with no detail or retry hint.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self::Status {
            status,
            reason: None,
            detail: None,
            retry_after: None,
        }
    }

    /// Maps a reqwest transport error to an outcome.
    #[must_use]
    pub fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::TimedOut
        } else if error.is_connect() || error.is_request() || error.is_body() {
            Self::ConnectionFailed {
                message: error.to_string(),
            }
        } else {
            Self::Other {
                message: error.to_string(),
            }
        }
    }
}

/// Classifies an attempt outcome. Never fails.
#[must_use]
pub fn classify(outcome: &AttemptOutcome) -> NetworkError {
    let error = match outcome {
        AttemptOutcome::TimedOut => NetworkError::timeout("request timed out"),
        AttemptOutcome::ConnectionFailed { message } => {
            NetworkError::unreachable(format!("network request failed: {message}"))
        }
        AttemptOutcome::Status {
            status,
            reason,
            detail,
            retry_after,
        } => {
            let message = match reason {
                Some(reason) => format!("HTTP {status}: {reason}"),
                None => format!("HTTP {status}"),
            };
            NetworkError::new(kind_for_status(*status), Some(*status), message)
                .with_detail(detail.clone())
                .with_retry_after(*retry_after)
        }
        AttemptOutcome::Other { message } => NetworkError::unknown(message.clone()),
    };
    debug!(kind = %error.kind(), status = ?error.status_code(), retryable = error.is_retryable(), "classified failure");
    error
}

/// Maps a non-2xx HTTP status to an error kind.
#[must_use]
pub fn kind_for_status(status: u16) -> ErrorKind {
    match status {
        429 | 500..=u16::MAX => ErrorKind::ServerError,
        400..=499 => ErrorKind::ClientError,
        _ => ErrorKind::Unknown,
    }
}

/// Extracts a human-readable error from a failed response body.
///
/// Prefers a JSON `error` or `message` string field, falls back to the trimmed
/// raw text. Empty bodies yield `None`.
#[must_use]
pub fn extract_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(trimmed)
    {
        let field = map
            .get("error")
            .or_else(|| map.get("message"))
            .or_else(|| map.get("detail"))
            .and_then(serde_json::Value::as_str);
        if let Some(text) = field {
            return Some(truncate(text));
        }
    }

    Some(truncate(trimmed))
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_DETAIL_CHARS).collect()
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds (`120`) and HTTP-dates
/// (`Wed, 21 Oct 2025 07:28:00 GMT`). Returns `None` if the value cannot be
/// parsed. Caps excessive values at 1 hour; dates in the past yield zero.
///
/// ```
/// use std::time::Duration;
/// use firmament_net::network::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };

    match datetime.duration_since(SystemTime::now()) {
        Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
        Err(_) => Some(Duration::ZERO),
    }
}
