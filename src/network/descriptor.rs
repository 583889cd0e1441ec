//! User-facing descriptions of network failures.

use serde::Serialize;

use super::error::{ErrorKind, NetworkError};

/// What to tell a person about a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorDetails {
    pub title: &'static str,
    pub details: &'static str,
    pub suggested_action: &'static str,
    /// Stable machine-readable code, e.g. `rate_limited`.
    pub code: &'static str,
}

impl ErrorDetails {
    /// Looks up the description for an error's kind and status.
    #[must_use]
    pub fn for_error(error: &NetworkError) -> Self {
        match (error.kind(), error.status_code()) {
            (ErrorKind::NetworkUnreachable, _) => Self {
                title: "Connection problem",
                details: "Unable to connect to the server.",
                suggested_action: "Please check your internet connection and try again.",
                code: "network_error",
            },
            (ErrorKind::Timeout, _) => Self {
                title: "Request timed out",
                details: "The server took too long to respond.",
                suggested_action: "The server might be experiencing high load. Please try again in a moment.",
                code: "timeout",
            },
            (ErrorKind::ServerError, Some(429)) => Self {
                title: "Too many requests",
                details: "You're making requests too quickly.",
                suggested_action: "Please wait a moment and try again.",
                code: "rate_limited",
            },
            (ErrorKind::ServerError, _) => Self {
                title: "Server error",
                details: "The server is experiencing technical difficulties.",
                suggested_action: "Please try again in a few moments.",
                code: "server_error",
            },
            (ErrorKind::ClientError, Some(404)) => Self {
                title: "Resource not found",
                details: "The requested resource could not be found.",
                suggested_action: "Please refresh the page and try again.",
                code: "not_found",
            },
            (ErrorKind::ClientError, Some(400)) => Self {
                title: "Invalid request",
                details: "There was an issue with your request.",
                suggested_action: "Please check your input and try again.",
                code: "bad_request",
            },
            (ErrorKind::ClientError, _) => Self {
                title: "Request error",
                details: "There was an error with your request.",
                suggested_action: "Please try again.",
                code: "client_error",
            },
            (ErrorKind::Unknown, _) => Self {
                title: "Unexpected error",
                details: "An unexpected error occurred.",
                suggested_action: "Please try again.",
                code: "unknown_error",
            },
        }
    }
}

impl From<&NetworkError> for ErrorDetails {
    fn from(error: &NetworkError) -> Self {
        Self::for_error(error)
    }
}
