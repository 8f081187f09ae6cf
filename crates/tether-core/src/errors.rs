//! Failure taxonomy for request/response calls.
//!
//! Every expected failure mode of the request executor is returned as a
//! [`RequestError`], never thrown across the call boundary. Each variant maps
//! to exactly one [`FailureKind`], which drives the retry decision:
//!
//! | Kind | Retryable |
//! |------|-----------|
//! | `ClientError` | no |
//! | `ServerError` | yes |
//! | `TimeoutError` | yes |
//! | `TransportError` | yes |
//! | `Cancelled` | no |
//! | `RetriesExhausted` | no (terminal) |
//! | `DecodeError` | no |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a request failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The request was rejected for a definitive reason (4xx).
    ClientError,
    /// Transient backend failure (5xx).
    ServerError,
    /// The attempt exceeded its deadline.
    TimeoutError,
    /// No connectivity, or the connection broke mid-exchange.
    TransportError,
    /// The caller aborted the request.
    Cancelled,
    /// Every permitted attempt failed with a retryable error.
    RetriesExhausted,
    /// A successful response body did not match the expected type.
    DecodeError,
}

impl FailureKind {
    /// Whether another attempt may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::ServerError | Self::TimeoutError | Self::TransportError
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
            Self::TimeoutError => "timeout_error",
            Self::TransportError => "transport_error",
            Self::Cancelled => "cancelled",
            Self::RetriesExhausted => "retries_exhausted",
            Self::DecodeError => "decode_error",
        };
        f.write_str(s)
    }
}

/// A classified request failure.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RequestError {
    /// 4xx response, or a request that could not be built at all.
    #[error("client error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Client {
        /// HTTP status code; `None` when the request never left the process.
        status: Option<u16>,
        /// Response body or reason phrase.
        message: String,
    },

    /// 5xx response.
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The attempt did not complete within its deadline.
    #[error("request timed out after {}ms", .after.as_millis())]
    Timeout {
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// Connection refused, reset, DNS failure, and similar.
    #[error("transport error: {message}")]
    Transport {
        /// Error description.
        message: String,
    },

    /// Cancelled by the caller or by `cancel_all`.
    #[error("request cancelled")]
    Cancelled,

    /// Retry budget spent; carries the last retryable failure.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total attempts made, including the first.
        attempts: u32,
        /// The failure observed on the final attempt.
        last: Box<RequestError>,
    },

    /// The response body could not be decoded into the expected type.
    #[error("failed to decode response: {message}")]
    Decode {
        /// HTTP status of the undecodable response.
        status: u16,
        /// Decoder error description.
        message: String,
    },
}

impl RequestError {
    /// Classify an HTTP status that was not a success.
    ///
    /// 5xx is a transient server failure. Every other status is a
    /// definitive rejection: 4xx, and also 1xx and 3xx, which reach here
    /// only when the transport did not resolve them (an unfollowed
    /// redirect will not change on retry), so they count as client errors.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (500..600).contains(&status) {
            Self::Server { status, message }
        } else {
            Self::Client {
                status: Some(status),
                message,
            }
        }
    }

    /// Create a client error for a request that is malformed before sending.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::Client {
            status: None,
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Failure classification.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Client { .. } => FailureKind::ClientError,
            Self::Server { .. } => FailureKind::ServerError,
            Self::Timeout { .. } => FailureKind::TimeoutError,
            Self::Transport { .. } => FailureKind::TransportError,
            Self::Cancelled => FailureKind::Cancelled,
            Self::RetriesExhausted { .. } => FailureKind::RetriesExhausted,
            Self::Decode { .. } => FailureKind::DecodeError,
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// HTTP status, if the failure came from a response.
    ///
    /// For `RetriesExhausted` this is the status of the last attempt.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Client { status, .. } => *status,
            Self::Server { status, .. } | Self::Decode { status, .. } => Some(*status),
            Self::RetriesExhausted { last, .. } => last.status(),
            Self::Timeout { .. } | Self::Transport { .. } | Self::Cancelled => None,
        }
    }

    /// The innermost failure, unwrapping `RetriesExhausted`.
    pub fn root(&self) -> &RequestError {
        match self {
            Self::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}
