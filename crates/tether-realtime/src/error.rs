//! Connection error types.

use std::time::Duration;

use thiserror::Error;

/// Failure to open, use, or keep a persistent connection.
///
/// Only [`ConnectionManager::connect`](crate::ConnectionManager::connect)
/// returns these to callers. Losses after a successful handshake surface as
/// state changes instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The server rejected or failed the opening handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The handshake did not finish within the connect timeout.
    #[error("handshake timed out after {}ms", .0.as_millis())]
    HandshakeTimeout(Duration),

    /// The link failed while reading or writing.
    #[error("transport error: {0}")]
    Transport(String),

    /// The link is already closed.
    #[error("connection closed")]
    Closed,

    /// `disconnect()` (or a newer `connect()`) superseded this attempt.
    #[error("connection attempt aborted")]
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_in_millis() {
        let err = ConnectionError::HandshakeTimeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "handshake timed out after 10000ms");
    }

    #[test]
    fn handshake_display_carries_reason() {
        let err = ConnectionError::Handshake("HTTP 403".into());
        assert_eq!(err.to_string(), "handshake failed: HTTP 403");
    }
}
