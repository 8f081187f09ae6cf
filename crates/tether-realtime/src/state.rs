//! Connection state machine vocabulary and runtime configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::ReconnectPolicy;
use tether_settings::RealtimeSettings;

/// Lifecycle state of the persistent connection.
///
/// ```text
/// Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
///      ▲                          │                  │ link lost
///      │ caller handshake fails ◀─┘                  ▼
///      ├──────── attempts spent ◀──────────── Reconnecting ◀─┐
///      │                                        │ timer       │ fail
///      │                                        ▼             │
///      │                                    Connecting ───────┘
///
/// any ──disconnect()──▶ ManuallyClosed
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Idle; nothing scheduled.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Link open; heartbeats running.
    Connected,
    /// Waiting on the reconnect timer.
    Reconnecting,
    /// Closed by the caller; no automatic reconnection.
    ManuallyClosed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::ManuallyClosed => "manually_closed",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of the connection for display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    /// Current state.
    pub state: ConnectionState,
    /// `state == Connected`.
    pub connected: bool,
    /// `state == Connecting`.
    pub connecting: bool,
    /// Reconnect attempts since the last successful handshake.
    pub reconnect_attempts: u32,
}

impl ConnectionSnapshot {
    pub(crate) fn new(state: ConnectionState, reconnect_attempts: u32) -> Self {
        Self {
            state,
            connected: state == ConnectionState::Connected,
            connecting: state == ConnectionState::Connecting,
            reconnect_attempts,
        }
    }
}

/// Runtime configuration for a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    /// WebSocket URL.
    pub url: String,
    /// Reconnect schedule.
    pub policy: ReconnectPolicy,
    /// Interval between heartbeat probes.
    pub heartbeat_interval: Duration,
    /// Upper bound on each handshake.
    pub connect_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self::from(&RealtimeSettings::default())
    }
}

impl From<&RealtimeSettings> for RealtimeConfig {
    fn from(settings: &RealtimeSettings) -> Self {
        Self {
            url: settings.url.clone(),
            policy: settings.reconnect_policy(),
            heartbeat_interval: settings.heartbeat_interval(),
            connect_timeout: settings.connect_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_flags_follow_state() {
        let snap = ConnectionSnapshot::new(ConnectionState::Connected, 0);
        assert!(snap.connected);
        assert!(!snap.connecting);

        let snap = ConnectionSnapshot::new(ConnectionState::Reconnecting, 2);
        assert!(!snap.connected);
        assert!(!snap.connecting);
        assert_eq!(snap.reconnect_attempts, 2);
    }

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::ManuallyClosed.to_string(), "manually_closed");
    }

    #[test]
    fn config_from_default_settings() {
        let cfg = RealtimeConfig::default();
        assert_eq!(cfg.url, "ws://127.0.0.1:8000/ws");
        assert_eq!(cfg.policy.base, Duration::from_secs(5));
        assert_eq!(cfg.policy.cap, Duration::from_secs(30));
        assert_eq!(cfg.policy.max_attempts, 10);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let v = serde_json::to_value(ConnectionSnapshot::new(ConnectionState::Connecting, 1)).unwrap();
        assert_eq!(v["state"], "connecting");
        assert_eq!(v["reconnectAttempts"], 1);
    }
}
