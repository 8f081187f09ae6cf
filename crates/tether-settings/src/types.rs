//! Settings sections for the HTTP executor, the realtime connection, and logging.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::backoff::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_MAX_RETRIES, DEFAULT_RECONNECT_BASE_MS,
    DEFAULT_RECONNECT_CAP_MS, DEFAULT_RETRY_UNIT_MS,
};
use tether_core::logging::LogFormat;
use tether_core::ReconnectPolicy;

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Request/response executor.
    pub http: HttpSettings,
    /// Persistent connection.
    pub realtime: RealtimeSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl TetherSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.http.timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "http.timeoutMs must be positive".into(),
            ));
        }
        if self.realtime.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "realtime.heartbeatIntervalMs must be positive".into(),
            ));
        }
        if self.realtime.reconnect_cap_ms < self.realtime.reconnect_base_ms {
            return Err(SettingsError::InvalidValue(format!(
                "realtime.reconnectCapMs ({}) is below reconnectBaseMs ({})",
                self.realtime.reconnect_cap_ms, self.realtime.reconnect_base_ms
            )));
        }
        Ok(())
    }
}

/// Request executor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpSettings {
    /// Base URL that request paths are joined onto.
    pub base_url: String,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Additional attempts after the first for retryable failures.
    pub max_retries: u32,
    /// Backoff unit in milliseconds; retry k waits `unit * 2^(k-1)`.
    pub retry_unit_ms: u64,
    /// Headers sent with every request unless overridden per request.
    pub default_headers: BTreeMap<String, String>,
}

impl HttpSettings {
    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Retry backoff unit.
    pub fn retry_unit(&self) -> Duration {
        Duration::from_millis(self.retry_unit_ms)
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_ms: 30_000,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_unit_ms: DEFAULT_RETRY_UNIT_MS,
            default_headers: BTreeMap::new(),
        }
    }
}

/// Persistent connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// WebSocket URL.
    pub url: String,
    /// Delay before the first reconnect attempt, in milliseconds.
    pub reconnect_base_ms: u64,
    /// Upper bound on any reconnect delay, in milliseconds.
    pub reconnect_cap_ms: u64,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Heartbeat probe interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl RealtimeSettings {
    /// Reconnect schedule built from these settings.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.reconnect_base_ms),
            Duration::from_millis(self.reconnect_cap_ms),
            self.max_reconnect_attempts,
        )
    }

    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Handshake timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws".to_string(),
            reconnect_base_ms: DEFAULT_RECONNECT_BASE_MS,
            reconnect_cap_ms: DEFAULT_RECONNECT_CAP_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
