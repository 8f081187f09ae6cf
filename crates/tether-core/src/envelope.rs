//! The `{ kind, payload }` frame carried over the persistent connection.
//!
//! Routing only ever looks at `kind`. Payloads stay opaque [`Value`]s until a
//! subscriber decodes them into its own tagged type, either the whole
//! envelope through [`Envelope::decode`] (for `#[serde(tag = "kind",
//! content = "payload")]` enums) or just the payload through
//! [`Envelope::payload_as`].
//!
//! There is no version field. Unknown top-level fields are ignored when
//! parsing, so one can be introduced later without breaking older peers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved topic that matches every inbound message.
pub const WILDCARD_TOPIC: &str = "*";

/// Kind used for outbound liveness probes.
pub const HEARTBEAT_KIND: &str = "heartbeat";

/// A single message on the persistent connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Discriminant used for dispatch.
    pub kind: String,
    /// Opaque message body.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Create an envelope from a kind and an already-built payload.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Create an envelope by serializing `payload`.
    pub fn with_payload<T: Serialize>(
        kind: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    /// Parse a text frame.
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize into a text frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode only the payload into `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Decode the whole envelope into an adjacently tagged enum.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(serde_json::json!({
            "kind": self.kind,
            "payload": self.payload,
        }))
    }

    /// Whether this envelope is a heartbeat probe.
    pub fn is_heartbeat(&self) -> bool {
        self.kind == HEARTBEAT_KIND
    }
}

/// Payload of a liveness probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatTick {
    /// Unix timestamp in milliseconds when the probe was emitted.
    pub timestamp: i64,
}

impl HeartbeatTick {
    /// A tick stamped with the current wall-clock time.
    pub fn now() -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Wrap this tick in a heartbeat envelope.
    pub fn into_envelope(self) -> Envelope {
        Envelope::new(
            HEARTBEAT_KIND,
            serde_json::json!({ "timestamp": self.timestamp }),
        )
    }
}
