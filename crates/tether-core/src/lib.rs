//! # tether-core
//!
//! Shared vocabulary for the Tether network core.
//!
//! Both the request executor (`tether-http`) and the connection manager
//! (`tether-realtime`) depend on this crate, and on nothing of each other:
//!
//! - **Envelope**: the `{ kind, payload }` frame used for all connection traffic
//! - **Errors**: [`RequestError`] and its [`FailureKind`] classification
//! - **Backoff**: exponential delay math for request retries and reconnects
//! - **IDs**: [`RequestId`] and [`ConnectionId`] newtypes
//! - **Cancellation**: [`CancellationToken`], the one convention both sides share
//! - **Logging**: `tracing` subscriber setup and test capture

#![deny(unsafe_code)]

pub mod backoff;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;

pub use backoff::ReconnectPolicy;
pub use envelope::{Envelope, HEARTBEAT_KIND, HeartbeatTick, WILDCARD_TOPIC};
pub use errors::{FailureKind, RequestError};
pub use ids::{ConnectionId, ParseIdError, RequestId};

/// Cooperative cancellation handle shared by requests and connections.
pub use tokio_util::sync::CancellationToken;
