//! # tether-realtime
//!
//! One persistent, message-framed connection kept alive in the background.
//!
//! - [`ConnectionManager`]: state machine, capped exponential reconnect,
//!   outbound `send`, state snapshots and watch
//! - [`EventDispatcher`]: topic → handler fan-out with isolated handler
//!   failures and idempotent [`Subscription`]s
//! - [`HeartbeatScheduler`]: fire-and-forget liveness probes while connected
//! - [`Connector`] / [`Link`]: transport seam; [`TungsteniteConnector`] speaks
//!   WebSocket
//!
//! Connection loss is reported only through [`ConnectionState`], never as an
//! error from a background task.

#![deny(unsafe_code)]

pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod manager;
pub mod state;
pub mod transport;

pub use dispatcher::{EventDispatcher, Handler, Subscription, SubscriptionId};
pub use error::ConnectionError;
pub use heartbeat::{HeartbeatResult, HeartbeatScheduler, MIN_HEARTBEAT_INTERVAL, run_heartbeat};
pub use manager::ConnectionManager;
pub use state::{ConnectionSnapshot, ConnectionState, RealtimeConfig};
pub use transport::{Connector, Link, TungsteniteConnector, WsLink};
