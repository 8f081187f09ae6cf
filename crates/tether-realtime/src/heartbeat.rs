//! Fire-and-forget liveness probes.

use std::time::Duration;

use tether_core::{CancellationToken, Envelope, HeartbeatTick};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Shortest interval the loop will run at.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The scheduler was stopped.
    Cancelled,
    /// The outbound channel closed, meaning the link is gone.
    ChannelClosed,
}

/// Send a heartbeat envelope on `outbound` every `interval`.
///
/// The first probe goes out one full interval after the call. Probes are
/// never acknowledged; a full outbound buffer skips the probe rather than
/// waiting. Intervals below [`MIN_HEARTBEAT_INTERVAL`] are raised to it.
pub async fn run_heartbeat(
    outbound: mpsc::Sender<Envelope>,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let interval = clamp_interval(interval);
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
            _ = ticker.tick() => {
                let tick = HeartbeatTick::now();
                match outbound.try_send(tick.into_envelope()) {
                    Ok(()) => debug!(timestamp = tick.timestamp, "heartbeat sent"),
                    Err(TrySendError::Full(_)) => warn!("outbound buffer full, skipping heartbeat"),
                    Err(TrySendError::Closed(_)) => return HeartbeatResult::ChannelClosed,
                }
            }
        }
    }
}

fn clamp_interval(interval: Duration) -> Duration {
    if interval < MIN_HEARTBEAT_INTERVAL {
        warn!(
            requested_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            min_ms = u64::try_from(MIN_HEARTBEAT_INTERVAL.as_millis()).unwrap_or(u64::MAX),
            "heartbeat interval too short, using minimum"
        );
        MIN_HEARTBEAT_INTERVAL
    } else {
        interval
    }
}

/// Owns the one heartbeat task for a connection.
///
/// Dropping the scheduler stops the task.
#[derive(Debug)]
pub struct HeartbeatScheduler {
    cancel: CancellationToken,
    handle: Option<JoinHandle<HeartbeatResult>>,
}

impl HeartbeatScheduler {
    /// Spawn the heartbeat loop.
    pub fn start(interval: Duration, outbound: mpsc::Sender<Envelope>) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(outbound, interval, cancel.clone()));
        debug!(
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "heartbeat started"
        );
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Stop the loop. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) -> Option<HeartbeatResult> {
        self.cancel.cancel();
        self.handle.take()?.await.ok()
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
