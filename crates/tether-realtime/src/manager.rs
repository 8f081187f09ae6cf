//! Persistent connection lifecycle.
//!
//! [`ConnectionManager`] owns the state machine, the reconnect timer, the
//! heartbeat scheduler, and the driver task that moves frames between the
//! link and the [`EventDispatcher`].
//!
//! Every state change happens under one lock. Each handshake attempt and
//! each established link is tagged with an epoch; `connect`, `disconnect`,
//! and every scheduled reconnect bump it, so callbacks from a superseded
//! attempt see a stale epoch and do nothing.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tether_core::{CancellationToken, ConnectionId, Envelope};
use tether_settings::RealtimeSettings;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::dispatcher::{EventDispatcher, Subscription};
use crate::error::ConnectionError;
use crate::heartbeat::HeartbeatScheduler;
use crate::state::{ConnectionSnapshot, ConnectionState, RealtimeConfig};
use crate::transport::{Connector, Link, TungsteniteConnector};

/// Outbound envelopes buffered between `send` and the link writer.
const OUTBOUND_BUFFER: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

/// Holds at most one cancellable timer. Arming cancels the previous occupant.
#[derive(Debug, Default)]
struct TimerSlot(Option<CancellationToken>);

impl TimerSlot {
    fn arm(&mut self, token: CancellationToken) {
        if let Some(previous) = self.0.replace(token) {
            previous.cancel();
        }
    }

    fn cancel(&mut self) {
        if let Some(token) = self.0.take() {
            token.cancel();
        }
    }

    /// Forget the occupant after it completed on its own.
    fn clear(&mut self) {
        self.0 = None;
    }

    fn is_armed(&self) -> bool {
        self.0.is_some()
    }
}

/// Resources that exist only while `Connected`.
struct LiveLink {
    id: ConnectionId,
    outbound: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
    heartbeat: HeartbeatScheduler,
}

impl LiveLink {
    fn shutdown(self) {
        self.heartbeat.stop();
        self.cancel.cancel();
    }
}

struct Core {
    state: ConnectionState,
    reconnect_attempts: u32,
    epoch: u64,
    /// Scheduled reconnect, including its handshake once the delay elapses.
    reconnect: TimerSlot,
    /// Handshake a caller's `connect()` is waiting on.
    handshake: TimerSlot,
    link: Option<LiveLink>,
}

struct Inner {
    config: RealtimeConfig,
    connector: Arc<dyn Connector>,
    dispatcher: EventDispatcher,
    core: Mutex<Core>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

impl Inner {
    fn transition(&self, core: &mut Core, next: ConnectionState) {
        let previous = core.state;
        if previous == next {
            return;
        }
        core.state = next;
        let _ = self.state_tx.send_replace(next);
        debug!(from = %previous, state = %next, attempts = core.reconnect_attempts, "connection state changed");
    }

    async fn handshake(&self) -> Result<Box<dyn Link>, ConnectionError> {
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, self.connector.connect(&self.config.url)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::HandshakeTimeout(timeout)),
        }
    }

    /// Install a freshly opened link if `epoch` is still current.
    fn establish(
        self: &Arc<Self>,
        link: Box<dyn Link>,
        epoch: u64,
    ) -> Result<ConnectionId, ConnectionError> {
        let mut core = self.core.lock();
        if core.epoch != epoch || core.state != ConnectionState::Connecting {
            drop(core);
            let mut link = link;
            drop(tokio::spawn(async move { link.close().await }));
            return Err(ConnectionError::Aborted);
        }

        core.reconnect.clear();
        core.handshake.clear();
        let (outbound, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let cancel = self.shutdown.child_token();
        let id = ConnectionId::new();
        let heartbeat = HeartbeatScheduler::start(self.config.heartbeat_interval, outbound.clone());
        drop(tokio::spawn(drive(
            Arc::clone(self),
            link,
            rx,
            cancel.clone(),
            epoch,
            id,
        )));

        core.link = Some(LiveLink {
            id,
            outbound,
            cancel,
            heartbeat,
        });
        core.reconnect_attempts = 0;
        self.transition(&mut core, ConnectionState::Connected);
        info!(connection_id = %id, url = %self.config.url, "connected");
        Ok(id)
    }

    /// Driver reported the link gone.
    fn on_link_lost(self: &Arc<Self>, epoch: u64, reason: &str) {
        let mut core = self.core.lock();
        if core.epoch != epoch || core.state != ConnectionState::Connected {
            return;
        }
        warn!(reason, "connection lost");
        if let Some(link) = core.link.take() {
            link.shutdown();
        }
        self.schedule_reconnect(&mut core);
    }

    /// Arm the reconnect timer, or give up when the policy is spent.
    fn schedule_reconnect(self: &Arc<Self>, core: &mut Core) {
        let policy = self.config.policy;
        if !policy.permits(core.reconnect_attempts) {
            warn!(
                attempts = core.reconnect_attempts,
                "reconnect attempts exhausted, giving up"
            );
            core.reconnect.cancel();
            self.transition(core, ConnectionState::Disconnected);
            return;
        }

        let delay = policy.delay_for(core.reconnect_attempts);
        core.reconnect_attempts += 1;
        core.epoch += 1;
        let epoch = core.epoch;
        let token = self.shutdown.child_token();
        core.reconnect.arm(token.clone());
        self.transition(core, ConnectionState::Reconnecting);
        debug!(
            attempt = core.reconnect_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnect scheduled"
        );
        drop(tokio::spawn(Arc::clone(self).reconnect_after(delay, token, epoch)));
    }

    async fn reconnect_after(self: Arc<Self>, delay: Duration, token: CancellationToken, epoch: u64) {
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        {
            let mut core = self.core.lock();
            if core.epoch != epoch || core.state != ConnectionState::Reconnecting {
                return;
            }
            self.transition(&mut core, ConnectionState::Connecting);
        }

        let result = tokio::select! {
            biased;
            () = token.cancelled() => return,
            result = self.handshake() => result,
        };

        match result {
            Ok(link) => {
                if let Err(e) = self.establish(link, epoch) {
                    debug!(error = %e, "reconnect superseded");
                }
            }
            Err(e) => {
                let mut core = self.core.lock();
                if core.epoch != epoch || core.state != ConnectionState::Connecting {
                    return;
                }
                warn!(error = %e, attempt = core.reconnect_attempts, "reconnect attempt failed");
                core.reconnect.clear();
                self.schedule_reconnect(&mut core);
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        match Envelope::from_text(text) {
            Ok(envelope) => {
                let _ = self.dispatcher.dispatch(&envelope);
            }
            Err(e) => warn!(error = %e, len = text.len(), "dropping undecodable frame"),
        }
    }
}

/// Move frames between one link and the dispatcher until either side ends.
async fn drive(
    inner: Arc<Inner>,
    mut link: Box<dyn Link>,
    mut outbound: mpsc::Receiver<Envelope>,
    cancel: CancellationToken,
    epoch: u64,
    id: ConnectionId,
) {
    let reason = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                link.close().await;
                debug!(connection_id = %id, "link closed");
                return;
            }
            frame = link.recv() => match frame {
                Some(Ok(text)) => inner.handle_frame(&text),
                Some(Err(e)) => break e.to_string(),
                None => break "closed by peer".to_string(),
            },
            message = outbound.recv() => {
                let Some(envelope) = message else {
                    break "outbound channel closed".to_string();
                };
                match envelope.to_text() {
                    Ok(text) => {
                        if let Err(e) = link.send(text).await {
                            break e.to_string();
                        }
                    }
                    Err(e) => warn!(kind = %envelope.kind, error = %e, "failed to encode outbound envelope"),
                }
            }
        }
    };
    debug!(connection_id = %id, reason, "driver stopped");
    inner.on_link_lost(epoch, &reason);
}

/// Returns a manual `connect()` to `Disconnected` if its future is dropped
/// or its handshake fails.
struct AttemptGuard<'a> {
    inner: &'a Inner,
    epoch: u64,
    armed: bool,
}

impl AttemptGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut core = self.inner.core.lock();
        if core.epoch == self.epoch && core.state == ConnectionState::Connecting {
            core.handshake.clear();
            self.inner.transition(&mut core, ConnectionState::Disconnected);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public handle
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps one persistent connection open, reconnecting with capped
/// exponential backoff after unexpected losses.
///
/// Dropping the manager closes the link and cancels every timer.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager over a custom connector.
    pub fn new(config: RealtimeConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_dispatcher(config, connector, EventDispatcher::new())
    }

    /// Create a manager that feeds an existing dispatcher.
    pub fn with_dispatcher(
        config: RealtimeConfig,
        connector: Arc<dyn Connector>,
        dispatcher: EventDispatcher,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                dispatcher,
                core: Mutex::new(Core {
                    state: ConnectionState::Disconnected,
                    reconnect_attempts: 0,
                    epoch: 0,
                    reconnect: TimerSlot::default(),
                    handshake: TimerSlot::default(),
                    link: None,
                }),
                state_tx,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Create a WebSocket manager from loaded settings.
    pub fn from_settings(settings: &RealtimeSettings) -> Self {
        Self::new(RealtimeConfig::from(settings), Arc::new(TungsteniteConnector))
    }

    /// Open the connection.
    ///
    /// Does nothing while `Connecting` or `Connected`. From `Reconnecting`
    /// the pending timer is cancelled and a handshake starts immediately.
    /// A failed handshake leaves the manager `Disconnected` and returns the
    /// error; automatic reconnection applies only to links that were open.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let (epoch, token) = {
            let mut core = self.inner.core.lock();
            if matches!(
                core.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                debug!(state = %core.state, "connect ignored");
                return Ok(());
            }
            core.reconnect_attempts = 0;
            core.epoch += 1;
            let token = self.inner.shutdown.child_token();
            core.reconnect.cancel();
            core.handshake.arm(token.clone());
            self.inner.transition(&mut core, ConnectionState::Connecting);
            (core.epoch, token)
        };

        let mut guard = AttemptGuard {
            inner: &self.inner,
            epoch,
            armed: true,
        };
        let result = tokio::select! {
            biased;
            () = token.cancelled() => Err(ConnectionError::Aborted),
            result = self.inner.handshake() => result,
        };

        match result {
            Ok(link) => {
                guard.disarm();
                self.inner.establish(link, epoch).map(|_| ())
            }
            Err(err) => {
                drop(guard);
                warn!(error = %err, url = %self.inner.config.url, "connect failed");
                Err(err)
            }
        }
    }

    /// Close the connection and stop all automatic activity.
    ///
    /// Moves to `ManuallyClosed`; only a later `connect()` reopens.
    pub fn disconnect(&self) {
        let mut core = self.inner.core.lock();
        core.epoch += 1;
        core.reconnect.cancel();
        core.handshake.cancel();
        if let Some(link) = core.link.take() {
            link.shutdown();
        }
        if core.state != ConnectionState::ManuallyClosed {
            self.inner
                .transition(&mut core, ConnectionState::ManuallyClosed);
            info!("disconnected by caller");
        }
    }

    /// Queue `envelope` for delivery.
    ///
    /// Returns `false`, logging a warning, when not `Connected` or when the
    /// outbound buffer is full. Dropped messages are never retried.
    pub fn send(&self, envelope: Envelope) -> bool {
        let core = self.inner.core.lock();
        let link = match (&core.link, core.state) {
            (Some(link), ConnectionState::Connected) => link,
            _ => {
                warn!(kind = %envelope.kind, state = %core.state, "dropping outbound message: not connected");
                return false;
            }
        };
        match link.outbound.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(envelope)) => {
                warn!(kind = %envelope.kind, "dropping outbound message: buffer full");
                false
            }
            Err(TrySendError::Closed(envelope)) => {
                warn!(kind = %envelope.kind, "dropping outbound message: link closed");
                false
            }
        }
    }

    /// Register a handler for inbound envelopes of `topic` (or `"*"`).
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(topic, handler)
    }

    /// Register a handler that receives the payload decoded as `T`.
    pub fn subscribe_typed<T, F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe_typed(topic, handler)
    }

    /// The dispatcher inbound envelopes are routed through.
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Point-in-time state.
    pub fn state(&self) -> ConnectionSnapshot {
        let core = self.inner.core.lock();
        ConnectionSnapshot::new(core.state, core.reconnect_attempts)
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Identifier of the open link, if any.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.inner.core.lock().link.as_ref().map(|l| l.id)
    }

    /// Whether a reconnect attempt is scheduled or in progress.
    pub fn has_pending_timer(&self) -> bool {
        self.inner.core.lock().reconnect.is_armed()
    }

    /// Manager configuration.
    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        let mut core = self.inner.core.lock();
        core.epoch += 1;
        core.reconnect.cancel();
        core.handshake.cancel();
        if let Some(link) = core.link.take() {
            link.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use crate::heartbeat::MIN_HEARTBEAT_INTERVAL;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tether_core::ReconnectPolicy;
    use tether_core::logging::capture_logs;
    use tokio::time::Instant;
    use tracing::Level;

    // ── Mock transport ──────────────────────────────────────────────────

    enum Step {
        Accept,
        Refuse,
        Hang,
    }

    /// Server side of a mock link.
    struct Peer {
        to_client: mpsc::UnboundedSender<String>,
        from_client: mpsc::UnboundedReceiver<String>,
        closed: Arc<AtomicBool>,
    }

    impl Peer {
        fn push(&self, text: &str) {
            self.to_client.send(text.to_string()).unwrap();
        }

        fn push_envelope(&self, kind: &str, payload: serde_json::Value) {
            self.push(&Envelope::new(kind, payload).to_text().unwrap());
        }

        fn received(&mut self) -> Vec<Envelope> {
            let mut out = Vec::new();
            while let Ok(text) = self.from_client.try_recv() {
                out.push(Envelope::from_text(&text).unwrap());
            }
            out
        }
    }

    struct MockLink {
        inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::UnboundedSender<String>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Link for MockLink {
        async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
            self.outbound
                .send(text)
                .map_err(|_| ConnectionError::Closed)
        }

        async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
            self.inbound.recv().await.map(Ok)
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct MockConnector {
        script: Mutex<VecDeque<Step>>,
        attempts: Mutex<Vec<Instant>>,
        peers: mpsc::UnboundedSender<Peer>,
    }

    impl MockConnector {
        fn attempt_times(&self) -> Vec<Instant> {
            self.attempts.lock().clone()
        }

        fn attempt_count(&self) -> usize {
            self.attempts.lock().len()
        }

        fn push(&self, step: Step) {
            self.script.lock().push_back(step);
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn Link>, ConnectionError> {
            self.attempts.lock().push(Instant::now());
            let step = self.script.lock().pop_front().unwrap_or(Step::Refuse);
            match step {
                Step::Accept => {
                    let (to_client, inbound) = mpsc::unbounded_channel();
                    let (outbound, from_client) = mpsc::unbounded_channel();
                    let closed = Arc::new(AtomicBool::new(false));
                    let _ = self.peers.send(Peer {
                        to_client,
                        from_client,
                        closed: Arc::clone(&closed),
                    });
                    Ok(Box::new(MockLink {
                        inbound,
                        outbound,
                        closed,
                    }))
                }
                Step::Refuse => Err(ConnectionError::Handshake("connection refused".into())),
                Step::Hang => std::future::pending().await,
            }
        }
    }

    struct Harness {
        manager: ConnectionManager,
        connector: Arc<MockConnector>,
        peers: mpsc::UnboundedReceiver<Peer>,
    }

    impl Harness {
        async fn next_peer(&mut self) -> Peer {
            self.peers.recv().await.unwrap()
        }
    }

    fn config(policy: ReconnectPolicy) -> RealtimeConfig {
        RealtimeConfig {
            url: "ws://mock/ws".into(),
            policy,
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }

    fn harness_with(policy: ReconnectPolicy, steps: Vec<Step>) -> Harness {
        harness_from(config(policy), steps)
    }

    fn harness_from(config: RealtimeConfig, steps: Vec<Step>) -> Harness {
        let (peers_tx, peers) = mpsc::unbounded_channel();
        let connector = Arc::new(MockConnector {
            script: Mutex::new(steps.into()),
            attempts: Mutex::new(Vec::new()),
            peers: peers_tx,
        });
        let manager = ConnectionManager::new(config, connector.clone());
        Harness {
            manager,
            connector,
            peers,
        }
    }

    fn harness(steps: Vec<Step>) -> Harness {
        harness_with(
            ReconnectPolicy::new(Duration::from_secs(1), Duration::from_secs(5), 3),
            steps,
        )
    }

    async fn wait_for(manager: &ConnectionManager, target: ConnectionState) {
        let mut rx = manager.watch_state();
        tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| *s == target))
            .await
            .expect("state not reached")
            .unwrap();
    }

    // -- connect --

    #[tokio::test(start_paused = true)]
    async fn connect_opens_link() {
        let mut h = harness(vec![Step::Accept]);
        assert_eq!(h.manager.state().state, ConnectionState::Disconnected);

        h.manager.connect().await.unwrap();
        let snap = h.manager.state();
        assert_eq!(snap.state, ConnectionState::Connected);
        assert!(snap.connected);
        assert_eq!(snap.reconnect_attempts, 0);
        assert!(h.manager.connection_id().is_some());
        assert!(!h.manager.has_pending_timer());
        let _peer = h.next_peer().await;
    }

    #[tokio::test(start_paused = true)]
    async fn connect_while_connected_is_noop() {
        let h = harness(vec![Step::Accept, Step::Accept]);
        h.manager.connect().await.unwrap();
        let id = h.manager.connection_id();

        h.manager.connect().await.unwrap();
        assert_eq!(h.connector.attempt_count(), 1);
        assert_eq!(h.manager.connection_id(), id);
        assert_eq!(h.manager.state().state, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_returns_error_without_retry() {
        let h = harness(vec![Step::Refuse]);
        let err = h.manager.connect().await.unwrap_err();
        assert_matches!(err, ConnectionError::Handshake(_));
        assert_eq!(h.manager.state().state, ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.connector.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_is_reported() {
        let h = harness(vec![Step::Hang]);
        let started = Instant::now();
        let err = h.manager.connect().await.unwrap_err();
        assert_eq!(err, ConnectionError::HandshakeTimeout(Duration::from_secs(10)));
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert_eq!(h.manager.state().state, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_aborts_pending_handshake() {
        let h = harness(vec![Step::Hang]);
        let manager = Arc::new(h.manager);
        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.connect().await }
        });
        wait_for(&manager, ConnectionState::Connecting).await;

        manager.disconnect();
        assert_eq!(task.await.unwrap(), Err(ConnectionError::Aborted));
        assert_eq!(manager.state().state, ConnectionState::ManuallyClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn first_handshake_is_not_a_reconnect_timer() {
        let h = harness(vec![Step::Hang]);
        let manager = Arc::new(h.manager);
        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.connect().await }
        });
        wait_for(&manager, ConnectionState::Connecting).await;
        assert!(!manager.has_pending_timer());

        assert_eq!(
            task.await.unwrap(),
            Err(ConnectionError::HandshakeTimeout(Duration::from_secs(10)))
        );
        assert!(!manager.has_pending_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_connect_future_resets_state() {
        let h = harness(vec![Step::Hang]);
        let result = tokio::time::timeout(Duration::from_secs(1), h.manager.connect()).await;
        assert!(result.is_err());
        assert_eq!(h.manager.state().state, ConnectionState::Disconnected);
    }

    // -- traffic --

    #[tokio::test(start_paused = true)]
    async fn inbound_frames_dispatch_in_order() {
        let mut h = harness(vec![Step::Accept]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = h.manager.subscribe("*", move |env| {
            sink.lock().push(env.payload["n"].as_i64().unwrap_or(-1));
            Ok(())
        });

        h.manager.connect().await.unwrap();
        let peer = h.next_peer().await;
        for n in 0..5 {
            peer.push_envelope("tick", json!({"n": n}));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_frames_and_bad_handlers_do_not_break_link() {
        let (logs, _guard) = capture_logs();
        let mut h = harness(vec![Step::Accept]);
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let _bad = h.manager.subscribe("job", |_| panic!("handler bug"));
        let _good = h.manager.subscribe("job", move |_| {
            *sink.lock() += 1;
            Ok(())
        });

        h.manager.connect().await.unwrap();
        let peer = h.next_peer().await;
        peer.push("this is not json");
        peer.push_envelope("job", json!({}));
        peer.push_envelope("job", json!({}));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*seen.lock(), 2);
        assert_eq!(h.manager.state().state, ConnectionState::Connected);
        assert!(logs.has_event(Level::WARN, "dropping undecodable frame"));
        assert!(logs.has_event(Level::ERROR, "event handler panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn send_delivers_only_when_connected() {
        let (logs, _guard) = capture_logs();
        let mut h = harness(vec![Step::Accept]);
        assert!(!h.manager.send(Envelope::new("early", json!(null))));
        assert!(logs.has_event(Level::WARN, "not connected"));

        h.manager.connect().await.unwrap();
        let mut peer = h.next_peer().await;
        assert!(h.manager.send(Envelope::new("update", json!({"id": 1}))));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let received = peer.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, "update");
        assert_eq!(received[0].payload["id"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_runs_only_while_connected() {
        let mut h = harness(vec![Step::Accept]);
        h.manager.connect().await.unwrap();
        let mut peer = h.next_peer().await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        let beats = peer.received();
        assert_eq!(beats.len(), 2);
        assert!(beats.iter().all(Envelope::is_heartbeat));

        h.manager.disconnect();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(peer.received().is_empty());
        assert!(peer.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_heartbeat_interval_keeps_link_up() {
        let policy = ReconnectPolicy::new(Duration::from_secs(1), Duration::from_secs(5), 3);
        let mut h = harness_from(
            RealtimeConfig {
                heartbeat_interval: Duration::ZERO,
                ..config(policy)
            },
            vec![Step::Accept],
        );
        h.manager.connect().await.unwrap();
        let mut peer = h.next_peer().await;

        tokio::time::sleep(MIN_HEARTBEAT_INTERVAL + MIN_HEARTBEAT_INTERVAL / 2).await;
        let beats = peer.received();
        assert_eq!(beats.len(), 1);
        assert!(beats[0].is_heartbeat());
        assert_eq!(h.manager.state().state, ConnectionState::Connected);
        assert_eq!(h.connector.attempt_count(), 1);
    }

    // -- reconnect --

    #[tokio::test(start_paused = true)]
    async fn reconnect_backoff_then_gives_up() {
        let mut h = harness(vec![Step::Accept, Step::Refuse, Step::Refuse, Step::Refuse]);
        h.manager.connect().await.unwrap();
        let peer = h.next_peer().await;

        let lost_at = Instant::now();
        drop(peer);
        wait_for(&h.manager, ConnectionState::Reconnecting).await;
        assert!(h.manager.has_pending_timer());

        wait_for(&h.manager, ConnectionState::Disconnected).await;
        let times = h.connector.attempt_times();
        assert_eq!(times.len(), 4);
        assert_eq!(times[1] - lost_at, Duration::from_secs(1));
        assert_eq!(times[2] - times[1], Duration::from_secs(2));
        assert_eq!(times[3] - times[2], Duration::from_secs(4));

        let snap = h.manager.state();
        assert_eq!(snap.state, ConnectionState::Disconnected);
        assert_eq!(snap.reconnect_attempts, 3);
        assert!(!h.manager.has_pending_timer());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.connector.attempt_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_capped() {
        let policy = ReconnectPolicy::new(Duration::from_secs(1), Duration::from_secs(3), 5);
        let mut h = harness_with(
            policy,
            vec![Step::Accept, Step::Refuse, Step::Refuse, Step::Refuse, Step::Refuse],
        );
        h.manager.connect().await.unwrap();
        drop(h.next_peer().await);
        wait_for(&h.manager, ConnectionState::Disconnected).await;

        let times = h.connector.attempt_times();
        let gaps: Vec<Duration> = times.windows(2).skip(1).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(3),
                Duration::from_secs(3),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn successful_reconnect_resets_attempts() {
        let mut h = harness(vec![Step::Accept, Step::Refuse, Step::Accept]);
        h.manager.connect().await.unwrap();
        let first_id = h.manager.connection_id();
        drop(h.next_peer().await);

        let _second = h.next_peer().await;
        wait_for(&h.manager, ConnectionState::Connected).await;
        let snap = h.manager.state();
        assert_eq!(snap.reconnect_attempts, 0);
        assert_ne!(h.manager.connection_id(), first_id);
        assert_eq!(h.connector.attempt_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_while_reconnecting_cancels_timer() {
        let mut h = harness(vec![Step::Accept, Step::Accept]);
        h.manager.connect().await.unwrap();
        drop(h.next_peer().await);
        wait_for(&h.manager, ConnectionState::Reconnecting).await;

        h.manager.disconnect();
        assert!(!h.manager.has_pending_timer());
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(h.connector.attempt_count(), 1);
        assert_eq!(h.manager.state().state, ConnectionState::ManuallyClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_connect_preempts_reconnect_timer() {
        let mut h = harness(vec![Step::Accept, Step::Accept]);
        h.manager.connect().await.unwrap();
        drop(h.next_peer().await);
        wait_for(&h.manager, ConnectionState::Reconnecting).await;

        h.manager.connect().await.unwrap();
        assert_eq!(h.manager.state().state, ConnectionState::Connected);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.connector.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_then_connect_again() {
        let mut h = harness(vec![Step::Accept, Step::Accept]);
        h.manager.connect().await.unwrap();
        let peer = h.next_peer().await;

        h.manager.disconnect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(peer.closed.load(Ordering::SeqCst));
        assert!(!h.manager.send(Envelope::new("x", json!(null))));

        h.manager.connect().await.unwrap();
        assert_eq!(h.manager.state().state, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_state_observes_transitions() {
        let mut h = harness(vec![Step::Accept, Step::Refuse]);
        let mut rx = h.manager.watch_state();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let watcher = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                sink.lock().push(state);
            }
        });

        h.manager.connect().await.unwrap();
        drop(h.next_peer().await);
        // three refusals exhaust the policy
        wait_for(&h.manager, ConnectionState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.connector.push(Step::Accept);
        h.manager.connect().await.unwrap();
        h.manager.disconnect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        watcher.abort();

        let seen = seen.lock().clone();
        assert!(seen.contains(&ConnectionState::Connected));
        assert!(seen.contains(&ConnectionState::Reconnecting));
        assert!(seen.contains(&ConnectionState::Disconnected));
        assert_eq!(seen.last(), Some(&ConnectionState::ManuallyClosed));
    }
}
