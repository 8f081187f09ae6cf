//! Topic-based fan-out of inbound envelopes.
//!
//! Handlers are stored per topic in registration order under stable
//! [`SubscriptionId`]s. A dispatch pass snapshots the handlers it will call
//! before invoking any of them, so subscribing or unsubscribing from inside
//! a handler never disturbs the pass in progress.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use anyhow::Context as _;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tether_core::{Envelope, WILDCARD_TOPIC};
use tracing::{debug, error, warn};

/// Callback invoked for each matching envelope.
pub type Handler = Arc<dyn Fn(&Envelope) -> anyhow::Result<()> + Send + Sync>;

/// Stable identifier for one registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Default)]
struct Topics {
    handlers: Mutex<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl Topics {
    fn remove(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut map = self.handlers.lock();
        let Some(list) = map.get_mut(topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            let _ = map.remove(topic);
        }
        removed
    }
}

/// Routes envelopes to handlers registered for their `kind`, then to
/// wildcard (`"*"`) handlers.
///
/// Cheap to clone; clones share the same topic map.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    topics: Arc<Topics>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("topics", &self.topic_count())
            .finish()
    }
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`. Use `"*"` to receive every envelope.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = SubscriptionId(self.topics.next_id.fetch_add(1, Ordering::Relaxed));
        self.topics
            .handlers
            .lock()
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(topic, subscription = id.0, "subscribed");
        Subscription {
            id,
            topic,
            topics: Arc::downgrade(&self.topics),
            active: AtomicBool::new(true),
        }
    }

    /// Register a handler that receives the payload decoded as `T`.
    ///
    /// A payload that does not decode is reported like any other handler
    /// failure and `handler` is not called.
    pub fn subscribe_typed<T, F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(topic, move |envelope: &Envelope| {
            let value = envelope
                .payload_as::<T>()
                .with_context(|| format!("failed to decode {:?} payload", envelope.kind))?;
            handler(value)
        })
    }

    /// Deliver `envelope` to its topic's handlers, then to wildcard handlers.
    ///
    /// Each handler runs in isolation: an `Err` is logged at warn, a panic at
    /// error, and delivery continues. Returns the number of handlers called.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        let selected = self.select(&envelope.kind);
        for (id, handler) in &selected {
            match catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(topic = %envelope.kind, subscription = id.0, error = %format!("{e:#}"), "event handler failed");
                }
                Err(panic) => {
                    error!(topic = %envelope.kind, subscription = id.0, panic = panic_message(&*panic), "event handler panicked");
                }
            }
        }
        selected.len()
    }

    /// Snapshot the handlers for `kind` followed by the wildcard handlers.
    fn select(&self, kind: &str) -> Vec<(SubscriptionId, Handler)> {
        let map = self.topics.handlers.lock();
        let exact = map.get(kind).into_iter().flatten();
        let wildcard = if kind == WILDCARD_TOPIC {
            None
        } else {
            map.get(WILDCARD_TOPIC)
        };
        exact
            .chain(wildcard.into_iter().flatten())
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect()
    }

    /// Number of handlers registered for `topic`.
    pub fn handler_count(&self, topic: &str) -> usize {
        self.topics.handlers.lock().get(topic).map_or(0, Vec::len)
    }

    /// Number of topics with at least one handler.
    pub fn topic_count(&self) -> usize {
        self.topics.handlers.lock().len()
    }
}

/// Handle for one registration.
///
/// Dropping the handle does not unsubscribe; call [`unsubscribe`](Self::unsubscribe).
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    topics: Weak<Topics>,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the handler. Returns `true` only on the call that removed it.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        let removed = self
            .topics
            .upgrade()
            .is_some_and(|topics| topics.remove(&self.topic, self.id));
        if removed {
            debug!(topic = %self.topic, subscription = self.id.0, "unsubscribed");
        }
        removed
    }

    /// Whether `unsubscribe` has not yet been called.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Registration identifier.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Topic this handler is registered for.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl std::fmt::Debug for Topics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topics").finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
