//! Generic fan-out registry for inbound frame observers.
//!
//! Listeners have no protocol knowledge: every parsed inbound frame is
//! delivered to all of them in registration order, whether or not it also
//! matched a pending request or standing subscription.

use crate::models::ServerFrame;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A capability-object observer, for listeners that carry state.
pub trait MessageHandler: Send + Sync {
    /// Called for every inbound frame.
    fn on_message(&self, frame: &ServerFrame);
}

/// A registered frame observer: either a plain callback or an object with an
/// `on_message` capability.
#[derive(Clone)]
pub enum MessageListener {
    /// Plain callback.
    Callback(Arc<dyn Fn(&ServerFrame) + Send + Sync>),
    /// Capability object.
    Handler(Arc<dyn MessageHandler>),
}

impl MessageListener {
    /// Wrap a plain callback.
    pub fn callback(f: impl Fn(&ServerFrame) + Send + Sync + 'static) -> Self {
        MessageListener::Callback(Arc::new(f))
    }

    /// Wrap a capability object.
    pub fn handler(h: Arc<dyn MessageHandler>) -> Self {
        MessageListener::Handler(h)
    }

    /// Identity comparison: two listeners are the same only if they share
    /// the same underlying allocation.
    pub fn same_identity(&self, other: &Self) -> bool {
        match (self, other) {
            (MessageListener::Callback(a), MessageListener::Callback(b)) => Arc::ptr_eq(a, b),
            (MessageListener::Handler(a), MessageListener::Handler(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn invoke(&self, frame: &ServerFrame) {
        match self {
            MessageListener::Callback(f) => f(frame),
            MessageListener::Handler(h) => h.on_message(frame),
        }
    }
}

/// Ordered collection of [`MessageListener`]s.
///
/// Duplicates (by identity) are rejected silently. Dispatch iterates over a
/// snapshot, so a listener may add or remove listeners without corrupting
/// the iteration, and a panicking listener does not stop delivery to the
/// rest.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Vec<MessageListener>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single listener. Returns the number added (0 or 1).
    pub fn add(&mut self, listener: MessageListener) -> usize {
        self.add_all(vec![listener])
    }

    /// Register several listeners, skipping any already present.
    /// Returns the number actually added.
    pub fn add_all(&mut self, listeners: Vec<MessageListener>) -> usize {
        let mut added = 0;
        for listener in listeners {
            if self
                .listeners
                .iter()
                .any(|existing| existing.same_identity(&listener))
            {
                continue;
            }
            self.listeners.push(listener);
            added += 1;
        }
        log::debug!(
            "registered {} new message listener(s), {} total",
            added,
            self.listeners.len()
        );
        added
    }

    /// Remove a listener by identity. Absent entries are ignored.
    /// Returns the number removed.
    pub fn remove(&mut self, listener: &MessageListener) -> usize {
        self.remove_all(std::slice::from_ref(listener))
    }

    /// Remove several listeners by identity. Returns the number removed.
    pub fn remove_all(&mut self, listeners: &[MessageListener]) -> usize {
        let before = self.listeners.len();
        self.listeners
            .retain(|existing| !listeners.iter().any(|l| existing.same_identity(l)));
        let removed = before - self.listeners.len();
        log::debug!(
            "removed {} message listener(s), {} remaining",
            removed,
            self.listeners.len()
        );
        removed
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver `frame` synchronously to every listener in registration
    /// order. A panicking listener is logged and skipped.
    pub fn dispatch(&self, frame: &ServerFrame) {
        let snapshot: Vec<MessageListener> = self.listeners.clone();
        for listener in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener.invoke(frame))).is_err() {
                log::warn!("message listener panicked; continuing with remaining listeners");
            }
        }
    }
}
