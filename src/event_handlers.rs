//! Connection lifecycle event handlers.
//!
//! Callback-based hooks for observing the session:
//!
//! - [`on_connecting`](EventHandlers::on_connecting): a connect attempt started
//! - [`on_connected`](EventHandlers::on_connected): the transport opened
//! - [`on_disconnected`](EventHandlers::on_disconnected): the transport closed
//! - [`on_connect_timeout`](EventHandlers::on_connect_timeout): a connect
//!   attempt was forced closed after the configured timeout
//! - [`on_session`](EventHandlers::on_session): the server announced a session id
//! - [`on_error`](EventHandlers::on_error): a transport or protocol error
//! - [`on_send`](EventHandlers::on_send) / [`on_receive`](EventHandlers::on_receive):
//!   raw-frame debug hooks
//!
//! # Example
//!
//! ```rust
//! use wirelink::EventHandlers;
//!
//! let handlers = EventHandlers::new()
//!     .on_connected(|| println!("connected"))
//!     .on_disconnected(|reason| println!("disconnected: {}", reason))
//!     .on_session(|id| println!("session {}", id));
//! ```

use std::fmt;
use std::sync::Arc;

/// Reason for a disconnect event.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    /// Human-readable description of why the connection closed.
    pub message: String,
    /// Transport close code, if one was supplied.
    pub code: Option<u16>,
}

impl DisconnectReason {
    /// Create a new disconnect reason with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create a new disconnect reason with a message and close code.
    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error information passed to the `on_error` handler.
///
/// Transport errors do not themselves change the connection state; the close
/// event that follows them does.
#[derive(Debug, Clone)]
pub struct ConnectionError {
    /// Human-readable error message.
    pub message: String,
    /// Whether this error is recoverable (a reconnect may succeed).
    pub recoverable: bool,
}

impl ConnectionError {
    /// Create a new connection error.
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Connection lifecycle event handlers.
///
/// All handlers are optional; register only the ones you need. Handlers are
/// `Send + Sync` so they can be invoked from the background session task.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connecting: Option<Arc<dyn Fn() + Send + Sync>>,
    pub(crate) on_connected: Option<Arc<dyn Fn() + Send + Sync>>,
    pub(crate) on_disconnected: Option<Arc<dyn Fn(DisconnectReason) + Send + Sync>>,
    pub(crate) on_connect_timeout: Option<Arc<dyn Fn() + Send + Sync>>,
    pub(crate) on_session: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub(crate) on_error: Option<Arc<dyn Fn(ConnectionError) + Send + Sync>>,
    pub(crate) on_send: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub(crate) on_receive: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connecting", &self.on_connecting.is_some())
            .field("on_connected", &self.on_connected.is_some())
            .field("on_disconnected", &self.on_disconnected.is_some())
            .field("on_connect_timeout", &self.on_connect_timeout.is_some())
            .field("on_session", &self.on_session.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_send", &self.on_send.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .finish()
    }
}

impl EventHandlers {
    /// Create a new empty `EventHandlers` (no callbacks registered).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked when a connect attempt begins.
    pub fn on_connecting(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connecting = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the transport opens.
    pub fn on_connected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the connection is lost or closed.
    pub fn on_disconnected(
        mut self,
        f: impl Fn(DisconnectReason) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnected = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when a connect attempt times out.
    pub fn on_connect_timeout(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect_timeout = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the server announces a session id.
    pub fn on_session(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_session = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked on transport or protocol errors.
    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Register a debug hook for every raw outbound frame.
    pub fn on_send(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_send = Some(Arc::new(f));
        self
    }

    /// Register a debug hook for every raw inbound frame.
    pub fn on_receive(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_receive = Some(Arc::new(f));
        self
    }

    // ---------------------------------------------------------------
    // Internal dispatch helpers
    // ---------------------------------------------------------------

    pub(crate) fn emit_connecting(&self) {
        if let Some(cb) = &self.on_connecting {
            cb();
        }
    }

    pub(crate) fn emit_connected(&self) {
        if let Some(cb) = &self.on_connected {
            cb();
        }
    }

    pub(crate) fn emit_disconnected(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnected {
            cb(reason);
        }
    }

    pub(crate) fn emit_connect_timeout(&self) {
        if let Some(cb) = &self.on_connect_timeout {
            cb();
        }
    }

    pub(crate) fn emit_session(&self, session_id: &str) {
        if let Some(cb) = &self.on_session {
            cb(session_id);
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }

    pub(crate) fn emit_send(&self, raw: &str) {
        if let Some(cb) = &self.on_send {
            cb(raw);
        }
    }

    pub(crate) fn emit_receive(&self, raw: &str) {
        if let Some(cb) = &self.on_receive {
            cb(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_is_a_noop_without_handlers() {
        let handlers = EventHandlers::new();
        handlers.emit_connecting();
        handlers.emit_connected();
        handlers.emit_disconnected(DisconnectReason::new("bye"));
        handlers.emit_error(ConnectionError::new("oops", true));
    }

    #[test]
    fn registered_handlers_fire() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handlers = EventHandlers::new()
            .on_connected(move || {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .on_session(|id| assert_eq!(id, "s1"));
        handlers.emit_connected();
        handlers.emit_session("s1");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disconnect_reason_display() {
        assert_eq!(DisconnectReason::new("gone").to_string(), "gone");
        assert_eq!(
            DisconnectReason::with_code("gone", 1006).to_string(),
            "gone (code: 1006)"
        );
    }
}
