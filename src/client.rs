//! Client handle and builder.
//!
//! [`WireLinkClient`] is a cheap-to-clone handle onto the background
//! session task; every clone talks to the same connection, session id,
//! subscription registry, and listener registry. Dropping the last handle
//! shuts the task down.
//!
//! # Example
//!
//! ```rust,no_run
//! use wirelink::{ExtraFilter, WireLinkClient};
//!
//! # async fn run() -> wirelink::Result<()> {
//! let client = WireLinkClient::builder("ws://localhost:8080/ws").build()?;
//! client.connect()?;
//!
//! let sub = client
//!     .subscribe("jmx", "service:jmx-local", "org.helios:*", ExtraFilter::None, |event| {
//!         println!("event: {}", event);
//!     })
//!     .await?;
//! println!("subscribed as {:?}", sub.server_subscription_id());
//! # Ok(())
//! # }
//! ```

use crate::connection::{session_task, Cmd, SessionConfig};
use crate::error::{Result, WireLinkError};
use crate::event_handlers::EventHandlers;
use crate::listeners::MessageListener;
use crate::models::{ConnectionState, ExtraFilter, RequestBody};
use crate::subscription::{Subscription, SubscriptionSpec};
use crate::timeouts::{ConnectionOptions, WireLinkTimeouts};
use crate::transport::{Transport, WsTransport};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot, watch};

/// Handle to one persistent server session.
#[derive(Clone)]
pub struct WireLinkClient {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    state_rx: watch::Receiver<ConnectionState>,
    session: Arc<RwLock<Option<String>>>,
    request_id: Arc<AtomicU64>,
}

impl WireLinkClient {
    /// Start building a client for `uri`.
    pub fn builder(uri: impl Into<String>) -> WireLinkClientBuilder {
        WireLinkClientBuilder::new().uri(uri)
    }

    /// Begin connecting. Returns immediately; observe progress through
    /// [`watch_state`](Self::watch_state) or the registered event handlers.
    /// A no-op while already connecting or connected.
    pub fn connect(&self) -> Result<()> {
        self.command(Cmd::Connect)
    }

    /// Close the connection and cancel any scheduled reconnect. The client
    /// stays usable; a later [`connect`](Self::connect) starts fresh.
    pub fn close(&self) -> Result<()> {
        self.command(Cmd::Close)
    }

    /// The connection state at this instant.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// A watch receiver for observing connection state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Whether the transport is currently open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The server-assigned session id, if the server has announced one on
    /// the current connection.
    pub fn session_id(&self) -> Option<String> {
        self.session.read().unwrap().clone()
    }

    /// Send a fire-and-forget request. Returns the assigned `rid`.
    ///
    /// Fails with [`WireLinkError::NotConnected`] unless the connection is
    /// currently open.
    pub fn send(&self, body: RequestBody) -> Result<u64> {
        self.send_inner(body, None)
    }

    /// Send a request and register a one-shot callback for its response.
    /// Returns the assigned `rid`.
    ///
    /// The callback fires at most once, from the session task. If the
    /// connection drops before the response arrives it is discarded without
    /// firing.
    pub fn send_with_callback(
        &self,
        body: RequestBody,
        callback: impl FnOnce(JsonValue) + Send + 'static,
    ) -> Result<u64> {
        self.send_inner(body, Some(Box::new(callback)))
    }

    /// Send a request and await its response.
    ///
    /// Resolves with [`WireLinkError::ConnectionLost`] if the connection
    /// drops before the response arrives.
    pub async fn request(&self, body: RequestBody) -> Result<JsonValue> {
        let (tx, rx) = oneshot::channel();
        self.send_with_callback(body, move |msg| {
            let _ = tx.send(msg);
        })?;
        rx.await.map_err(|_| WireLinkError::ConnectionLost)
    }

    /// Invoke a named service operation with optional arguments, routing
    /// the response to `callback`. Returns the assigned `rid`.
    pub fn svc_op(
        &self,
        svc: impl Into<String>,
        op: impl Into<String>,
        args: Option<JsonValue>,
        callback: impl FnOnce(JsonValue) + Send + 'static,
    ) -> Result<u64> {
        let mut body = RequestBody::service_op(svc, op);
        if let Some(args) = args {
            body = body.with_args(args);
        }
        self.send_with_callback(body, callback)
    }

    /// Announce this client to the server: `{t:"who", agent}`.
    pub fn send_who(&self, agent: impl Into<String>) -> Result<u64> {
        self.send(RequestBody::who(agent))
    }

    /// Register a standing subscription and await its handle.
    ///
    /// Subscriptions are deduplicated by the composite key of all four
    /// fields; subscribing twice with the same parameters returns a handle
    /// to the existing registration and sends nothing. While disconnected
    /// the registration is queued and issued once the connection is up, so
    /// the returned handle may not yet be confirmed.
    pub async fn subscribe(
        &self,
        es: impl Into<String>,
        esn: impl Into<String>,
        filter: impl Into<String>,
        extra: ExtraFilter,
        callback: impl Fn(JsonValue) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let spec = SubscriptionSpec {
            es: es.into(),
            esn: esn.into(),
            filter: filter.into(),
            extra,
        };
        let (tx, rx) = oneshot::channel();
        self.command(Cmd::Subscribe {
            spec,
            callback: Arc::new(callback),
            result_tx: tx,
        })?;
        rx.await.map_err(|_| WireLinkError::ClientClosed)
    }

    /// Cancel a subscription. Its callback stops firing, and if the server
    /// had confirmed it a best-effort stop request is sent.
    pub fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        self.command(Cmd::Unsubscribe {
            key: subscription.key().to_string(),
        })
    }

    /// Register a listener that observes every inbound frame. A listener
    /// already present (by identity) is not added twice.
    pub fn add_listener(&self, listener: MessageListener) -> Result<()> {
        self.add_listeners(vec![listener])
    }

    /// Register several listeners at once.
    pub fn add_listeners(&self, listeners: Vec<MessageListener>) -> Result<()> {
        self.command(Cmd::AddListeners(listeners))
    }

    /// Remove a listener by identity. Unknown listeners are ignored.
    pub fn remove_listener(&self, listener: &MessageListener) -> Result<()> {
        self.remove_listeners(std::slice::from_ref(listener))
    }

    /// Remove several listeners by identity.
    pub fn remove_listeners(&self, listeners: &[MessageListener]) -> Result<()> {
        self.command(Cmd::RemoveListeners(listeners.to_vec()))
    }

    fn send_inner(
        &self,
        body: RequestBody,
        callback: Option<Box<dyn FnOnce(JsonValue) + Send>>,
    ) -> Result<u64> {
        if self.state() != ConnectionState::Connected {
            return Err(WireLinkError::NotConnected);
        }
        // The rid is assigned here so the caller has it before the frame is
        // on the wire. The counter is shared with the session task and never
        // reset, so ids stay unique across reconnects.
        let rid = self.request_id.fetch_add(1, Ordering::SeqCst);
        let frame = body.into_frame(rid);
        self.command(Cmd::Send { frame, callback })?;
        Ok(rid)
    }

    fn command(&self, cmd: Cmd) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| WireLinkError::ClientClosed)
    }
}

impl std::fmt::Debug for WireLinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireLinkClient")
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .finish()
    }
}

/// Builder for [`WireLinkClient`].
pub struct WireLinkClientBuilder {
    uri: Option<String>,
    timeouts: WireLinkTimeouts,
    options: ConnectionOptions,
    handlers: EventHandlers,
    transport: Option<Box<dyn Transport>>,
}

impl Default for WireLinkClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WireLinkClientBuilder {
    /// Create a builder with default timeouts and options.
    pub fn new() -> Self {
        Self {
            uri: None,
            timeouts: WireLinkTimeouts::default(),
            options: ConnectionOptions::default(),
            handlers: EventHandlers::new(),
            transport: None,
        }
    }

    /// The server URI, e.g. `ws://host:8080/ws`. Required.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Override the default timeouts.
    pub fn timeouts(mut self, timeouts: WireLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Override the default connection options.
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Register lifecycle event handlers.
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Swap in a custom transport. The default is [`WsTransport`].
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Spawn the session task and return the client handle.
    ///
    /// Must be called from within a tokio runtime. The client starts
    /// disconnected; call [`WireLinkClient::connect`] to bring the
    /// connection up.
    pub fn build(self) -> Result<WireLinkClient> {
        let uri = self
            .uri
            .ok_or_else(|| WireLinkError::ConfigurationError("uri is required".to_string()))?;
        if !uri.starts_with("ws://") && !uri.starts_with("wss://") {
            return Err(WireLinkError::ConfigurationError(format!(
                "uri must use the ws:// or wss:// scheme, got {}",
                uri
            )));
        }
        let transport = self
            .transport
            .unwrap_or_else(|| Box::new(WsTransport::new()));

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let session = Arc::new(RwLock::new(None));
        let request_id = Arc::new(AtomicU64::new(0));

        let cfg = SessionConfig {
            uri,
            timeouts: self.timeouts,
            options: self.options,
            handlers: self.handlers,
            session: session.clone(),
            request_id: request_id.clone(),
            state_tx,
        };
        tokio::spawn(session_task(cmd_rx, transport, cfg));

        Ok(WireLinkClient {
            cmd_tx,
            state_rx,
            session,
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_uri() {
        let err = WireLinkClientBuilder::new().build().unwrap_err();
        assert!(matches!(err, WireLinkError::ConfigurationError(_)));
    }

    #[test]
    fn build_rejects_non_websocket_scheme() {
        let err = WireLinkClient::builder("http://host/ws").build().unwrap_err();
        assert!(matches!(err, WireLinkError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn send_fails_while_disconnected() {
        let client = WireLinkClient::builder("ws://localhost:9").build().unwrap();
        let err = client.send(RequestBody::new("who")).unwrap_err();
        assert!(matches!(err, WireLinkError::NotConnected));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.session_id().is_none());
    }
}
