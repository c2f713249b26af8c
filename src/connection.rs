//! Background session task: connection lifecycle, request correlation, and
//! the subscription registry.
//!
//! One task owns everything mutable — the transport handle, the state
//! machine, the pending-request map, the standing-subscription routes, and
//! the listener registry. The public [`WireLinkClient`](crate::client)
//! feeds it commands over an mpsc channel, so no locks are needed around
//! the registries and callbacks may safely re-enter the client API.
//!
//! Lifecycle rules:
//!
//! - A connect attempt is bounded by the connect timeout; on expiry the
//!   half-open transport is abandoned and the close path runs. Commands
//!   are still serviced during the attempt, and `close()` abandons it.
//! - The close path is the only place that schedules the reconnect timer,
//!   and it never arms a second one while one is pending.
//! - Explicit `close()` cancels both timers and never reconnects.
//! - Entering Disconnected drops all pending one-shot callbacks and
//!   invalidates server-side subscription state; reaching Connected
//!   eagerly re-issues every surviving subscription with a fresh `rid`.

use crate::error::WireLinkError;
use crate::event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
use crate::listeners::{ListenerRegistry, MessageListener};
use crate::models::{ConnectionState, RequestFrame, ServerFrame};
use crate::subscription::{Subscription, SubscriptionShared, SubscriptionSpec};
use crate::timeouts::{ConnectionOptions, WireLinkTimeouts};
use crate::transport::{Transport, TransportConn, TransportEvent};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};

/// One-shot response callback; consumed on first delivery.
pub(crate) type OneShotCallback = Box<dyn FnOnce(JsonValue) + Send>;

/// Standing subscription callback; fires for every delivery until the
/// subscription is cancelled.
pub(crate) type EventCallback = Arc<dyn Fn(JsonValue) + Send + Sync>;

/// Commands sent from the public API to the session task.
pub(crate) enum Cmd {
    /// Begin connecting (no-op while Connecting/Connected).
    Connect,
    /// Unconditional close: cancel timers, close the transport, do not
    /// reconnect.
    Close,
    /// Write a frame, optionally registering a one-shot response callback.
    Send {
        frame: RequestFrame,
        callback: Option<OneShotCallback>,
    },
    /// Register a subscription (deduplicated by key).
    Subscribe {
        spec: SubscriptionSpec,
        callback: EventCallback,
        result_tx: oneshot::Sender<Subscription>,
    },
    /// Cancel a subscription by key.
    Unsubscribe { key: String },
    /// Register message listeners.
    AddListeners(Vec<MessageListener>),
    /// Remove message listeners by identity.
    RemoveListeners(Vec<MessageListener>),
}

/// A registered response slot, keyed by `rid`.
enum PendingAction {
    /// Plain one-shot request callback.
    OneShot {
        /// Debug label, `"/<t>/<rid>"`.
        topic: String,
        callback: OneShotCallback,
    },
    /// Setup leg of a subscription: the response carries the server's
    /// subscription id and installs the standing route.
    SubscribeAck { key: String, topic: String },
}

/// Registry entry for a live subscription.
struct SubEntry {
    spec: SubscriptionSpec,
    callback: EventCallback,
    shared: Arc<SubscriptionShared>,
}

/// Immutable configuration and shared handles for the session task.
pub(crate) struct SessionConfig {
    pub uri: String,
    pub timeouts: WireLinkTimeouts,
    pub options: ConnectionOptions,
    pub handlers: EventHandlers,
    /// Session id, shared with the client handle. Set by the server's
    /// announcement frame, cleared on every disconnect.
    pub session: Arc<RwLock<Option<String>>>,
    /// Request id counter, shared with the client handle. Never reset.
    pub request_id: Arc<AtomicU64>,
    pub state_tx: watch::Sender<ConnectionState>,
}

fn set_state(cfg: &SessionConfig, state: ConnectionState) {
    let prev = cfg.state_tx.send_replace(state);
    if prev != state {
        log::debug!("connection state {} -> {}", prev, state);
    }
}

/// The session task. Runs until every client handle has been dropped.
pub(crate) async fn session_task(
    mut cmd_rx: mpsc::UnboundedReceiver<Cmd>,
    mut transport: Box<dyn Transport>,
    cfg: SessionConfig,
) {
    let mut pending: HashMap<u64, PendingAction> = HashMap::new();
    let mut subs: HashMap<String, SubEntry> = HashMap::new();
    let mut standing: HashMap<u64, String> = HashMap::new();
    let mut listeners = ListenerRegistry::new();
    let mut conn: Option<Box<dyn TransportConn>> = None;
    let mut reconnect_at: Option<Instant> = None;
    let mut user_closed = false;

    loop {
        if let Some(ref mut c) = conn {
            tokio::select! {
                ev = c.next_event() => match ev {
                    TransportEvent::Message(text) => {
                        cfg.handlers.emit_receive(&text);
                        handle_frame(&text, &mut pending, &subs, &mut standing, &listeners, &cfg);
                    }
                    TransportEvent::Error(msg) => {
                        // Observed only; the close event that follows drives
                        // the state transition.
                        log::warn!("transport error: {}", msg);
                        cfg.handlers.emit_error(ConnectionError::new(msg, true));
                    }
                    TransportEvent::Closed(reason) => {
                        conn = None;
                        let reason = reason
                            .map(DisconnectReason::new)
                            .unwrap_or_else(|| DisconnectReason::new("transport closed"));
                        transport_down(
                            reason,
                            &mut pending,
                            &subs,
                            &mut standing,
                            &mut reconnect_at,
                            user_closed,
                            &cfg,
                        );
                    }
                },
                cmd = cmd_rx.recv() => match cmd {
                    None => {
                        c.close().await;
                        conn = None;
                        teardown(
                            DisconnectReason::new("client dropped"),
                            &mut pending,
                            &subs,
                            &mut standing,
                            &cfg,
                        );
                        return;
                    }
                    Some(Cmd::Connect) => {
                        log::debug!("connect requested but already connected");
                    }
                    Some(Cmd::Close) => {
                        user_closed = true;
                        reconnect_at = None;
                        c.close().await;
                        conn = None;
                        teardown(
                            DisconnectReason::new("closed by client"),
                            &mut pending,
                            &subs,
                            &mut standing,
                            &cfg,
                        );
                    }
                    Some(Cmd::Send { frame, callback }) => {
                        if let Some(callback) = callback {
                            pending.insert(
                                frame.rid,
                                PendingAction::OneShot {
                                    topic: frame.topic(),
                                    callback,
                                },
                            );
                        }
                        write_frame(c.as_mut(), &frame, &cfg.handlers).await;
                    }
                    Some(Cmd::Subscribe { spec, callback, result_tx }) => {
                        let (sub, is_new) = register_subscription(spec, callback, &mut subs);
                        if is_new {
                            send_subscribe(c.as_mut(), sub.key(), &subs, &mut pending, &cfg)
                                .await;
                        }
                        let _ = result_tx.send(sub);
                    }
                    Some(Cmd::Unsubscribe { key }) => {
                        if let Some(entry) = remove_subscription(&key, &mut subs, &mut standing, &mut pending) {
                            if let Some(server_id) = entry.shared.server_id() {
                                let rid = cfg.request_id.fetch_add(1, Ordering::SeqCst);
                                let frame = entry.spec.stop_body(&server_id).into_frame(rid);
                                write_frame(c.as_mut(), &frame, &cfg.handlers).await;
                            }
                        }
                    }
                    Some(Cmd::AddListeners(ls)) => {
                        listeners.add_all(ls);
                    }
                    Some(Cmd::RemoveListeners(ls)) => {
                        listeners.remove_all(&ls);
                    }
                },
            }
        } else {
            let cmd = if let Some(at) = reconnect_at {
                tokio::select! {
                    _ = sleep_until(at) => {
                        // The timer clears its own handle before retrying.
                        reconnect_at = None;
                        log::info!("reconnect pause elapsed, retrying");
                        match connect_attempt(
                            &mut transport,
                            &mut cmd_rx,
                            &mut pending,
                            &mut subs,
                            &mut standing,
                            &mut listeners,
                            &mut reconnect_at,
                            &mut user_closed,
                            &cfg,
                        )
                        .await
                        {
                            ConnectOutcome::Open(c) => conn = Some(c),
                            ConnectOutcome::Down => {}
                            ConnectOutcome::Shutdown => return,
                        }
                        continue;
                    }
                    cmd = cmd_rx.recv() => cmd,
                }
            } else {
                cmd_rx.recv().await
            };

            let cmd = match cmd {
                Some(cmd) => cmd,
                None => return,
            };
            match cmd {
                Cmd::Connect => {
                    user_closed = false;
                    reconnect_at = None;
                    match connect_attempt(
                        &mut transport,
                        &mut cmd_rx,
                        &mut pending,
                        &mut subs,
                        &mut standing,
                        &mut listeners,
                        &mut reconnect_at,
                        &mut user_closed,
                        &cfg,
                    )
                    .await
                    {
                        ConnectOutcome::Open(c) => conn = Some(c),
                        ConnectOutcome::Down => {}
                        ConnectOutcome::Shutdown => return,
                    }
                }
                Cmd::Close => {
                    user_closed = true;
                    reconnect_at = None;
                }
                Cmd::Send { frame, callback } => {
                    // The client handle rejects sends before this point;
                    // hitting it here is the normal race with a concurrent
                    // disconnect. The callback is dropped without firing.
                    log::warn!("send of {} dropped: not connected", frame.topic());
                    drop(callback);
                }
                Cmd::Subscribe { spec, callback, result_tx } => {
                    // Registered now, sent by the post-connect resubscribe
                    // pass.
                    let (sub, is_new) = register_subscription(spec, callback, &mut subs);
                    if is_new {
                        log::debug!("subscription {} queued until connected", sub.key());
                    }
                    let _ = result_tx.send(sub);
                }
                Cmd::Unsubscribe { key } => {
                    remove_subscription(&key, &mut subs, &mut standing, &mut pending);
                }
                Cmd::AddListeners(ls) => {
                    listeners.add_all(ls);
                }
                Cmd::RemoveListeners(ls) => {
                    listeners.remove_all(&ls);
                }
            }
        }
    }
}

enum ConnectOutcome {
    /// The transport is up; the caller takes ownership.
    Open(Box<dyn TransportConn>),
    /// The attempt ended without a connection; the close path has run.
    Down,
    /// All client handles were dropped mid-attempt.
    Shutdown,
}

/// Run one connect attempt, bounded by the connect timeout.
///
/// Commands keep flowing while the open is in flight: registrations are
/// applied, sends are rejected, and `Close` abandons the half-open attempt.
/// On success the post-connect hook re-issues every registered
/// subscription. On failure or timeout the close path runs, which is where
/// reconnect scheduling lives.
#[allow(clippy::too_many_arguments)]
async fn connect_attempt(
    transport: &mut Box<dyn Transport>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Cmd>,
    pending: &mut HashMap<u64, PendingAction>,
    subs: &mut HashMap<String, SubEntry>,
    standing: &mut HashMap<u64, String>,
    listeners: &mut ListenerRegistry,
    reconnect_at: &mut Option<Instant>,
    user_closed: &mut bool,
    cfg: &SessionConfig,
) -> ConnectOutcome {
    set_state(cfg, ConnectionState::Connecting);
    cfg.handlers.emit_connecting();
    log::info!("connecting to {}", cfg.uri);

    let open_fut = timeout(cfg.timeouts.connect_timeout, transport.open(&cfg.uri));
    tokio::pin!(open_fut);
    loop {
        tokio::select! {
            res = &mut open_fut => {
                return match res {
                    Ok(Ok(mut c)) => {
                        *reconnect_at = None;
                        set_state(cfg, ConnectionState::Connected);
                        log::info!("connected to {}", cfg.uri);
                        cfg.handlers.emit_connected();
                        resubscribe_all(c.as_mut(), subs, standing, pending, cfg).await;
                        ConnectOutcome::Open(c)
                    }
                    Ok(Err(e)) => {
                        log::warn!("connect failed: {}", e);
                        cfg.handlers.emit_error(ConnectionError::new(e.to_string(), true));
                        transport_down(
                            DisconnectReason::new(format!("connect failed: {}", e)),
                            pending,
                            subs,
                            standing,
                            reconnect_at,
                            *user_closed,
                            cfg,
                        );
                        ConnectOutcome::Down
                    }
                    Err(_) => {
                        // Dropping the open future abandons the half-open
                        // transport; the close path owns reconnect
                        // scheduling.
                        let err = WireLinkError::TimeoutError(format!(
                            "connect attempt gave up after {:?}",
                            cfg.timeouts.connect_timeout
                        ));
                        log::warn!("{}", err);
                        cfg.handlers.emit_connect_timeout();
                        cfg.handlers.emit_error(ConnectionError::new(err.to_string(), true));
                        transport_down(
                            DisconnectReason::new("connect timeout"),
                            pending,
                            subs,
                            standing,
                            reconnect_at,
                            *user_closed,
                            cfg,
                        );
                        ConnectOutcome::Down
                    }
                };
            }
            cmd = cmd_rx.recv() => match cmd {
                None => return ConnectOutcome::Shutdown,
                Some(Cmd::Close) => {
                    *user_closed = true;
                    *reconnect_at = None;
                    teardown(
                        DisconnectReason::new("closed by client"),
                        pending,
                        subs,
                        standing,
                        cfg,
                    );
                    return ConnectOutcome::Down;
                }
                Some(Cmd::Connect) => {
                    log::debug!("connect requested but a connect is already in flight");
                }
                Some(Cmd::Send { frame, callback }) => {
                    log::warn!("send of {} dropped: not connected", frame.topic());
                    drop(callback);
                }
                Some(Cmd::Subscribe { spec, callback, result_tx }) => {
                    let (sub, _) = register_subscription(spec, callback, subs);
                    let _ = result_tx.send(sub);
                }
                Some(Cmd::Unsubscribe { key }) => {
                    remove_subscription(&key, subs, standing, pending);
                }
                Some(Cmd::AddListeners(ls)) => {
                    listeners.add_all(ls);
                }
                Some(Cmd::RemoveListeners(ls)) => {
                    listeners.remove_all(&ls);
                }
            },
        }
    }
}

/// Shared teardown: clear the session, drop pending callbacks, invalidate
/// server-side subscription state, and publish Disconnected.
fn teardown(
    reason: DisconnectReason,
    pending: &mut HashMap<u64, PendingAction>,
    subs: &HashMap<String, SubEntry>,
    standing: &mut HashMap<u64, String>,
    cfg: &SessionConfig,
) {
    if let Some(session_id) = cfg.session.write().unwrap().take() {
        log::debug!("session {} cleared", session_id);
    }
    if !pending.is_empty() {
        log::debug!("dropping {} pending request callback(s)", pending.len());
        pending.clear();
    }
    // The server has forgotten these subscriptions; the registry entries
    // survive so the post-connect hook can re-issue them.
    for entry in subs.values() {
        entry.shared.invalidate();
    }
    standing.clear();
    set_state(cfg, ConnectionState::Disconnected);
    log::info!("disconnected: {}", reason);
    cfg.handlers.emit_disconnected(reason);
}

/// The close handler: teardown plus reconnect scheduling. This is the only
/// place a reconnect timer is armed, and never while one is pending.
fn transport_down(
    reason: DisconnectReason,
    pending: &mut HashMap<u64, PendingAction>,
    subs: &HashMap<String, SubEntry>,
    standing: &mut HashMap<u64, String>,
    reconnect_at: &mut Option<Instant>,
    user_closed: bool,
    cfg: &SessionConfig,
) {
    teardown(reason, pending, subs, standing, cfg);
    if user_closed || !cfg.options.auto_reconnect {
        return;
    }
    if reconnect_at.is_some() {
        log::debug!("reconnect already scheduled");
        return;
    }
    *reconnect_at = Some(Instant::now() + cfg.timeouts.reconnect_pause);
    log::info!("reconnect scheduled in {:?}", cfg.timeouts.reconnect_pause);
}

/// Register a subscription under its dedup key. An existing live entry is
/// returned unchanged and no frame is sent for it.
fn register_subscription(
    spec: SubscriptionSpec,
    callback: EventCallback,
    subs: &mut HashMap<String, SubEntry>,
) -> (Subscription, bool) {
    let key = spec.key();
    if let Some(entry) = subs.get(&key) {
        log::debug!("subscription {} already registered, reusing", key);
        return (Subscription::new(key, entry.shared.clone()), false);
    }
    let shared = Arc::new(SubscriptionShared::new(0));
    subs.insert(
        key.clone(),
        SubEntry {
            spec,
            callback,
            shared: shared.clone(),
        },
    );
    log::debug!("subscription {} registered", key);
    (Subscription::new(key, shared), true)
}

/// Remove a subscription and every route pointing at it. Returns the
/// removed entry so the caller can notify the server.
fn remove_subscription(
    key: &str,
    subs: &mut HashMap<String, SubEntry>,
    standing: &mut HashMap<u64, String>,
    pending: &mut HashMap<u64, PendingAction>,
) -> Option<SubEntry> {
    let entry = subs.remove(key)?;
    entry.shared.cancel();
    standing.retain(|_, k| k != key);
    // A late setup ack must not resurrect the route.
    pending.retain(|_, action| {
        !matches!(action, PendingAction::SubscribeAck { key: k, .. } if k == key)
    });
    log::debug!("subscription {} removed", key);
    Some(entry)
}

/// Issue the setup request for a registered subscription with a fresh
/// `rid`, registering the ack slot.
async fn send_subscribe(
    conn: &mut dyn TransportConn,
    key: &str,
    subs: &HashMap<String, SubEntry>,
    pending: &mut HashMap<u64, PendingAction>,
    cfg: &SessionConfig,
) {
    let entry = match subs.get(key) {
        Some(entry) => entry,
        None => return,
    };
    let rid = cfg.request_id.fetch_add(1, Ordering::SeqCst);
    entry.shared.set_request_id(rid);
    let frame = entry.spec.start_body().into_frame(rid);
    pending.insert(
        rid,
        PendingAction::SubscribeAck {
            key: key.to_string(),
            topic: frame.topic(),
        },
    );
    write_frame(conn, &frame, &cfg.handlers).await;
}

/// Post-connect hook: force a fresh server round trip for every surviving
/// registry entry.
async fn resubscribe_all(
    conn: &mut dyn TransportConn,
    subs: &mut HashMap<String, SubEntry>,
    standing: &mut HashMap<u64, String>,
    pending: &mut HashMap<u64, PendingAction>,
    cfg: &SessionConfig,
) {
    if subs.is_empty() {
        return;
    }
    log::info!("re-establishing {} subscription(s)", subs.len());
    standing.clear();
    let keys: Vec<String> = subs.keys().cloned().collect();
    for key in keys {
        if let Some(entry) = subs.get(&key) {
            entry.shared.invalidate();
        }
        send_subscribe(conn, &key, subs, pending, cfg).await;
    }
}

/// Serialize and write one frame; failures are logged and reported, never
/// propagated (the close event carries the real state change).
async fn write_frame(conn: &mut dyn TransportConn, frame: &RequestFrame, handlers: &EventHandlers) {
    let raw = match serde_json::to_string(frame) {
        Ok(raw) => raw,
        Err(e) => {
            log::warn!("failed to serialize frame {}: {}", frame.topic(), e);
            return;
        }
    };
    handlers.emit_send(&raw);
    if let Err(e) = conn.send(&raw).await {
        log::warn!("failed to send frame {}: {}", frame.topic(), e);
        handlers.emit_error(ConnectionError::new(e.to_string(), true));
    }
}

/// Classify and route one inbound frame.
///
/// Session announcements set the session id once. Response frames route by
/// `rerid` to a one-shot slot (consumed) or a standing subscription route;
/// unmatched ids are dropped at debug level — that is the normal race with
/// an unsubscribe or an already-fired one-shot. Every parsed frame is also
/// fanned out to the listener registry.
fn handle_frame(
    raw: &str,
    pending: &mut HashMap<u64, PendingAction>,
    subs: &HashMap<String, SubEntry>,
    standing: &mut HashMap<u64, String>,
    listeners: &ListenerRegistry,
    cfg: &SessionConfig,
) {
    let frame: ServerFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            let err = WireLinkError::MalformedFrame(e.to_string());
            log::warn!("{}, frame dropped", err);
            cfg.handlers.emit_error(ConnectionError::new(err.to_string(), true));
            return;
        }
    };

    match &frame {
        ServerFrame::Session { sessionid } => {
            let mut guard = cfg.session.write().unwrap();
            if guard.is_none() {
                *guard = Some(sessionid.clone());
                drop(guard);
                log::info!("session established: {}", sessionid);
                cfg.handlers.emit_session(sessionid);
            } else {
                log::debug!("ignoring repeated session announcement");
            }
        }
        ServerFrame::Response { rerid, msg } => {
            if let Some(action) = pending.remove(rerid) {
                match action {
                    PendingAction::OneShot { topic, callback } => {
                        log::debug!("routing response to one-shot {}", topic);
                        callback(msg.clone());
                    }
                    PendingAction::SubscribeAck { key, topic } => {
                        if let Some(entry) = subs.get(&key) {
                            entry.shared.confirm(msg.clone());
                            standing.insert(*rerid, key.clone());
                            log::debug!("subscription {} confirmed via {}", key, topic);
                        } else {
                            log::debug!("ack for removed subscription {} dropped", key);
                        }
                    }
                }
            } else if let Some(key) = standing.get(rerid) {
                if let Some(entry) = subs.get(key) {
                    (entry.callback)(msg.clone());
                } else {
                    log::debug!("standing route {} has no registry entry", key);
                }
            } else {
                log::debug!("no callback registered for rerid {}, frame dropped", rerid);
            }
        }
    }

    listeners.dispatch(&frame);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtraFilter, RequestBody};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn test_cfg() -> SessionConfig {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        SessionConfig {
            uri: "ws://test".to_string(),
            timeouts: WireLinkTimeouts::default(),
            options: ConnectionOptions::default(),
            handlers: EventHandlers::new(),
            session: Arc::new(RwLock::new(None)),
            request_id: Arc::new(AtomicU64::new(0)),
            state_tx,
        }
    }

    fn spec() -> SubscriptionSpec {
        SubscriptionSpec {
            es: "jmx".into(),
            esn: "svc:local".into(),
            filter: "domain:name".into(),
            extra: ExtraFilter::None,
        }
    }

    fn noop_event_callback() -> EventCallback {
        Arc::new(|_| {})
    }

    #[test]
    fn register_subscription_dedups_by_key() {
        let mut subs = HashMap::new();
        let (first, new1) = register_subscription(spec(), noop_event_callback(), &mut subs);
        let (second, new2) = register_subscription(spec(), noop_event_callback(), &mut subs);
        assert!(new1);
        assert!(!new2);
        assert!(first.same_as(&second));
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn one_shot_fires_at_most_once() {
        let cfg = test_cfg();
        let mut pending = HashMap::new();
        let subs = HashMap::new();
        let mut standing = HashMap::new();
        let listeners = ListenerRegistry::new();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let frame = RequestBody::new("who").into_frame(5);
        pending.insert(
            5,
            PendingAction::OneShot {
                topic: frame.topic(),
                callback: Box::new(move |msg| {
                    assert_eq!(msg, json!("pong"));
                    h.fetch_add(1, Ordering::SeqCst);
                }),
            },
        );

        let raw = r#"{"rerid":5,"msg":"pong"}"#;
        handle_frame(raw, &mut pending, &subs, &mut standing, &listeners, &cfg);
        handle_frame(raw, &mut pending, &subs, &mut standing, &listeners, &cfg);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(pending.is_empty());
    }

    #[test]
    fn subscribe_ack_confirms_and_installs_standing_route() {
        let cfg = test_cfg();
        let mut pending = HashMap::new();
        let mut subs = HashMap::new();
        let mut standing = HashMap::new();
        let listeners = ListenerRegistry::new();

        let deliveries = Arc::new(AtomicUsize::new(0));
        let d = deliveries.clone();
        let (sub, _) = register_subscription(
            spec(),
            Arc::new(move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            }),
            &mut subs,
        );
        sub.shared().set_request_id(3);
        pending.insert(
            3,
            PendingAction::SubscribeAck {
                key: sub.key().to_string(),
                topic: "/req/3".to_string(),
            },
        );

        handle_frame(
            r#"{"rerid":3,"msg":"srv-sub-1"}"#,
            &mut pending,
            &subs,
            &mut standing,
            &listeners,
            &cfg,
        );
        assert!(sub.is_confirmed());
        assert_eq!(sub.server_subscription_id(), Some(json!("srv-sub-1")));
        assert_eq!(standing.get(&3).map(String::as_str), Some(sub.key()));
        assert_eq!(deliveries.load(Ordering::SeqCst), 0);

        // Subsequent deliveries on the same rerid hit the standing callback.
        handle_frame(
            r#"{"rerid":3,"msg":{"metric":1}}"#,
            &mut pending,
            &subs,
            &mut standing,
            &listeners,
            &cfg,
        );
        handle_frame(
            r#"{"rerid":3,"msg":{"metric":2}}"#,
            &mut pending,
            &subs,
            &mut standing,
            &listeners,
            &cfg,
        );
        assert_eq!(deliveries.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn session_announcement_is_stored_once() {
        let cfg = test_cfg();
        let mut pending = HashMap::new();
        let subs = HashMap::new();
        let mut standing = HashMap::new();
        let listeners = ListenerRegistry::new();

        handle_frame(
            r#"{"sessionid":"s-1"}"#,
            &mut pending,
            &subs,
            &mut standing,
            &listeners,
            &cfg,
        );
        assert_eq!(cfg.session.read().unwrap().as_deref(), Some("s-1"));

        handle_frame(
            r#"{"sessionid":"s-2"}"#,
            &mut pending,
            &subs,
            &mut standing,
            &listeners,
            &cfg,
        );
        assert_eq!(cfg.session.read().unwrap().as_deref(), Some("s-1"));
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let cfg = test_cfg();
        let mut pending = HashMap::new();
        let subs = HashMap::new();
        let mut standing = HashMap::new();
        let listeners = ListenerRegistry::new();

        handle_frame("{garbage", &mut pending, &subs, &mut standing, &listeners, &cfg);
        handle_frame(
            r#"{"unknown":true}"#,
            &mut pending,
            &subs,
            &mut standing,
            &listeners,
            &cfg,
        );
    }

    #[test]
    fn unmatched_response_is_dropped_without_error() {
        let cfg = test_cfg();
        let mut pending = HashMap::new();
        let subs = HashMap::new();
        let mut standing = HashMap::new();
        let listeners = ListenerRegistry::new();

        handle_frame(
            r#"{"rerid":99,"msg":"late"}"#,
            &mut pending,
            &subs,
            &mut standing,
            &listeners,
            &cfg,
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_close_events_arm_a_single_reconnect_timer() {
        let cfg = test_cfg();
        let mut pending = HashMap::new();
        let subs = HashMap::new();
        let mut standing = HashMap::new();
        let mut reconnect_at = None;

        transport_down(
            DisconnectReason::new("first"),
            &mut pending,
            &subs,
            &mut standing,
            &mut reconnect_at,
            false,
            &cfg,
        );
        let deadline = reconnect_at.expect("close path arms the timer");

        // A second close event while the timer is pending must not move it.
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        transport_down(
            DisconnectReason::new("second"),
            &mut pending,
            &subs,
            &mut standing,
            &mut reconnect_at,
            false,
            &cfg,
        );
        assert_eq!(reconnect_at, Some(deadline));
    }

    #[tokio::test(start_paused = true)]
    async fn user_close_never_arms_the_reconnect_timer() {
        let cfg = test_cfg();
        let mut pending = HashMap::new();
        let subs = HashMap::new();
        let mut standing = HashMap::new();
        let mut reconnect_at = None;

        transport_down(
            DisconnectReason::new("closed by client"),
            &mut pending,
            &subs,
            &mut standing,
            &mut reconnect_at,
            true,
            &cfg,
        );
        assert!(reconnect_at.is_none());
    }

    #[test]
    fn remove_subscription_clears_routes_and_pending_ack() {
        let mut subs = HashMap::new();
        let mut standing = HashMap::new();
        let mut pending = HashMap::new();

        let (sub, _) = register_subscription(spec(), noop_event_callback(), &mut subs);
        let key = sub.key().to_string();
        standing.insert(7, key.clone());
        pending.insert(
            7,
            PendingAction::SubscribeAck {
                key: key.clone(),
                topic: "/req/7".to_string(),
            },
        );

        let removed = remove_subscription(&key, &mut subs, &mut standing, &mut pending);
        assert!(removed.is_some());
        assert!(sub.is_cancelled());
        assert!(subs.is_empty());
        assert!(standing.is_empty());
        assert!(pending.is_empty());

        assert!(remove_subscription(&key, &mut subs, &mut standing, &mut pending).is_none());
    }
}
