//! Subscription identity and shared state.
//!
//! A subscription is identified by the composite key of its four defining
//! fields; at most one live subscription exists per key. The registry itself
//! lives inside the session task (`connection.rs`); this module holds the
//! key derivation, the public [`Subscription`] handle, and the wire frames
//! for subscription setup and cancellation.

use crate::models::{ExtraFilter, RequestBody};
use serde_json::{Map, Value as JsonValue};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

/// Derive the dedup key for a subscription.
///
/// The components are joined with `/`; an absent extra filter contributes an
/// empty segment so presence and absence produce the same key shape.
pub fn sub_key(es: &str, esn: &str, filter: &str, extra: &ExtraFilter) -> String {
    format!("{}/{}/{}/{}", es, esn, filter, extra.key_part())
}

/// The defining fields of a subscription, kept so the session task can
/// re-issue the request after a reconnect.
#[derive(Debug, Clone)]
pub struct SubscriptionSpec {
    /// Entity source type, e.g. `"jmx"`.
    pub es: String,
    /// Entity source name.
    pub esn: String,
    /// Primary filter expression.
    pub filter: String,
    /// Optional extra filter.
    pub extra: ExtraFilter,
}

impl SubscriptionSpec {
    /// The dedup key for this spec.
    pub fn key(&self) -> String {
        sub_key(&self.es, &self.esn, &self.filter, &self.extra)
    }

    /// Build the subscription setup frame body:
    /// `{t:"req", svc:"sub", op:"start", args:{es, esn, f, exf|stf}}`.
    pub fn start_body(&self) -> RequestBody {
        let mut args = Map::new();
        args.insert("es".to_string(), JsonValue::String(self.es.clone()));
        args.insert("esn".to_string(), JsonValue::String(self.esn.clone()));
        args.insert("f".to_string(), JsonValue::String(self.filter.clone()));
        self.extra.apply_to_args(&mut args);
        RequestBody::service_op("sub", "start").with_args(JsonValue::Object(args))
    }

    /// Build the best-effort cancellation frame body for a server-confirmed
    /// subscription.
    pub fn stop_body(&self, server_id: &JsonValue) -> RequestBody {
        let mut args = Map::new();
        args.insert("subId".to_string(), server_id.clone());
        RequestBody::service_op("sub", "stop").with_args(JsonValue::Object(args))
    }
}

/// State shared between the public [`Subscription`] handle and the session
/// task's registry entry.
#[derive(Debug)]
pub struct SubscriptionShared {
    /// `rid` of the most recent setup request for this subscription.
    request_id: AtomicU64,
    /// Server-assigned subscription id, captured from the setup response.
    server_id: RwLock<Option<JsonValue>>,
    /// When the server confirmed the subscription.
    confirmed_at: RwLock<Option<SystemTime>>,
    cancelled: AtomicBool,
}

impl SubscriptionShared {
    pub(crate) fn new(request_id: u64) -> Self {
        Self {
            request_id: AtomicU64::new(request_id),
            server_id: RwLock::new(None),
            confirmed_at: RwLock::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_request_id(&self, rid: u64) {
        self.request_id.store(rid, Ordering::SeqCst);
    }

    pub(crate) fn request_id(&self) -> u64 {
        self.request_id.load(Ordering::SeqCst)
    }

    pub(crate) fn confirm(&self, server_id: JsonValue) {
        *self.server_id.write().unwrap() = Some(server_id);
        *self.confirmed_at.write().unwrap() = Some(SystemTime::now());
    }

    /// Forget server-side state; the server no longer knows us after a
    /// disconnect.
    pub(crate) fn invalidate(&self) {
        *self.server_id.write().unwrap() = None;
        *self.confirmed_at.write().unwrap() = None;
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn server_id(&self) -> Option<JsonValue> {
        self.server_id.read().unwrap().clone()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn confirmed_at(&self) -> Option<SystemTime> {
        *self.confirmed_at.read().unwrap()
    }
}

/// Handle to a registered subscription.
///
/// Handles are cheap to clone; all handles returned for the same dedup key
/// share the same underlying record ([`same_as`](Subscription::same_as)
/// reports this).
#[derive(Debug, Clone)]
pub struct Subscription {
    key: String,
    shared: Arc<SubscriptionShared>,
}

impl Subscription {
    pub(crate) fn new(key: String, shared: Arc<SubscriptionShared>) -> Self {
        Self { key, shared }
    }

    /// The dedup key this subscription is registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The `rid` of the most recent setup request.
    pub fn request_id(&self) -> u64 {
        self.shared.request_id()
    }

    /// The server-assigned subscription id, if the setup round trip has
    /// completed.
    pub fn server_subscription_id(&self) -> Option<JsonValue> {
        self.shared.server_id()
    }

    /// Whether the server has confirmed this subscription on the current
    /// connection.
    pub fn is_confirmed(&self) -> bool {
        self.shared.server_id().is_some()
    }

    /// When the server confirmed this subscription, if it has.
    pub fn confirmed_at(&self) -> Option<SystemTime> {
        self.shared.confirmed_at()
    }

    /// Whether this subscription has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Whether two handles refer to the same registered subscription.
    pub fn same_as(&self, other: &Subscription) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn shared(&self) -> &Arc<SubscriptionShared> {
        &self.shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_shape_and_normalization() {
        let spec = SubscriptionSpec {
            es: "jmx".into(),
            esn: "svc:local".into(),
            filter: "domain:name".into(),
            extra: ExtraFilter::None,
        };
        assert_eq!(spec.key(), "jmx/svc:local/domain:name/");

        let with_extra = SubscriptionSpec {
            extra: ExtraFilter::One("m.1".into()),
            ..spec
        };
        assert_eq!(with_extra.key(), "jmx/svc:local/domain:name/m.1");
    }

    #[test]
    fn start_body_wire_shape() {
        let spec = SubscriptionSpec {
            es: "jmx".into(),
            esn: "svc:local".into(),
            filter: "domain:name".into(),
            extra: ExtraFilter::Many(vec!["a".into(), "b".into()]),
        };
        let wire = serde_json::to_value(spec.start_body().into_frame(9)).unwrap();
        assert_eq!(
            wire,
            json!({
                "t": "req", "svc": "sub", "op": "start",
                "args": {"es": "jmx", "esn": "svc:local", "f": "domain:name", "stf": ["a", "b"]},
                "rid": 9
            })
        );
    }

    #[test]
    fn stop_body_carries_server_id() {
        let spec = SubscriptionSpec {
            es: "jmx".into(),
            esn: "svc:local".into(),
            filter: "domain:name".into(),
            extra: ExtraFilter::None,
        };
        let wire = serde_json::to_value(spec.stop_body(&json!(17)).into_frame(10)).unwrap();
        assert_eq!(
            wire,
            json!({"t": "req", "svc": "sub", "op": "stop", "args": {"subId": 17}, "rid": 10})
        );
    }

    #[test]
    fn shared_state_lifecycle() {
        let shared = SubscriptionShared::new(3);
        assert_eq!(shared.request_id(), 3);
        assert!(shared.server_id().is_none());

        shared.confirm(json!("sub-9"));
        assert_eq!(shared.server_id(), Some(json!("sub-9")));
        assert!(shared.confirmed_at().is_some());

        shared.invalidate();
        assert!(shared.server_id().is_none());
        assert!(shared.confirmed_at().is_none());

        assert!(!shared.is_cancelled());
        shared.cancel();
        assert!(shared.is_cancelled());
    }

    #[test]
    fn handle_identity() {
        let shared = Arc::new(SubscriptionShared::new(0));
        let a = Subscription::new("k".into(), shared.clone());
        let b = Subscription::new("k".into(), shared);
        let c = Subscription::new("k".into(), Arc::new(SubscriptionShared::new(0)));
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }
}
