//! Connection state and wire frame models.
//!
//! Field names on the wire frames are a protocol contract with the server
//! and are preserved exactly: outbound `{t, svc, op, args, rid}` (plus a
//! top-level `agent` on identification frames), inbound either a session
//! announcement `{sessionid}` or a response `{rerid, msg}`.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Connection lifecycle state. Exactly one value at a time; every transition
/// is published on the client's state watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport is open and no connect attempt is in flight.
    #[default]
    Disconnected,
    /// A transport open is in flight, guarded by the connect timeout.
    Connecting,
    /// The transport is open and frames may be sent.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// The caller-supplied portion of an outbound frame, before a request id is
/// assigned.
#[derive(Debug, Clone, Serialize)]
pub struct RequestBody {
    /// Frame type, e.g. `"req"` or `"who"`.
    pub t: String,
    /// Target service name, for `"req"` frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub svc: Option<String>,
    /// Operation on the target service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    /// Opaque operation payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<JsonValue>,
    /// Client identification, carried at the top level of `"who"` frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl RequestBody {
    /// A frame of the given type with no service, operation or payload.
    pub fn new(t: impl Into<String>) -> Self {
        Self {
            t: t.into(),
            svc: None,
            op: None,
            args: None,
            agent: None,
        }
    }

    /// A `"req"` frame targeting a service operation.
    pub fn service_op(svc: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            t: "req".to_string(),
            svc: Some(svc.into()),
            op: Some(op.into()),
            args: None,
            agent: None,
        }
    }

    /// A `"who"` identification frame: `{t:"who", agent}`.
    pub fn who(agent: impl Into<String>) -> Self {
        Self {
            agent: Some(agent.into()),
            ..Self::new("who")
        }
    }

    /// Attach an opaque payload.
    pub fn with_args(mut self, args: JsonValue) -> Self {
        self.args = Some(args);
        self
    }

    /// Bind a request id, producing the frame that goes on the wire.
    pub fn into_frame(self, rid: u64) -> RequestFrame {
        RequestFrame { body: self, rid }
    }
}

/// A complete outbound frame: body plus the correlation id echoed back by
/// the server as `rerid`.
#[derive(Debug, Clone, Serialize)]
pub struct RequestFrame {
    #[serde(flatten)]
    pub body: RequestBody,
    /// Request id; strictly increasing for the lifetime of the client.
    pub rid: u64,
}

impl RequestFrame {
    /// Debug label for this frame's pending-callback slot.
    pub fn topic(&self) -> String {
        format!("/{}/{}", self.body.t, self.rid)
    }
}

/// An inbound frame, classified by shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// Session announcement, sent once by the server after the transport
    /// opens.
    Session {
        /// The server-assigned session id.
        sessionid: String,
    },
    /// Response or push delivery correlated to an earlier request.
    Response {
        /// Echo of the originating request's `rid`.
        rerid: u64,
        /// Opaque payload.
        #[serde(default)]
        msg: JsonValue,
    },
}

/// Optional extra filter on a subscription.
///
/// Absent normalizes to the empty string in the dedup key so that presence
/// or absence does not create spurious duplicate keys. A single value goes
/// on the wire as `exf`, multiple values as `stf`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExtraFilter {
    /// No extra filter.
    #[default]
    None,
    /// One filter expression (`exf`).
    One(String),
    /// Several filter expressions (`stf`).
    Many(Vec<String>),
}

impl ExtraFilter {
    /// The component this filter contributes to the subscription dedup key.
    pub fn key_part(&self) -> String {
        match self {
            ExtraFilter::None => String::new(),
            ExtraFilter::One(s) => s.clone(),
            ExtraFilter::Many(v) => v.join(","),
        }
    }

    /// Fold this filter into a subscription `args` object.
    pub fn apply_to_args(&self, args: &mut serde_json::Map<String, JsonValue>) {
        match self {
            ExtraFilter::None => {}
            ExtraFilter::One(s) => {
                args.insert("exf".to_string(), JsonValue::String(s.clone()));
            }
            ExtraFilter::Many(v) => {
                args.insert(
                    "stf".to_string(),
                    JsonValue::Array(v.iter().cloned().map(JsonValue::String).collect()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_frame_field_names() {
        let frame = RequestBody::service_op("catalog", "nq")
            .with_args(json!({"name": "allDomains"}))
            .into_frame(7);
        let wire = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            wire,
            json!({"t": "req", "svc": "catalog", "op": "nq", "args": {"name": "allDomains"}, "rid": 7})
        );
    }

    #[test]
    fn request_frame_omits_absent_fields() {
        let wire = serde_json::to_value(RequestBody::new("sub").into_frame(0)).unwrap();
        assert_eq!(wire, json!({"t": "sub", "rid": 0}));
    }

    #[test]
    fn who_frame_carries_agent_at_the_top_level() {
        let wire = serde_json::to_value(RequestBody::who("dashboard").into_frame(2)).unwrap();
        assert_eq!(wire, json!({"t": "who", "agent": "dashboard", "rid": 2}));
    }

    #[test]
    fn topic_shape() {
        let frame = RequestBody::new("req").into_frame(42);
        assert_eq!(frame.topic(), "/req/42");
    }

    #[test]
    fn server_frame_session() {
        let frame: ServerFrame = serde_json::from_str(r#"{"sessionid":"abc-1"}"#).unwrap();
        match frame {
            ServerFrame::Session { sessionid } => assert_eq!(sessionid, "abc-1"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn server_frame_response_with_and_without_payload() {
        let frame: ServerFrame = serde_json::from_str(r#"{"rerid":3,"msg":{"x":1}}"#).unwrap();
        match frame {
            ServerFrame::Response { rerid, msg } => {
                assert_eq!(rerid, 3);
                assert_eq!(msg, json!({"x": 1}));
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        let frame: ServerFrame = serde_json::from_str(r#"{"rerid":4}"#).unwrap();
        match frame {
            ServerFrame::Response { rerid, msg } => {
                assert_eq!(rerid, 4);
                assert!(msg.is_null());
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn malformed_frame_is_an_error() {
        assert!(serde_json::from_str::<ServerFrame>("not json").is_err());
        assert!(serde_json::from_str::<ServerFrame>(r#"{"other":true}"#).is_err());
    }

    #[test]
    fn extra_filter_key_normalization() {
        assert_eq!(ExtraFilter::None.key_part(), "");
        assert_eq!(ExtraFilter::One("a.b".into()).key_part(), "a.b");
        assert_eq!(
            ExtraFilter::Many(vec!["a".into(), "b".into()]).key_part(),
            "a,b"
        );
    }

    #[test]
    fn extra_filter_wire_fields() {
        let mut args = serde_json::Map::new();
        ExtraFilter::One("metric.1".into()).apply_to_args(&mut args);
        assert_eq!(args.get("exf"), Some(&json!("metric.1")));
        assert!(args.get("stf").is_none());

        let mut args = serde_json::Map::new();
        ExtraFilter::Many(vec!["m.1".into(), "m.2".into()]).apply_to_args(&mut args);
        assert_eq!(args.get("stf"), Some(&json!(["m.1", "m.2"])));
        assert!(args.get("exf").is_none());
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
