//! Message-oriented transport abstraction.
//!
//! The session task owns exactly one transport connection at a time and is
//! the only component that touches it. The trait seam exists so tests can
//! drive the lifecycle with a scripted in-memory transport; production use
//! goes through [`WsTransport`].

use crate::error::{Result, WireLinkError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// An event reported by an open transport connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A complete text frame arrived.
    Message(String),
    /// A transport-level error. Does not itself imply the connection is
    /// gone; a `Closed` event follows when it is.
    Error(String),
    /// The connection closed, with an optional reason.
    Closed(Option<String>),
}

/// Factory for transport connections.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Open a connection to `uri`. The caller applies its own connect
    /// timeout around this future.
    async fn open(&mut self, uri: &str) -> Result<Box<dyn TransportConn>>;
}

/// A single open, message-oriented connection.
#[async_trait]
pub trait TransportConn: Send {
    /// Write one text frame.
    async fn send(&mut self, text: &str) -> Result<()>;

    /// Wait for the next event. Once `Closed` has been returned the
    /// connection is spent.
    async fn next_event(&mut self) -> TransportEvent;

    /// Best-effort close; errors are swallowed.
    async fn close(&mut self);
}

/// Production WebSocket transport.
pub struct WsTransport;

impl WsTransport {
    /// Create the default WebSocket transport.
    pub fn new() -> Self {
        WsTransport
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&mut self, uri: &str) -> Result<Box<dyn TransportConn>> {
        log::debug!("opening websocket connection to {}", uri);
        let (stream, _response) = connect_async(uri)
            .await
            .map_err(|e| WireLinkError::TransportError(format!("connect failed: {}", e)))?;
        Ok(Box::new(WsConn {
            stream: Some(stream),
        }))
    }
}

struct WsConn {
    /// `None` once the stream has reported closed.
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

#[async_trait]
impl TransportConn for WsConn {
    async fn send(&mut self, text: &str) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(WireLinkError::NotConnected)?;
        stream
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| WireLinkError::TransportError(format!("send failed: {}", e)))
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            let stream = match self.stream.as_mut() {
                Some(s) => s,
                None => return TransportEvent::Closed(None),
            };
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Message(text),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return TransportEvent::Message(text),
                    Err(_) => {
                        return TransportEvent::Error("non-utf8 binary frame".to_string());
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    // Keep the connection alive; delivery failures surface
                    // on the next read.
                    let _ = stream.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    self.stream = None;
                    return match frame {
                        Some(f) => TransportEvent::Closed(Some(format!(
                            "{} (code: {})",
                            f.reason,
                            u16::from(f.code)
                        ))),
                        None => TransportEvent::Closed(None),
                    };
                }
                Some(Err(e)) => {
                    // The stream is unusable after an error; report it and
                    // let the close event follow on the next poll.
                    self.stream = None;
                    return TransportEvent::Error(e.to_string());
                }
                None => {
                    self.stream = None;
                    return TransportEvent::Closed(None);
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
