//! # wirelink: persistent WebSocket session client
//!
//! A client for request/response and publish/subscribe messaging over a
//! single long-lived WebSocket connection.
//!
//! ## Features
//!
//! - **One session, one task**: a background task owns the connection and
//!   all routing state; handles are cheap clones
//! - **Request Correlation**: every request carries a `rid`, responses are
//!   routed back by `rerid` to one-shot callbacks or awaited futures
//! - **Standing Subscriptions**: deduplicated by key, re-established
//!   automatically after every reconnect
//! - **Automatic Reconnection**: bounded connect attempts with a fixed
//!   pause between retries, cancelled by an explicit close
//! - **Frame Listeners**: observe every inbound frame without touching the
//!   request/response machinery
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wirelink::{ExtraFilter, RequestBody, WireLinkClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = WireLinkClient::builder("ws://localhost:8080/ws").build()?;
//!     client.connect()?;
//!
//!     // Wait for the connection to come up.
//!     let mut state = client.watch_state();
//!     while !client.is_connected() {
//!         state.changed().await?;
//!     }
//!
//!     // Request/response.
//!     let who = client
//!         .request(RequestBody::service_op("sys", "info"))
//!         .await?;
//!     println!("server info: {}", who);
//!
//!     // Standing subscription; the callback fires for every delivery.
//!     let sub = client
//!         .subscribe("jmx", "service:jmx-local", "org.helios:*", ExtraFilter::None, |event| {
//!             println!("event: {}", event);
//!         })
//!         .await?;
//!     println!("subscription key: {}", sub.key());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Lifecycle events
//!
//! ```rust,no_run
//! use wirelink::{EventHandlers, WireLinkClient};
//!
//! # fn example() -> wirelink::Result<WireLinkClient> {
//! let client = WireLinkClient::builder("ws://localhost:8080/ws")
//!     .event_handlers(
//!         EventHandlers::new()
//!             .on_connected(|| println!("up"))
//!             .on_disconnected(|reason| println!("down: {}", reason))
//!             .on_session(|id| println!("session {}", id)),
//!     )
//!     .build()?;
//! # Ok(client)
//! # }
//! ```

pub mod client;
mod connection;
pub mod error;
pub mod event_handlers;
pub mod listeners;
pub mod models;
pub mod subscription;
pub mod timeouts;
pub mod transport;

// Re-export main types for convenience
pub use client::{WireLinkClient, WireLinkClientBuilder};
pub use error::{Result, WireLinkError};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use listeners::{MessageHandler, MessageListener};
pub use models::{ConnectionState, ExtraFilter, RequestBody, RequestFrame, ServerFrame};
pub use subscription::{sub_key, Subscription, SubscriptionSpec};
pub use timeouts::{ConnectionOptions, WireLinkTimeouts, WireLinkTimeoutsBuilder};
pub use transport::{Transport, TransportConn, TransportEvent, WsTransport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
