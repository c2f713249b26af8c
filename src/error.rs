//! Error types for wirelink operations.

use thiserror::Error;

/// Errors surfaced by the wirelink client.
///
/// Nothing here is fatal to the process: connection-level failures degrade to
/// "stay disconnected and keep retrying", and unparsable inbound data is
/// logged and dropped.
#[derive(Debug, Error)]
pub enum WireLinkError {
    /// A send was attempted while the session was not in the Connected state.
    #[error("not connected")]
    NotConnected,

    /// An inbound frame could not be parsed.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A transport-level failure (connect, read or write).
    #[error("transport error: {0}")]
    TransportError(String),

    /// An operation did not complete within its configured window.
    #[error("timeout: {0}")]
    TimeoutError(String),

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// The background session task has shut down and can no longer accept
    /// commands.
    #[error("client is closed")]
    ClientClosed,

    /// A pending response was discarded because the connection dropped
    /// before the server answered.
    #[error("connection lost before a response arrived")]
    ConnectionLost,
}

/// Convenience result type for wirelink operations.
pub type Result<T> = std::result::Result<T, WireLinkError>;
