//! Error types for the channel protocol.

use thiserror::Error;

use crate::protocol::ErrorResponseMessage;

/// Main error type for channel operations.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The raw value is not a message belonging to this protocol.
    ///
    /// Receivers treat this as foreign transport noise and drop the message
    /// rather than propagating the failure.
    #[error("Malformed message: {message}")]
    MalformedMessage { message: String },

    /// The remote party answered the request with an error response.
    ///
    /// Carries the exact remote payload (message and code) unmodified.
    #[error("Request failed: {}", .response.msg.as_deref().unwrap_or("unknown error"))]
    Response { response: ErrorResponseMessage },

    /// No response arrived within the effective timeout.
    #[error("Request timed out after {timeout_ms} ms")]
    RequestTimeout { timeout_ms: u64 },

    /// The pending table is full; the request was never sent.
    #[error("Too many concurrent requests: limit of {limit} reached")]
    TooManyConcurrentRequests { limit: usize },

    /// The handshake did not complete within the connect timeout.
    #[error("Connection timed out waiting for the target to become ready")]
    ConnectionTimeout,

    /// A guarded request was attempted before a successful handshake.
    #[error("Not connected, call `connect()` first")]
    NotReady,

    /// The target does not expose a reachable inbound surface.
    ///
    /// This is a caller misconfiguration, not a transient fault; it is
    /// propagated rather than swallowed.
    #[error("Target inbound surface is not reachable")]
    InaccessibleTarget,

    /// The transport endpoint is unbound or its peer has gone away.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Application-level failure raised by a request handler.
    ///
    /// Converted to an error response (code 500) by the engine; never
    /// crosses the protocol boundary as a raised fault.
    #[error("Handler error: {message}")]
    Handler { message: String },

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChannelError {
    /// Shorthand for an application-level handler failure.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Shorthand for a transport failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMessage {
            message: message.into(),
        }
    }
}

/// Result type alias for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
