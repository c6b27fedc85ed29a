//! Request message shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request type used by the host to hand the dedicated endpoint over to the
/// embedded context during the handshake.
pub const KIND_CONNECT: &str = "connect";

/// Request type used by the embedded context to announce readiness over the
/// shared surface.
pub const KIND_READY: &str = "ready";

/// A request travelling between the two contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    /// Correlation ID; the matching response echoes it back.
    #[serde(rename = "requestID")]
    pub request_id: String,

    /// Request-type tag used for handler dispatch.
    #[serde(rename = "type")]
    pub kind: String,

    /// Request payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RequestMessage {
    /// Create a new request message.
    pub fn new(request_id: impl Into<String>, kind: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            request_id: request_id.into(),
            kind: kind.into(),
            data,
        }
    }
}
