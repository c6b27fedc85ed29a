//! Response message shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error code for a handler that raised while serving a request.
pub const CODE_INTERNAL_ERROR: u16 = 500;

/// Error code for a request type with no registered handler.
pub const CODE_NOT_IMPLEMENTED: u16 = 501;

/// A response travelling between the two contexts, discriminated by the
/// explicit `status` tag on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResponseMessage {
    /// The request was served; carries the handler's payload.
    Success(SuccessResponseMessage),
    /// The request failed; carries the remote failure description.
    Error(ErrorResponseMessage),
}

/// Payload of a success response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessResponseMessage {
    /// ID of the originating request.
    #[serde(rename = "requestID")]
    pub request_id: String,

    /// Response payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Payload of an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponseMessage {
    /// ID of the originating request.
    #[serde(rename = "requestID")]
    pub request_id: String,

    /// Human-readable failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,

    /// Numeric failure code (500 for handler faults, 501 for unregistered
    /// request types).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

impl ResponseMessage {
    /// Create a success response for the given request.
    pub fn success(request_id: impl Into<String>, data: Option<Value>) -> Self {
        Self::Success(SuccessResponseMessage {
            request_id: request_id.into(),
            data,
        })
    }

    /// Create an error response for the given request, normalizing the
    /// failure to a `{msg, code}` pair.
    pub fn error(request_id: impl Into<String>, msg: Option<String>, code: Option<u16>) -> Self {
        Self::Error(ErrorResponseMessage {
            request_id: request_id.into(),
            msg,
            code,
        })
    }

    /// ID of the originating request.
    pub fn request_id(&self) -> &str {
        match self {
            Self::Success(success) => &success.request_id,
            Self::Error(error) => &error.request_id,
        }
    }
}
