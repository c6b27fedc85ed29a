//! Validation and classification of inbound data.

use serde_json::Value;

use crate::error::{ChannelError, ChannelResult};

use super::request::RequestMessage;
use super::response::ResponseMessage;

/// A validated protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(RequestMessage),
    Response(ResponseMessage),
}

impl Message {
    /// Whether this message is a request.
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// Whether this message is a response.
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// Correlation ID carried by the message.
    pub fn request_id(&self) -> &str {
        match self {
            Self::Request(request) => &request.request_id,
            Self::Response(response) => response.request_id(),
        }
    }
}

/// Structurally verify that `raw` is a protocol message and classify it.
///
/// Classification branches on the presence of the explicit `status` tag,
/// never on payload shape. Failures carry the malformed-message kind;
/// callers on a receive path treat that as foreign transport noise and
/// drop the value rather than propagating.
pub fn validate_message(raw: &Value) -> ChannelResult<Message> {
    let object = raw
        .as_object()
        .ok_or_else(|| ChannelError::malformed("not a JSON object"))?;

    match object.get("requestID") {
        Some(Value::String(_)) => {}
        Some(_) => return Err(ChannelError::malformed("`requestID` is not a string")),
        None => return Err(ChannelError::malformed("missing `requestID`")),
    }

    if object.contains_key("status") {
        let response: ResponseMessage = serde_json::from_value(raw.clone())
            .map_err(|e| ChannelError::malformed(format!("invalid response: {e}")))?;
        Ok(Message::Response(response))
    } else {
        let request: RequestMessage = serde_json::from_value(raw.clone())
            .map_err(|e| ChannelError::malformed(format!("invalid request: {e}")))?;
        Ok(Message::Request(request))
    }
}
