//! Wire protocol module.
//!
//! Defines the request/response message shapes exchanged between the two
//! contexts, validation of arbitrary inbound data, and request-ID
//! generation.
//!
//! ## Wire Format
//!
//! Messages are plain JSON objects. Every message carries a `requestID`;
//! responses additionally carry an explicit `status` tag (`"success"` or
//! `"error"`) that discriminates them from requests:
//!
//! ```text
//! {"requestID": "emitter-4f...", "type": "echo", "data": {...}}
//! {"requestID": "emitter-4f...", "status": "success", "data": {...}}
//! {"requestID": "emitter-4f...", "status": "error", "msg": "...", "code": 500}
//! ```

mod correlation;
mod message;
mod request;
mod response;

pub use correlation::RequestIdSource;
pub use message::{validate_message, Message};
pub use request::{RequestMessage, KIND_CONNECT, KIND_READY};
pub use response::{
    ErrorResponseMessage, ResponseMessage, SuccessResponseMessage, CODE_INTERNAL_ERROR,
    CODE_NOT_IMPLEMENTED,
};
