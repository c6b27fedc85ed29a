//! Request/response engine.
//!
//! Owns one transport endpoint, correlates fire-and-forget messages into
//! request/response pairs, enforces per-request timeouts and the
//! concurrency cap, and dispatches inbound requests to registered
//! handlers.

mod engine;
mod handler;
mod pending;

pub use engine::ChannelEngine;
pub use handler::{HandlerRegistry, Responder};
