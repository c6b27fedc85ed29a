//! Framelink - bidirectional request/response messaging between a host
//! context and an embedded child context.
//!
//! A small RPC protocol layered over raw, fire-and-forget message passing:
//! requests are correlated to responses by ID, bounded by per-request
//! timeouts and a concurrency cap, and dispatched to registered handlers.
//! A handshake upgrades the initial shared, public surface into a private,
//! dedicated channel exclusive to the two parties: the host waits for the
//! embedded context to load and announce readiness, hands one endpoint of
//! a fresh channel pair over, and acknowledges completion back over the
//! shared surface.

pub mod channel;
pub mod config;
pub mod emitter;
pub mod error;
pub mod protocol;
pub mod receiver;
pub mod transport;
