//! In-memory reference transport.
//!
//! The protocol layer treats the transport as an injected capability; this
//! module provides the reference implementation used by tests, demos, and
//! in-process embeddings: dedicated point-to-point port pairs, a shared
//! public surface carrying per-envelope source identity, and a factory
//! wiring up a host context with an embedded child context.

mod port;
mod public;
mod target;

pub use port::{message_channel, MessagePort, PortEnvelope, PortReceiver, PortSender};
pub use public::{PublicEnvelope, PublicPort, PublicSender, SourceId};
pub use target::{embedded_pair, HostHandle, Target};
