//! Configuration for channel engines and the handshake layers.
//!
//! All options are immutable after construction and deserializable so they
//! can be embedded in an application's own settings file.

mod settings;

pub use settings::*;
