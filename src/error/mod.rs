//! Error types for the channel protocol.
//!
//! Provides a unified error handling system using thiserror.

mod types;

pub use types::*;
