//! Configuration settings for channel engines and handshake layers.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for a request/response engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Prefix applied to generated request IDs.
    ///
    /// Disambiguates the requester role so both parties can generate IDs
    /// independently without collision.
    #[serde(default = "default_request_id_prefix")]
    pub request_id_prefix: String,

    /// Default pending-request lifetime in milliseconds before a request
    /// times out.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Hard cap on simultaneous outstanding requests.
    #[serde(default = "default_maximum_request_concurrency")]
    pub maximum_request_concurrency: usize,

    /// Enables structured logging of every sent and received message.
    #[serde(default)]
    pub debug: bool,
}

impl ChannelConfig {
    /// Default request timeout as a [`Duration`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_id_prefix: default_request_id_prefix(),
            default_timeout_ms: default_timeout_ms(),
            maximum_request_concurrency: default_maximum_request_concurrency(),
            debug: false,
        }
    }
}

/// Configuration for the host-side handshake layer.
#[derive(Debug, Clone, Deserialize)]
pub struct EmitterConfig {
    /// Bound in milliseconds on the time to wait for handshake completion.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Engine configuration for the underlying channel.
    #[serde(default = "default_emitter_channel")]
    pub channel: ChannelConfig,
}

impl EmitterConfig {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            channel: default_emitter_channel(),
        }
    }
}

/// Configuration for the embedded-side handshake layer.
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverConfig {
    /// Bound in milliseconds on the readiness round trip: the time between
    /// announcing readiness and the host's closing acknowledgement.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// Engine configuration for the underlying channel.
    #[serde(default = "default_receiver_channel")]
    pub channel: ChannelConfig,
}

impl ReceiverConfig {
    /// Ready timeout as a [`Duration`].
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout_ms(),
            channel: default_receiver_channel(),
        }
    }
}

fn default_request_id_prefix() -> String {
    "channel-".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_maximum_request_concurrency() -> usize {
    20
}

fn default_connect_timeout_ms() -> u64 {
    20_000
}

fn default_ready_timeout_ms() -> u64 {
    20_000
}

fn default_emitter_channel() -> ChannelConfig {
    ChannelConfig {
        request_id_prefix: "emitter-".to_string(),
        ..ChannelConfig::default()
    }
}

fn default_receiver_channel() -> ChannelConfig {
    ChannelConfig {
        request_id_prefix: "receiver-".to_string(),
        ..ChannelConfig::default()
    }
}
