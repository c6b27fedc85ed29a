//! Embedded-side handshake layer.
//!
//! The embedded context announces readiness over the shared surface,
//! adopts the dedicated endpoint the host hands over with its connect
//! request, answers that request over the adopted channel, and learns
//! that the handshake is durably complete when the host's closing
//! acknowledgement resolves the readiness round trip.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelEngine, HandlerRegistry};
use crate::config::ReceiverConfig;
use crate::error::{ChannelError, ChannelResult};
use crate::protocol::{
    validate_message, Message, RequestMessage, ResponseMessage, SuccessResponseMessage,
    KIND_CONNECT, KIND_READY,
};
use crate::transport::{HostHandle, MessagePort};

/// Embedded-side endpoint of the channel protocol.
///
/// Cheap to clone; all clones share one engine and one connection state.
#[derive(Clone)]
pub struct Receiver {
    inner: Arc<ReceiverInner>,
}

struct ReceiverInner {
    engine: ChannelEngine,
    host: HostHandle,
    config: ReceiverConfig,
    connected: AtomicBool,
    shared_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Receiver {
    /// Create a receiver around a host handle.
    ///
    /// `handlers` serve requests the host sends over the dedicated channel
    /// once connected.
    pub fn new(host: HostHandle, handlers: HandlerRegistry, config: ReceiverConfig) -> Self {
        let engine = ChannelEngine::new(handlers, config.channel.clone());
        let inner = Arc::new(ReceiverInner {
            engine,
            host,
            config,
            connected: AtomicBool::new(false),
            shared_loop: Mutex::new(None),
        });

        if let Some(mut inbox) = inner.host.take_inbox() {
            let expected = inner.host.source();
            let weak = Arc::downgrade(&inner);
            let handle = tokio::spawn(async move {
                while let Some(envelope) = inbox.recv().await {
                    // Only traffic from the host counts; the surface is
                    // public.
                    if envelope.source != expected {
                        continue;
                    }
                    let Some(inner) = weak.upgrade() else { break };
                    Receiver { inner }.handle_shared_message(envelope.payload, envelope.transfer);
                }
            });
            *inner
                .shared_loop
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(handle);
        }

        Self { inner }
    }

    /// Announce that the embedded context finished loading.
    pub fn mark_loaded(&self) {
        self.inner.host.mark_loaded();
    }

    /// Whether a dedicated channel has been adopted.
    pub fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// The underlying engine.
    pub fn engine(&self) -> &ChannelEngine {
        &self.inner.engine
    }

    /// Announce readiness to the host and suspend until its closing
    /// acknowledgement arrives.
    ///
    /// The request ID of the announcement is the readiness token the host
    /// echoes back, which is what resolves this round trip.
    pub async fn ready(&self) -> ChannelResult<SuccessResponseMessage> {
        let request = self.inner.engine.create_request_message(KIND_READY, None);
        info!(request_id = %request.request_id, "Announcing readiness to host");
        let parent = self.inner.host.parent();
        self.inner
            .engine
            .post_request_with(
                request,
                move |request| parent.post(serde_json::to_value(request)?),
                Some(self.inner.config.ready_timeout()),
            )
            .await
    }

    /// Send a typed request over the dedicated channel.
    ///
    /// Fails fast with [`ChannelError::NotReady`] before a dedicated
    /// channel has been adopted.
    pub async fn post_formatted_request(
        &self,
        kind: impl Into<String>,
        data: Option<Value>,
        timeout: Option<Duration>,
    ) -> ChannelResult<SuccessResponseMessage> {
        if !self.connected() {
            return Err(ChannelError::NotReady);
        }
        let request = self.inner.engine.create_request_message(kind, data);
        self.inner.engine.post_request(request, timeout).await
    }

    fn handle_shared_message(&self, payload: Value, transfer: Option<MessagePort>) {
        let message = match validate_message(&payload) {
            Ok(message) => message,
            // Unknown traffic on the shared surface is not ours to report.
            Err(ChannelError::MalformedMessage { .. }) => return,
            Err(error) => {
                error!(error = %error, "Failed to handle shared-surface message");
                return;
            }
        };

        match message {
            Message::Request(request) if request.kind == KIND_CONNECT => {
                self.adopt_channel(request, transfer);
            }
            Message::Request(request) => {
                if self.inner.engine.config().debug {
                    debug!(
                        request_id = %request.request_id,
                        kind = %request.kind,
                        "Refusing shared-surface request"
                    );
                }
                // The shared surface is handshake-only.
                self.refuse_over_shared_surface(request.request_id);
            }
            Message::Response(_) => {
                // The host's closing acknowledgement arrives here and
                // resolves the pending readiness request.
                if let Err(error) = self.inner.engine.on_message(payload) {
                    error!(error = %error, "Failed to handle shared-surface response");
                }
            }
        }
    }

    /// Adopt the dedicated endpoint handed over by the host and answer the
    /// connect request over it.
    ///
    /// A repeated connect request rebinds; the previous endpoint is
    /// dropped, never leaked.
    fn adopt_channel(&self, request: RequestMessage, transfer: Option<MessagePort>) {
        let Some(port) = transfer else {
            warn!(
                request_id = %request.request_id,
                "Connect request without a transferred endpoint"
            );
            self.refuse_over_shared_surface(request.request_id);
            return;
        };

        self.inner.engine.bind(port);
        self.inner.connected.store(true, Ordering::SeqCst);
        info!(request_id = %request.request_id, "Adopted dedicated channel from host");

        let response = ResponseMessage::success(request.request_id.clone(), None);
        if let Err(error) = self.inner.engine.post_response(response) {
            warn!(
                request_id = %request.request_id,
                error = %error,
                "Failed to answer connect request"
            );
        }
    }

    fn refuse_over_shared_surface(&self, request_id: String) {
        let response = ResponseMessage::error(request_id, None, None);
        let parent = self.inner.host.parent();
        let refused = self
            .inner
            .engine
            .post_response_with(response, |response| {
                parent.post(serde_json::to_value(response)?)
            });
        if let Err(error) = refused {
            warn!(error = %error, "Failed to refuse shared-surface request");
        }
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("connected", &self.connected())
            .finish()
    }
}

impl Drop for ReceiverInner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .shared_loop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::transport::{embedded_pair, message_channel, PublicPort, SourceId, Target};

    fn fast_config(ready_timeout_ms: u64) -> ReceiverConfig {
        ReceiverConfig {
            ready_timeout_ms,
            channel: ChannelConfig {
                request_id_prefix: "receiver-".to_string(),
                default_timeout_ms: 500,
                ..ChannelConfig::default()
            },
        }
    }

    fn host_side(target: &Target) -> (crate::transport::PublicSender, PublicPort) {
        let content = target.content().expect("content reachable");
        let events = target.take_events().expect("events available");
        (content, events)
    }

    #[tokio::test]
    async fn test_ready_times_out_without_host() {
        let (_target, handle) = embedded_pair();
        let receiver = Receiver::new(handle, HandlerRegistry::new(), fast_config(50));

        let error = receiver.ready().await.unwrap_err();
        assert!(matches!(error, ChannelError::RequestTimeout { .. }));
    }

    #[tokio::test]
    async fn test_connect_request_adopts_endpoint_and_answers_over_it() {
        let (target, handle) = embedded_pair();
        let (content, _events) = host_side(&target);
        let receiver = Receiver::new(handle, HandlerRegistry::new(), fast_config(500));

        let (mut host_port, to_child) = message_channel();
        let connect = RequestMessage::new("emitter-c1", KIND_CONNECT, None);
        content
            .post_with_transfer(serde_json::to_value(&connect).unwrap(), to_child)
            .unwrap();

        let envelope = host_port.recv().await.unwrap();
        let response: ResponseMessage = serde_json::from_value(envelope.payload).unwrap();
        match response {
            ResponseMessage::Success(success) => assert_eq!(success.request_id, "emitter-c1"),
            ResponseMessage::Error(_) => panic!("expected a success answer"),
        }
        assert!(receiver.connected());
    }

    #[tokio::test]
    async fn test_repeated_connect_rebinds_to_latest_endpoint() {
        let (target, handle) = embedded_pair();
        let (content, _events) = host_side(&target);
        let handlers = HandlerRegistry::new().register("echo", |data, responder| async move {
            responder.success(data);
            Ok(())
        });
        let receiver = Receiver::new(handle, handlers, fast_config(500));

        let (mut first_port, first_remote) = message_channel();
        let connect = RequestMessage::new("emitter-c1", KIND_CONNECT, None);
        content
            .post_with_transfer(serde_json::to_value(&connect).unwrap(), first_remote)
            .unwrap();
        first_port.recv().await.unwrap();

        let (mut second_port, second_remote) = message_channel();
        let connect = RequestMessage::new("emitter-c2", KIND_CONNECT, None);
        content
            .post_with_transfer(serde_json::to_value(&connect).unwrap(), second_remote)
            .unwrap();
        second_port.recv().await.unwrap();

        // Traffic now flows over the second channel only.
        let request = RequestMessage::new("emitter-r1", "echo", Some(serde_json::json!({"n": 1})));
        second_port
            .post(serde_json::to_value(&request).unwrap())
            .unwrap();
        let envelope = second_port.recv().await.unwrap();
        let response: ResponseMessage = serde_json::from_value(envelope.payload).unwrap();
        assert_eq!(response.request_id(), "emitter-r1");
        assert!(receiver.connected());
    }

    #[tokio::test]
    async fn test_non_handshake_shared_requests_are_refused() {
        let (target, handle) = embedded_pair();
        let (content, mut events) = host_side(&target);
        let _receiver = Receiver::new(handle, HandlerRegistry::new(), fast_config(500));

        let request = RequestMessage::new("emitter-x1", "mystery", None);
        content.post(serde_json::to_value(&request).unwrap()).unwrap();

        let envelope = events.recv().await.unwrap();
        let response: ResponseMessage = serde_json::from_value(envelope.payload).unwrap();
        match response {
            ResponseMessage::Error(error) => {
                assert_eq!(error.request_id, "emitter-x1");
                assert_eq!(error.code, None);
                assert_eq!(error.msg, None);
            }
            ResponseMessage::Success(_) => panic!("expected a refusal"),
        }
    }

    #[tokio::test]
    async fn test_foreign_source_connect_is_ignored() {
        let (target, handle) = embedded_pair();
        let (content, _events) = host_side(&target);
        let receiver = Receiver::new(handle, HandlerRegistry::new(), fast_config(500));

        let stranger = content.restamped(SourceId::next());
        let (_host_port, to_child) = message_channel();
        let connect = RequestMessage::new("stranger-c1", KIND_CONNECT, None);
        stranger
            .post_with_transfer(serde_json::to_value(&connect).unwrap(), to_child)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!receiver.connected());
    }

    #[tokio::test]
    async fn test_post_formatted_request_requires_adoption() {
        let (_target, handle) = embedded_pair();
        let receiver = Receiver::new(handle, HandlerRegistry::new(), fast_config(500));

        let error = receiver
            .post_formatted_request("echo", None, None)
            .await
            .unwrap_err();
        assert!(matches!(error, ChannelError::NotReady));
    }
}
