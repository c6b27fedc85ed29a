//! The request/response engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::ChannelConfig;
use crate::error::{ChannelError, ChannelResult};
use crate::protocol::{
    validate_message, Message, RequestIdSource, RequestMessage, ResponseMessage,
    SuccessResponseMessage, CODE_INTERNAL_ERROR, CODE_NOT_IMPLEMENTED,
};
use crate::transport::{MessagePort, PortSender};

use super::handler::{HandlerRegistry, Responder, ResponseSink};
use super::pending::PendingRequests;

/// Bidirectional request/response engine over one transport endpoint.
///
/// Cheap to clone; all clones share the same pending table, handler
/// registry, and endpoint binding.
#[derive(Clone)]
pub struct ChannelEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: ChannelConfig,
    ids: RequestIdSource,
    handlers: HandlerRegistry,
    pending: Arc<PendingRequests>,
    binding: Mutex<PortBinding>,
}

#[derive(Default)]
struct PortBinding {
    sender: Option<PortSender>,
    reader: Option<JoinHandle<()>>,
}

impl ChannelEngine {
    /// Create an engine with its handler registry and configuration.
    ///
    /// The engine owns no endpoint until [`bind`](Self::bind) is called.
    pub fn new(handlers: HandlerRegistry, config: ChannelConfig) -> Self {
        let ids = RequestIdSource::new(config.request_id_prefix.clone());
        let pending = PendingRequests::new(config.maximum_request_concurrency);
        Self {
            inner: Arc::new(EngineInner {
                config,
                ids,
                handlers,
                pending,
                binding: Mutex::new(PortBinding::default()),
            }),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Build a request message with a freshly generated ID.
    pub fn create_request_message(
        &self,
        kind: impl Into<String>,
        data: Option<Value>,
    ) -> RequestMessage {
        RequestMessage::new(self.inner.ids.generate(), kind, data)
    }

    /// Bind the engine to a dedicated endpoint, replacing any previous
    /// binding. The previous endpoint and its reader are discarded.
    pub fn bind(&self, port: MessagePort) {
        let (sender, mut receiver) = port.split();
        let weak = Arc::downgrade(&self.inner);
        let reader = tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                let Some(engine) = upgrade(&weak) else { break };
                // Transferred ports are not expected on an established
                // channel; dropping the envelope drops them.
                if let Err(error) = engine.on_message(envelope.payload) {
                    error!(error = %error, "Failed to handle inbound message");
                }
            }
        });

        let mut binding = self.inner.binding.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = binding.reader.take() {
            previous.abort();
        }
        binding.sender = Some(sender);
        binding.reader = Some(reader);
    }

    /// Discard the bound endpoint, if any.
    pub fn unbind(&self) {
        let mut binding = self.inner.binding.lock().unwrap_or_else(|e| e.into_inner());
        binding.sender = None;
        if let Some(reader) = binding.reader.take() {
            reader.abort();
        }
    }

    /// Whether an endpoint is currently bound.
    pub fn is_bound(&self) -> bool {
        self.inner
            .binding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sender
            .is_some()
    }

    /// Number of outstanding requests.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Invalidate a pending request out of band.
    ///
    /// The suspended caller surfaces this as a timeout-class rejection; the
    /// entry's timer is disarmed so the ID is retired exactly once.
    pub fn discard_pending(&self, request_id: &str) -> bool {
        self.inner.pending.discard(request_id)
    }

    /// Send a request over the bound endpoint and await its correlated
    /// response.
    pub async fn post_request(
        &self,
        request: RequestMessage,
        timeout: Option<Duration>,
    ) -> ChannelResult<SuccessResponseMessage> {
        let sender = self.sender();
        self.post_request_with(
            request,
            move |request| {
                let sender =
                    sender.ok_or_else(|| ChannelError::transport("no endpoint bound"))?;
                sender.post(serde_json::to_value(request)?)
            },
            timeout,
        )
        .await
    }

    /// Send a request through a caller-supplied path and await its
    /// correlated response.
    ///
    /// Used by the handshake layers to route a message through a
    /// not-yet-established path, e.g. moving a transferable endpoint into
    /// the envelope.
    pub async fn post_request_with<F>(
        &self,
        request: RequestMessage,
        send: F,
        timeout: Option<Duration>,
    ) -> ChannelResult<SuccessResponseMessage>
    where
        F: FnOnce(&RequestMessage) -> ChannelResult<()>,
    {
        let timeout = timeout.unwrap_or_else(|| self.inner.config.default_timeout());
        let receiver = self.inner.pending.insert(&request.request_id, timeout)?;

        if let Err(error) = send(&request) {
            self.inner.pending.discard(&request.request_id);
            return Err(error);
        }
        if self.inner.config.debug {
            debug!(request_id = %request.request_id, kind = %request.kind, "Sent request");
        }

        match receiver.await {
            Ok(outcome) => outcome,
            // The resolver was dropped: the entry was invalidated out of
            // band and the response can no longer arrive.
            Err(_) => Err(ChannelError::RequestTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Send a response over the bound endpoint, fire and forget.
    pub fn post_response(&self, response: ResponseMessage) -> ChannelResult<()> {
        let sender = self
            .sender()
            .ok_or_else(|| ChannelError::transport("no endpoint bound"))?;
        self.post_response_with(response, move |response| {
            sender.post(serde_json::to_value(response)?)
        })
    }

    /// Send a response through a caller-supplied path, fire and forget.
    pub fn post_response_with<F>(&self, response: ResponseMessage, send: F) -> ChannelResult<()>
    where
        F: FnOnce(&ResponseMessage) -> ChannelResult<()>,
    {
        send(&response)?;
        if self.inner.config.debug {
            debug!(request_id = %response.request_id(), "Sent response");
        }
        Ok(())
    }

    /// Handle one inbound raw value from the transport.
    ///
    /// Malformed values are dropped with a warning (the transport may carry
    /// unrelated traffic); any other failure propagates. A response is
    /// matched against the pending table; a request is dispatched to its
    /// registered handler on an independent task.
    pub fn on_message(&self, raw: Value) -> ChannelResult<()> {
        let message = match validate_message(&raw) {
            Ok(message) => message,
            Err(ChannelError::MalformedMessage { message }) => {
                warn!(reason = %message, "Dropping malformed message");
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        if self.inner.config.debug {
            debug!(request_id = %message.request_id(), "Received message");
        }

        match message {
            Message::Response(response) => {
                self.resolve_response(response);
                Ok(())
            }
            Message::Request(request) => {
                self.dispatch_request(request);
                Ok(())
            }
        }
    }

    fn resolve_response(&self, response: ResponseMessage) {
        let request_id = response.request_id().to_string();
        let outcome = match response {
            ResponseMessage::Success(success) => Ok(success),
            ResponseMessage::Error(error) => Err(ChannelError::Response { response: error }),
        };
        if !self.inner.pending.complete(&request_id, outcome) {
            error!(
                request_id = %request_id,
                "Received response with no matching pending request"
            );
        }
    }

    /// Spawn the handler invocation so concurrent inbound requests are
    /// served independently.
    fn dispatch_request(&self, request: RequestMessage) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.handle_request(request).await;
        });
    }

    async fn handle_request(&self, request: RequestMessage) {
        let RequestMessage {
            request_id,
            kind,
            data,
        } = request;

        let Some(handler) = self.inner.handlers.get(&kind) else {
            let response =
                ResponseMessage::error(request_id.clone(), None, Some(CODE_NOT_IMPLEMENTED));
            if let Err(error) = self.post_response(response) {
                warn!(
                    request_id = %request_id,
                    error = %error,
                    "Failed to answer unhandled request type"
                );
            }
            return;
        };

        let replied = Arc::new(AtomicBool::new(false));
        let responder = Responder::new(
            request_id.clone(),
            self.response_sink(),
            Arc::clone(&replied),
        );

        if let Err(fault) = handler(data, responder).await {
            if replied.load(Ordering::SeqCst) {
                error!(
                    request_id = %request_id,
                    error = %fault,
                    "Handler failed after responding"
                );
                return;
            }
            // The caller must not be left hanging on a handler fault.
            let response = ResponseMessage::error(
                request_id.clone(),
                Some(fault.to_string()),
                Some(CODE_INTERNAL_ERROR),
            );
            if let Err(error) = self.post_response(response) {
                warn!(
                    request_id = %request_id,
                    error = %error,
                    "Failed to answer with handler failure"
                );
            }
        }
    }

    fn response_sink(&self) -> ResponseSink {
        let engine = self.clone();
        Arc::new(move |response| {
            if let Err(error) = engine.post_response(response) {
                warn!(error = %error, "Failed to post handler response");
            }
        })
    }

    fn sender(&self) -> Option<PortSender> {
        self.inner
            .binding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sender
            .clone()
    }
}

impl std::fmt::Debug for ChannelEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelEngine")
            .field("prefix", &self.inner.ids.prefix())
            .field("pending", &self.inner.pending.len())
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Some(reader) = self
            .binding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reader
            .take()
        {
            reader.abort();
        }
        self.pending.clear();
    }
}

fn upgrade(weak: &Weak<EngineInner>) -> Option<ChannelEngine> {
    weak.upgrade().map(|inner| ChannelEngine { inner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorResponseMessage;
    use crate::transport::{message_channel, PortEnvelope};
    use std::time::Instant;

    fn engine_with_peer(config: ChannelConfig) -> (ChannelEngine, MessagePort) {
        let (local, peer) = message_channel();
        let engine = ChannelEngine::new(HandlerRegistry::new(), config);
        engine.bind(local);
        (engine, peer)
    }

    fn decode_request(envelope: &PortEnvelope) -> RequestMessage {
        serde_json::from_value(envelope.payload.clone()).expect("peer received a request")
    }

    fn decode_response(envelope: &PortEnvelope) -> ResponseMessage {
        serde_json::from_value(envelope.payload.clone()).expect("peer received a response")
    }

    #[tokio::test]
    async fn test_post_request_resolves_with_peer_success() {
        let (engine, mut peer) = engine_with_peer(ChannelConfig::default());

        tokio::spawn(async move {
            let envelope = peer.recv().await.unwrap();
            let request = decode_request(&envelope);
            let response = ResponseMessage::success(request.request_id, request.data);
            peer.post(serde_json::to_value(&response).unwrap()).unwrap();
        });

        let request =
            engine.create_request_message("echo", Some(serde_json::json!({"foo": "bar"})));
        let response = engine.post_request(request, None).await.unwrap();

        assert_eq!(response.data, Some(serde_json::json!({"foo": "bar"})));
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_post_request_rejects_with_exact_peer_error() {
        let (engine, mut peer) = engine_with_peer(ChannelConfig::default());

        tokio::spawn(async move {
            let envelope = peer.recv().await.unwrap();
            let request = decode_request(&envelope);
            let response =
                ResponseMessage::error(request.request_id, Some("denied".to_string()), Some(400));
            peer.post(serde_json::to_value(&response).unwrap()).unwrap();
        });

        let request = engine.create_request_message("guarded", None);
        let expected_id = request.request_id.clone();
        let error = engine.post_request(request, None).await.unwrap_err();

        match error {
            ChannelError::Response { response } => {
                assert_eq!(
                    response,
                    ErrorResponseMessage {
                        request_id: expected_id,
                        msg: Some("denied".to_string()),
                        code: Some(400),
                    }
                );
            }
            other => panic!("expected a response error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_post_request_times_out_with_default() {
        let config = ChannelConfig {
            default_timeout_ms: 50,
            ..ChannelConfig::default()
        };
        // Peer stays silent.
        let (engine, _peer) = engine_with_peer(config);

        let start = Instant::now();
        let request = engine.create_request_message("echo", None);
        let error = engine.post_request(request, None).await.unwrap_err();

        assert!(matches!(error, ChannelError::RequestTimeout { timeout_ms: 50 }));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_specific_timeout_overrides_default() {
        let (engine, _peer) = engine_with_peer(ChannelConfig::default());

        let start = Instant::now();
        let request = engine.create_request_message("echo", None);
        let error = engine
            .post_request(request, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();

        assert!(matches!(error, ChannelError::RequestTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_concurrency_cap_rejects_excess_immediately() {
        let config = ChannelConfig {
            maximum_request_concurrency: 2,
            ..ChannelConfig::default()
        };
        let (engine, _peer) = engine_with_peer(config);

        for _ in 0..2 {
            let request = engine.create_request_message("slow", None);
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = engine.post_request(request, None).await;
            });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.pending_count(), 2);

        let request = engine.create_request_message("slow", None);
        let error = engine.post_request(request, None).await.unwrap_err();
        assert!(matches!(
            error,
            ChannelError::TooManyConcurrentRequests { limit: 2 }
        ));
    }

    #[tokio::test]
    async fn test_discarded_entry_rejects_without_spurious_resolution() {
        let config = ChannelConfig {
            default_timeout_ms: 200,
            ..ChannelConfig::default()
        };
        let (engine, mut peer) = engine_with_peer(config);

        let request = engine.create_request_message("echo", None);
        let request_id = request.request_id.clone();

        let caller = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.post_request(request, None).await })
        };
        // Let the entry land, then invalidate it out of band.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.discard_pending(&request_id));

        let outcome = caller.await.unwrap();
        assert!(matches!(outcome, Err(ChannelError::RequestTimeout { .. })));
        assert_eq!(engine.pending_count(), 0);

        // A late response for the retired ID is an orphan, not a
        // resolution.
        let envelope = peer.recv().await.unwrap();
        let late = decode_request(&envelope);
        let response = ResponseMessage::success(late.request_id, None);
        peer.post(serde_json::to_value(&response).unwrap()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_request_type_yields_not_implemented() {
        let (_engine, mut peer) = engine_with_peer(ChannelConfig::default());

        let request = RequestMessage::new("peer-1", "nope", None);
        peer.post(serde_json::to_value(&request).unwrap()).unwrap();

        let envelope = peer.recv().await.unwrap();
        match decode_response(&envelope) {
            ResponseMessage::Error(error) => {
                assert_eq!(error.request_id, "peer-1");
                assert_eq!(error.code, Some(CODE_NOT_IMPLEMENTED));
                assert_eq!(error.msg, None);
            }
            ResponseMessage::Success(_) => panic!("expected an error response"),
        }
    }

    #[tokio::test]
    async fn test_handler_fault_yields_internal_error_with_message() {
        let handlers = HandlerRegistry::new().register("explode", |_data, _responder| async {
            Err(ChannelError::handler("boom"))
        });
        let (local, mut peer) = message_channel();
        let engine = ChannelEngine::new(handlers, ChannelConfig::default());
        engine.bind(local);

        let request = RequestMessage::new("peer-2", "explode", None);
        peer.post(serde_json::to_value(&request).unwrap()).unwrap();

        let envelope = peer.recv().await.unwrap();
        match decode_response(&envelope) {
            ResponseMessage::Error(error) => {
                assert_eq!(error.code, Some(CODE_INTERNAL_ERROR));
                assert!(error.msg.unwrap().contains("boom"));
            }
            ResponseMessage::Success(_) => panic!("expected an error response"),
        }
    }

    #[tokio::test]
    async fn test_handler_success_roundtrip() {
        let handlers = HandlerRegistry::new().register("echo", |data, responder| async move {
            responder.success(data);
            Ok(())
        });
        let (local, mut peer) = message_channel();
        let engine = ChannelEngine::new(handlers, ChannelConfig::default());
        engine.bind(local);

        let request =
            RequestMessage::new("peer-3", "echo", Some(serde_json::json!({"foo": "bar"})));
        peer.post(serde_json::to_value(&request).unwrap()).unwrap();

        let envelope = peer.recv().await.unwrap();
        match decode_response(&envelope) {
            ResponseMessage::Success(success) => {
                assert_eq!(success.request_id, "peer-3");
                assert_eq!(success.data, Some(serde_json::json!({"foo": "bar"})));
            }
            ResponseMessage::Error(_) => panic!("expected a success response"),
        }
    }

    #[tokio::test]
    async fn test_handler_error_reply_roundtrip() {
        let handlers =
            HandlerRegistry::new().register("guarded", |_data, responder| async move {
                responder.error(Some("not allowed".to_string()), None);
                Ok(())
            });
        let (local, mut peer) = message_channel();
        let engine = ChannelEngine::new(handlers, ChannelConfig::default());
        engine.bind(local);

        let request = RequestMessage::new("peer-4", "guarded", None);
        peer.post(serde_json::to_value(&request).unwrap()).unwrap();

        let envelope = peer.recv().await.unwrap();
        match decode_response(&envelope) {
            ResponseMessage::Error(error) => {
                assert_eq!(error.msg.as_deref(), Some("not allowed"));
                assert_eq!(error.code, None);
            }
            ResponseMessage::Success(_) => panic!("expected an error response"),
        }
    }

    #[tokio::test]
    async fn test_malformed_inbound_is_dropped() {
        let (engine, _peer) = engine_with_peer(ChannelConfig::default());
        engine.on_message(serde_json::json!({"noise": true})).unwrap();
        engine.on_message(serde_json::json!("just a string")).unwrap();
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_orphan_response_is_non_fatal() {
        let (engine, _peer) = engine_with_peer(ChannelConfig::default());
        let orphan = ResponseMessage::success("never-sent", None);
        engine
            .on_message(serde_json::to_value(&orphan).unwrap())
            .unwrap();
    }

    #[tokio::test]
    async fn test_post_request_without_endpoint_fails_fast() {
        let engine = ChannelEngine::new(HandlerRegistry::new(), ChannelConfig::default());

        let request = engine.create_request_message("echo", None);
        let error = engine.post_request(request, None).await.unwrap_err();

        assert!(matches!(error, ChannelError::Transport { .. }));
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_rebind_routes_traffic_to_new_endpoint() {
        let (engine, _old_peer) = engine_with_peer(ChannelConfig::default());
        let (replacement, mut new_peer) = message_channel();
        engine.bind(replacement);

        tokio::spawn({
            let engine = engine.clone();
            async move {
                let request = engine.create_request_message("echo", None);
                let _ = engine.post_request(request, None).await;
            }
        });

        let envelope = new_peer.recv().await.unwrap();
        assert_eq!(decode_request(&envelope).kind, "echo");
    }
}
