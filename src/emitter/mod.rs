//! Host-side handshake layer.
//!
//! Orchestrates acquiring a dedicated channel with an embedded context that
//! is initially reachable only through the shared surface: wait for the
//! target to load, wait for its readiness announcement, hand one endpoint
//! of a fresh channel pair over, and close the loop with an
//! acknowledgement. Connection state is an explicit machine so resumption
//! logic is inspectable without executing the whole connect path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelEngine, HandlerRegistry};
use crate::config::EmitterConfig;
use crate::error::{ChannelError, ChannelResult};
use crate::protocol::{
    validate_message, Message, ResponseMessage, SuccessResponseMessage, KIND_CONNECT, KIND_READY,
};
use crate::transport::{message_channel, Target};

/// Connection state of one logical connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Disconnected,
    AwaitingTargetLoad,
    AwaitingReceiverReady,
    HandshakeInFlight,
    Connected,
}

/// Host-side endpoint of the channel protocol.
///
/// Cheap to clone; all clones share one engine and one connection state.
#[derive(Clone)]
pub struct Emitter {
    inner: Arc<EmitterInner>,
}

struct EmitterInner {
    engine: ChannelEngine,
    target: Target,
    config: EmitterConfig,
    connected: AtomicBool,
    state: Mutex<HandshakeState>,
    ready_token: Mutex<Option<String>>,
    ready_notify: Notify,
    events_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Emitter {
    /// Create an emitter around a target handle.
    ///
    /// `handlers` serve requests the embedded context sends over the
    /// dedicated channel once connected.
    pub fn new(target: Target, handlers: HandlerRegistry, config: EmitterConfig) -> Self {
        let engine = ChannelEngine::new(handlers, config.channel.clone());
        let inner = Arc::new(EmitterInner {
            engine,
            target,
            config,
            connected: AtomicBool::new(false),
            state: Mutex::new(HandshakeState::Disconnected),
            ready_token: Mutex::new(None),
            ready_notify: Notify::new(),
            events_loop: Mutex::new(None),
        });

        if let Some(mut events) = inner.target.take_events() {
            let expected = inner.target.source();
            let weak = Arc::downgrade(&inner);
            let handle = tokio::spawn(async move {
                while let Some(envelope) = events.recv().await {
                    // Only traffic from the expected remote context counts;
                    // the surface is public.
                    if envelope.source != expected {
                        continue;
                    }
                    let Some(inner) = weak.upgrade() else { break };
                    Emitter { inner }.handle_shared_message(envelope.payload);
                }
            });
            *inner
                .events_loop
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(handle);
        }

        Self { inner }
    }

    /// Whether the handshake has completed and the dedicated channel is
    /// usable.
    pub fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Current connection state.
    pub fn state(&self) -> HandshakeState {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The underlying engine.
    pub fn engine(&self) -> &ChannelEngine {
        &self.inner.engine
    }

    /// Establish a dedicated channel with the target.
    ///
    /// Always disconnects first, so re-entry is safe and never leaks a
    /// prior channel pair. Pass `new_origin = true` when the target now
    /// points at a different remote identity; a previously recorded
    /// readiness announcement is no longer trustworthy then.
    pub async fn connect(&self, new_origin: bool) -> ChannelResult<SuccessResponseMessage> {
        self.disconnect();
        if new_origin {
            *self
                .inner
                .ready_token
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = None;
        }

        self.set_state(HandshakeState::AwaitingTargetLoad);
        if let Err(error) = self.inner.target.wait_loaded().await {
            self.set_state(HandshakeState::Disconnected);
            return Err(error);
        }
        let Some(content) = self.inner.target.content() else {
            // Caller misconfiguration, not a transient fault.
            self.set_state(HandshakeState::Disconnected);
            return Err(ChannelError::InaccessibleTarget);
        };

        self.set_state(HandshakeState::AwaitingReceiverReady);
        let ready = tokio::time::timeout(
            self.inner.config.connect_timeout(),
            self.await_ready_token(),
        )
        .await;
        if ready.is_err() {
            self.set_state(HandshakeState::Disconnected);
            return Err(ChannelError::ConnectionTimeout);
        }
        self.set_state(HandshakeState::HandshakeInFlight);

        // Fresh pair per attempt; the remote endpoint moves into the
        // connect envelope and is unusable here afterwards.
        let (local, remote) = message_channel();
        self.inner.engine.bind(local);

        let request = self.inner.engine.create_request_message(KIND_CONNECT, None);
        let handoff = content.clone();
        let outcome = self
            .inner
            .engine
            .post_request_with(
                request,
                move |request| handoff.post_with_transfer(serde_json::to_value(request)?, remote),
                None,
            )
            .await;
        let response = match outcome {
            Ok(response) => response,
            Err(error) => {
                self.disconnect();
                return Err(error);
            }
        };

        // Close the loop: the target learns the handshake is durably
        // complete through an acknowledgement tagged with its last-known
        // readiness token.
        let token = self
            .inner
            .ready_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(token) = token {
            let ack = ResponseMessage::success(token, None);
            let acked = self
                .inner
                .engine
                .post_response_with(ack, |response| content.post(serde_json::to_value(response)?));
            if let Err(error) = acked {
                warn!(error = %error, "Failed to acknowledge handshake completion");
            }
        }

        self.inner.connected.store(true, Ordering::SeqCst);
        self.set_state(HandshakeState::Connected);
        info!("Connected to embedded target");
        Ok(response)
    }

    /// Tear down the current connection, if any. Idempotent.
    pub fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.engine.unbind();
        self.set_state(HandshakeState::Disconnected);
    }

    /// Send a typed request over the dedicated channel.
    ///
    /// Fails fast with [`ChannelError::NotReady`] before a successful
    /// handshake; work must not queue against a non-existent connection.
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

    /// Suspend until a readiness token is recorded.
    async fn await_ready_token(&self) {
        loop {
            let notified = self.inner.ready_notify.notified();
            if self
                .inner
                .ready_token
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_some()
            {
                return;
            }
            notified.await;
        }
    }

    fn handle_shared_message(&self, payload: Value) {
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
            Message::Request(request) => {
                if self.inner.engine.config().debug {
                    debug!(
                        request_id = %request.request_id,
                        kind = %request.kind,
                        "Received shared-surface request"
                    );
                }
                if request.kind == KIND_READY {
                    self.record_ready(request.request_id);
                } else {
                    // The shared surface is handshake-only.
                    let response = ResponseMessage::error(request.request_id, None, None);
                    if let Some(content) = self.inner.target.content() {
                        let refused = self.inner.engine.post_response_with(response, |response| {
                            content.post(serde_json::to_value(response)?)
                        });
                        if let Err(error) = refused {
                            warn!(error = %error, "Failed to refuse shared-surface request");
                        }
                    }
                }
            }
            // Responses never travel toward the host on the shared surface.
            Message::Response(_) => {}
        }
    }

    /// Record the readiness token and wake a pending connect attempt, if
    /// one is waiting.
    fn record_ready(&self, token: String) {
        info!("Target announced readiness");
        *self
            .inner
            .ready_token
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(token);
        self.inner.ready_notify.notify_waiters();
    }

    fn set_state(&self, state: HandshakeState) {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("state", &self.state())
            .field("connected", &self.connected())
            .finish()
    }
}

impl Drop for EmitterInner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .events_loop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}
