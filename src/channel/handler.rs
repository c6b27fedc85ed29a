//! Handler registry and the responder capability.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::ChannelResult;
use crate::protocol::ResponseMessage;

pub(crate) type HandlerFuture = Pin<Box<dyn Future<Output = ChannelResult<()>> + Send>>;
pub(crate) type HandlerFn = dyn Fn(Option<Value>, Responder) -> HandlerFuture + Send + Sync;
pub(crate) type ResponseSink = Arc<dyn Fn(ResponseMessage) + Send + Sync>;

/// Registry mapping request-type tags to handlers.
///
/// Supplied once, at engine construction; a handler receives the request
/// payload and a [`Responder`] and replies through whichever of its two
/// capabilities it calls.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<HandlerFn>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a request-type tag.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let handlers = HandlerRegistry::new().register("echo", |data, responder| async move {
    ///     responder.success(data);
    ///     Ok(())
    /// });
    /// ```
    pub fn register<F, Fut>(mut self, kind: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<Value>, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ChannelResult<()>> + Send + 'static,
    {
        let kind = kind.into();
        debug!(kind = %kind, "Registering request handler");
        self.handlers.insert(
            kind,
            Arc::new(move |data, responder| -> HandlerFuture {
                Box::pin(handler(data, responder))
            }),
        );
        self
    }

    /// Get the handler for a request-type tag.
    pub(crate) fn get(&self, kind: &str) -> Option<Arc<HandlerFn>> {
        self.handlers.get(kind).cloned()
    }

    /// List all registered request-type tags.
    pub fn kinds(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Call-once capability handed to a request handler for replying.
///
/// `success` and `error` are mutually exclusive; consuming `self` makes a
/// second reply unrepresentable.
pub struct Responder {
    request_id: String,
    sink: ResponseSink,
    replied: Arc<AtomicBool>,
}

impl Responder {
    pub(crate) fn new(request_id: String, sink: ResponseSink, replied: Arc<AtomicBool>) -> Self {
        Self {
            request_id,
            sink,
            replied,
        }
    }

    /// ID of the request being answered.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Answer the request with a success response.
    pub fn success(self, data: Option<Value>) {
        let response = ResponseMessage::success(self.request_id.clone(), data);
        self.send(response);
    }

    /// Answer the request with an error response.
    pub fn error(self, msg: Option<String>, code: Option<u16>) {
        let response = ResponseMessage::error(self.request_id.clone(), msg, code);
        self.send(response);
    }

    fn send(self, response: ResponseMessage) {
        self.replied.store(true, Ordering::SeqCst);
        (self.sink)(response);
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("request_id", &self.request_id)
            .field("replied", &self.replied.load(Ordering::SeqCst))
            .finish()
    }
}
