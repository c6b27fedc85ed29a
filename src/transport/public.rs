//! Shared, public message surface.
//!
//! The public surface bootstraps the handshake: it is reachable by any
//! context, so every envelope carries the identity of its poster and
//! consumers filter on it. It is never used for general request traffic.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::{ChannelError, ChannelResult};

use super::port::MessagePort;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a posting context on the shared surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

impl SourceId {
    /// Allocate a fresh, process-unique source identity.
    pub fn next() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A unit arriving on a context's shared inbox.
#[derive(Debug)]
pub struct PublicEnvelope {
    /// Identity of the posting context.
    pub source: SourceId,
    pub payload: Value,
    pub transfer: Option<MessagePort>,
}

/// One context's attachment to the shared surface.
#[derive(Debug)]
pub struct PublicPort {
    id: SourceId,
    inbox_tx: UnboundedSender<PublicEnvelope>,
    inbox: UnboundedReceiver<PublicEnvelope>,
}

impl PublicPort {
    /// Attach a fresh context to the shared surface.
    pub fn new() -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        Self {
            id: SourceId::next(),
            inbox_tx,
            inbox,
        }
    }

    /// This context's identity.
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// A sender into this context's inbox, posting as `source`.
    ///
    /// The surface is public: any holder of a sender may post, which is
    /// exactly why consumers must filter by source.
    pub fn sender_from(&self, source: SourceId) -> PublicSender {
        PublicSender {
            source,
            tx: self.inbox_tx.clone(),
        }
    }

    /// Receive the next envelope, or `None` once all senders are gone.
    pub async fn recv(&mut self) -> Option<PublicEnvelope> {
        self.inbox.recv().await
    }
}

impl Default for PublicPort {
    fn default() -> Self {
        Self::new()
    }
}

/// Sender into one context's shared inbox, stamped with a fixed source
/// identity.
#[derive(Debug, Clone)]
pub struct PublicSender {
    source: SourceId,
    tx: UnboundedSender<PublicEnvelope>,
}

impl PublicSender {
    /// Post a payload onto the shared surface.
    pub fn post(&self, payload: Value) -> ChannelResult<()> {
        self.send(payload, None)
    }

    /// Post a payload and transfer ownership of `port` along with it.
    pub fn post_with_transfer(&self, payload: Value, port: MessagePort) -> ChannelResult<()> {
        self.send(payload, Some(port))
    }

    /// Identity this sender posts as.
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// A sender into the same inbox posting as a different identity.
    ///
    /// The surface is public; nothing prevents unrelated users from
    /// posting on it. Consumers defend by filtering on source.
    pub fn restamped(&self, source: SourceId) -> PublicSender {
        PublicSender {
            source,
            tx: self.tx.clone(),
        }
    }

    fn send(&self, payload: Value, transfer: Option<MessagePort>) -> ChannelResult<()> {
        self.tx
            .send(PublicEnvelope {
                source: self.source,
                payload,
                transfer,
            })
            .map_err(|_| ChannelError::transport("shared surface inbox closed"))
    }
}
