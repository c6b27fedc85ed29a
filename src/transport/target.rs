//! Handles the two parties hold on each other.
//!
//! The host sees the embedded context as a [`Target`]: a load signal, an
//! inbound surface to post into (absent when the embedding is
//! misconfigured), and the shared inbox where the target's announcements
//! arrive. The embedded context sees the host as a [`HostHandle`].

use std::sync::Mutex;

use tokio::sync::watch;

use crate::error::{ChannelError, ChannelResult};

use super::public::{PublicPort, PublicSender, SourceId};

/// Host-side handle to the embedded child context.
#[derive(Debug)]
pub struct Target {
    content: Option<PublicSender>,
    loaded: watch::Receiver<bool>,
    source: SourceId,
    events: Mutex<Option<PublicPort>>,
}

impl Target {
    /// Create a handle to an embedded context.
    ///
    /// `content` is the target's inbound surface; pass `None` to model a
    /// target whose content is not accessible (a misconfiguration the
    /// handshake layer reports as fatal). `events` is the host's own
    /// shared inbox, where announcements from the target arrive.
    pub fn new(
        content: Option<PublicSender>,
        loaded: watch::Receiver<bool>,
        source: SourceId,
        events: PublicPort,
    ) -> Self {
        Self {
            content,
            loaded,
            source,
            events: Mutex::new(Some(events)),
        }
    }

    /// Suspend until the target finishes loading.
    pub async fn wait_loaded(&self) -> ChannelResult<()> {
        let mut loaded = self.loaded.clone();
        loaded
            .wait_for(|loaded| *loaded)
            .await
            .map_err(|_| ChannelError::transport("target context went away"))?;
        Ok(())
    }

    /// The target's inbound surface, if reachable.
    pub fn content(&self) -> Option<PublicSender> {
        self.content.clone()
    }

    /// Identity the target posts as on the shared surface.
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Take the host's shared inbox. Yields `Some` exactly once.
    pub(crate) fn take_events(&self) -> Option<PublicPort> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Embedded-side handle to the host context.
#[derive(Debug)]
pub struct HostHandle {
    parent: PublicSender,
    source: SourceId,
    inbox: Mutex<Option<PublicPort>>,
    load: watch::Sender<bool>,
}

impl HostHandle {
    /// Create a handle to the host context.
    ///
    /// `parent` posts toward the host on the shared surface; `source` is
    /// the host's identity; `inbox` is the embedded context's own shared
    /// inbox; `load` announces that this context finished loading.
    pub fn new(
        parent: PublicSender,
        source: SourceId,
        inbox: PublicPort,
        load: watch::Sender<bool>,
    ) -> Self {
        Self {
            parent,
            source,
            inbox: Mutex::new(Some(inbox)),
            load,
        }
    }

    /// Sender toward the host on the shared surface.
    pub fn parent(&self) -> PublicSender {
        self.parent.clone()
    }

    /// Identity the host posts as on the shared surface.
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Announce that this context finished loading.
    pub fn mark_loaded(&self) {
        let _ = self.load.send(true);
    }

    /// Take the embedded context's shared inbox. Yields `Some` exactly once.
    pub(crate) fn take_inbox(&self) -> Option<PublicPort> {
        self.inbox.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Wire up a host context and an embedded child context over a fresh
/// shared surface.
pub fn embedded_pair() -> (Target, HostHandle) {
    let host = PublicPort::new();
    let child = PublicPort::new();
    let host_id = host.id();
    let child_id = child.id();
    let (load_tx, load_rx) = watch::channel(false);

    let to_child = child.sender_from(host_id);
    let to_host = host.sender_from(child_id);

    let target = Target::new(Some(to_child), load_rx, child_id, host);
    let handle = HostHandle::new(to_host, host_id, child, load_tx);

    (target, handle)
}
