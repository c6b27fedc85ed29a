//! Pending-request table.
//!
//! Each outstanding request holds one entry correlating it to its eventual
//! response. An entry is retired exactly once, by the first of: matching
//! response, timer expiry, out-of-band invalidation, or owner teardown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{ChannelError, ChannelResult};
use crate::protocol::SuccessResponseMessage;

pub(crate) type PendingOutcome = ChannelResult<SuccessResponseMessage>;

struct PendingEntry {
    resolver: oneshot::Sender<PendingOutcome>,
    timer: JoinHandle<()>,
}

/// Table of requests awaiting their correlated response.
pub(crate) struct PendingRequests {
    limit: usize,
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingRequests {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Admit a request and arm its timer.
    ///
    /// Fails fast when the table is full; the caller must not send the
    /// request in that case. On success, returns the receiver the caller
    /// suspends on.
    pub fn insert(
        self: &Arc<Self>,
        request_id: &str,
        timeout: Duration,
    ) -> ChannelResult<oneshot::Receiver<PendingOutcome>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.limit {
            return Err(ChannelError::TooManyConcurrentRequests { limit: self.limit });
        }

        let (resolver, receiver) = oneshot::channel();
        let table = Arc::clone(self);
        let id = request_id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            table.expire(&id, timeout);
        });

        entries.insert(request_id.to_string(), PendingEntry { resolver, timer });
        Ok(receiver)
    }

    /// Retire an entry with the correlated outcome.
    ///
    /// Returns `false` when no entry exists for `request_id` (an orphan
    /// response: already timed out, a duplicate, or from a stale request).
    pub fn complete(&self, request_id: &str, outcome: PendingOutcome) -> bool {
        let entry = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
        match entry {
            Some(entry) => {
                entry.timer.abort();
                let _ = entry.resolver.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Invalidate an entry out of band.
    ///
    /// The suspended caller observes the dropped resolver as a
    /// timeout-class rejection; the entry's timer is disarmed so it cannot
    /// retire the ID a second time.
    pub fn discard(&self, request_id: &str) -> bool {
        let entry = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
        match entry {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether an entry exists for `request_id`.
    pub fn contains(&self, request_id: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(request_id)
    }

    /// Drop every entry. Used on owner teardown.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for (_, entry) in entries.drain() {
            entry.timer.abort();
        }
    }

    fn expire(&self, request_id: &str, timeout: Duration) {
        // The entry may already be retired; absence means there is nothing
        // left to reject.
        let entry = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
        if let Some(entry) = entry {
            debug!(request_id = %request_id, "Pending request expired");
            let _ = entry.resolver.send(Err(ChannelError::RequestTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }));
        }
    }
}

impl Drop for PendingRequests {
    fn drop(&mut self) {
        self.clear();
    }
}
