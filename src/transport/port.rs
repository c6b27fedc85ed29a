//! Dedicated, point-to-point channel endpoints.

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::{ChannelError, ChannelResult};

/// A unit travelling over a dedicated channel: a JSON payload plus an
/// optionally transferred port.
///
/// Transferring a port moves its ownership with the envelope; the sender
/// holds no usable access afterward.
#[derive(Debug)]
pub struct PortEnvelope {
    pub payload: Value,
    pub transfer: Option<MessagePort>,
}

/// One endpoint of a dedicated, point-to-point channel.
///
/// Exactly two of these exist per channel, one per party. Delivery is
/// in-order per direction; nothing is guaranteed across channels.
#[derive(Debug)]
pub struct MessagePort {
    tx: UnboundedSender<PortEnvelope>,
    rx: UnboundedReceiver<PortEnvelope>,
}

/// Create an entangled pair of ports.
pub fn message_channel() -> (MessagePort, MessagePort) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();

    (
        MessagePort { tx: tx_a, rx: rx_b },
        MessagePort { tx: tx_b, rx: rx_a },
    )
}

impl MessagePort {
    /// Post a payload to the peer endpoint.
    pub fn post(&self, payload: Value) -> ChannelResult<()> {
        send(&self.tx, payload, None)
    }

    /// Receive the next envelope from the peer, or `None` once the peer
    /// endpoint is gone.
    pub async fn recv(&mut self) -> Option<PortEnvelope> {
        self.rx.recv().await
    }

    /// Split into a cloneable sender half and the exclusively-owned
    /// receiver half.
    pub fn split(self) -> (PortSender, PortReceiver) {
        (PortSender { tx: self.tx }, PortReceiver { rx: self.rx })
    }
}

/// Sender half of a dedicated channel endpoint.
#[derive(Debug, Clone)]
pub struct PortSender {
    tx: UnboundedSender<PortEnvelope>,
}

impl PortSender {
    /// Post a payload to the peer endpoint.
    pub fn post(&self, payload: Value) -> ChannelResult<()> {
        send(&self.tx, payload, None)
    }

    /// Post a payload and transfer ownership of `port` along with it.
    pub fn post_with_transfer(&self, payload: Value, port: MessagePort) -> ChannelResult<()> {
        send(&self.tx, payload, Some(port))
    }
}

/// Receiver half of a dedicated channel endpoint.
#[derive(Debug)]
pub struct PortReceiver {
    rx: UnboundedReceiver<PortEnvelope>,
}

impl PortReceiver {
    /// Receive the next envelope, or `None` once the peer endpoint is gone.
    pub async fn recv(&mut self) -> Option<PortEnvelope> {
        self.rx.recv().await
    }
}

fn send(
    tx: &UnboundedSender<PortEnvelope>,
    payload: Value,
    transfer: Option<MessagePort>,
) -> ChannelResult<()> {
    tx.send(PortEnvelope { payload, transfer })
        .map_err(|_| ChannelError::transport("peer endpoint closed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_both_directions() {
        let (mut left, mut right) = message_channel();

        left.post(serde_json::json!({"n": 1})).unwrap();
        right.post(serde_json::json!({"n": 2})).unwrap();

        let to_right = right.recv().await.unwrap();
        let to_left = left.recv().await.unwrap();
        assert_eq!(to_right.payload["n"], 1);
        assert_eq!(to_left.payload["n"], 2);
    }

    #[tokio::test]
    async fn test_post_fails_once_peer_dropped() {
        let (left, right) = message_channel();
        drop(right);

        let error = left.post(serde_json::json!({})).unwrap_err();
        assert!(matches!(error, ChannelError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_transfer_moves_a_working_port() {
        let (host, mut child) = message_channel();
        let (kept, handed_over) = message_channel();

        let (host_tx, _host_rx) = host.split();
        host_tx
            .post_with_transfer(serde_json::json!({"type": "connect"}), handed_over)
            .unwrap();

        let envelope = child.recv().await.unwrap();
        let mut adopted = envelope.transfer.expect("port should transfer");

        kept.post(serde_json::json!({"hello": true})).unwrap();
        let received = adopted.recv().await.unwrap();
        assert_eq!(received.payload["hello"], true);
    }

    #[tokio::test]
    async fn test_split_sender_keeps_channel_alive() {
        let (left, right) = message_channel();
        let (left_tx, _left_rx) = left.split();
        let (_right_tx, mut right_rx) = right.split();

        left_tx.post(serde_json::json!({"ok": 1})).unwrap();
        assert_eq!(right_rx.recv().await.unwrap().payload["ok"], 1);
    }
}
