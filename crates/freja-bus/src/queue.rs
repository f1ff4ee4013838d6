// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::{InboundMessage, OutboundMessage};

const QUEUE_CAPACITY: usize = 256;

/// A pair of bounded FIFO queues between channels and the agent loop.
///
/// Multiple producers, single consumer on inbound (the agent loop holds the
/// receiver through `consume_inbound`); outbound may be drained by several
/// channel adapters, serialized through the receiver lock.  Cloning the bus
/// clones handles to the same queues.
#[derive(Clone)]
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Arc<Mutex<mpsc::Receiver<InboundMessage>>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Arc<Mutex<mpsc::Receiver<OutboundMessage>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
        }
    }

    pub async fn publish_inbound(&self, msg: InboundMessage) {
        // The send only fails when the receiver is gone, i.e. during
        // shutdown; the message is dropped then.
        let _ = self.inbound_tx.send(msg).await;
    }

    /// Wait up to `timeout` for the next inbound message.
    ///
    /// Returns `None` on timeout, a distinguishable result so the agent
    /// loop can check its stop flag at roughly 1 Hz.
    pub async fn consume_inbound(&self, timeout: Duration) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    pub async fn publish_outbound(&self, msg: OutboundMessage) {
        let _ = self.outbound_tx.send(msg).await;
    }

    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        rx.recv().await
    }

    /// Non-blocking outbound drain, used by tests and shutdown paths.
    pub async fn try_consume_outbound(&self) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        rx.try_recv().ok()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inbound_round_trip_is_fifo() {
        let bus = MessageBus::new();
        bus.publish_inbound(InboundMessage::new("cli", "u", "1", "first")).await;
        bus.publish_inbound(InboundMessage::new("cli", "u", "1", "second")).await;

        let a = bus.consume_inbound(Duration::from_millis(100)).await.unwrap();
        let b = bus.consume_inbound(Duration::from_millis(100)).await.unwrap();
        assert_eq!(a.content, "first");
        assert_eq!(b.content, "second");
    }

    #[tokio::test]
    async fn consume_inbound_times_out_when_empty() {
        let bus = MessageBus::new();
        let got = bus.consume_inbound(Duration::from_millis(20)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn outbound_round_trip_preserves_message() {
        let bus = MessageBus::new();
        let mut msg = OutboundMessage::new("telegram", "999", "done");
        msg.media.push("/tmp/file.png".to_string());
        bus.publish_outbound(msg).await;

        let got = bus.consume_outbound().await.unwrap();
        assert_eq!(got.channel, "telegram");
        assert_eq!(got.chat_id, "999");
        assert_eq!(got.content, "done");
        assert_eq!(got.media, vec!["/tmp/file.png".to_string()]);
    }

    #[tokio::test]
    async fn cloned_bus_shares_queues() {
        let bus = MessageBus::new();
        let clone = bus.clone();
        clone.publish_inbound(InboundMessage::new("cli", "u", "1", "hi")).await;
        let got = bus.consume_inbound(Duration::from_millis(100)).await;
        assert!(got.is_some());
    }
}
