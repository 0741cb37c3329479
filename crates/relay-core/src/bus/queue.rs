use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{
    bus::{
        port::InboundSink,
        types::{InboundMessage, OutboundMessage},
    },
    errors::Error,
    Result,
};

/// In-process bus with bounded inbound and outbound queues.
///
/// Closing the bus rejects new messages and wakes parked consumers; messages
/// already queued can still be drained.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<mpsc::Receiver<OutboundMessage>>,
    closed: CancellationToken,
}

async fn recv_until_closed<T>(rx: &Mutex<mpsc::Receiver<T>>, closed: &CancellationToken) -> Option<T> {
    let mut rx = rx.lock().await;
    tokio::select! {
        biased;
        msg = rx.recv() => msg,
        _ = closed.cancelled() => {
            rx.close();
            rx.try_recv().ok()
        }
    }
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
            closed: CancellationToken::new(),
        }
    }

    /// Next inbound message, or `None` once the bus is closed and drained.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        recv_until_closed(&self.inbound_rx, &self.closed).await
    }

    pub async fn publish_outbound(&self, msg: OutboundMessage) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::Closed);
        }
        self.outbound_tx.send(msg).await.map_err(|_| Error::Closed)
    }

    /// Next outbound message, or `None` once the bus is closed and drained.
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        recv_until_closed(&self.outbound_rx, &self.closed).await
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl InboundSink for MessageBus {
    async fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::Closed);
        }
        self.inbound_tx.send(msg).await.map_err(|_| Error::Closed)
    }
}
