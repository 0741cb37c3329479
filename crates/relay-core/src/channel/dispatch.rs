//! Outbound delivery from the bus to a channel adapter.

use std::{collections::HashMap, sync::Arc};

use tokio::{sync::mpsc, task::JoinSet};
use tracing::warn;

use crate::{
    bus::{types::OutboundMessage, MessageBus},
    channel::adapter::ChannelAdapter,
};

/// Deliver outbound bus messages until the bus is closed and drained.
///
/// Each chat gets its own worker, so messages to one chat keep their order
/// while a slow chat never holds up the others. Returns once every worker has
/// finished its queue.
pub async fn dispatch_outbound(bus: Arc<MessageBus>, adapter: Arc<ChannelAdapter>) {
    let mut chats: HashMap<String, mpsc::UnboundedSender<OutboundMessage>> = HashMap::new();
    let mut workers = JoinSet::new();

    while let Some(msg) = bus.consume_outbound().await {
        if msg.channel != adapter.name() {
            warn!(channel = %msg.channel, "no channel for outbound message");
            continue;
        }

        let tx = chats.entry(msg.chat_id.trim().to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            workers.spawn(chat_worker(Arc::clone(&adapter), rx));
            tx
        });
        if let Err(mpsc::error::SendError(msg)) = tx.send(msg) {
            warn!(chat_id = %msg.chat_id, "outbound worker gone, dropping message");
        }
    }

    drop(chats);
    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            warn!(error = %e, "outbound worker panicked");
        }
    }
}

async fn chat_worker(adapter: Arc<ChannelAdapter>, mut rx: mpsc::UnboundedReceiver<OutboundMessage>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = adapter.send(&msg).await {
            warn!(channel = %msg.channel, chat_id = %msg.chat_id, error = %e, "failed to send message");
        }
    }
}
