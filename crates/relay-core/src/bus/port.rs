use async_trait::async_trait;

use crate::{bus::types::InboundMessage, Result};

/// Where an adapter hands normalized inbound messages.
///
/// Ownership of the message moves to the sink; the adapter never touches it again.
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn publish_inbound(&self, msg: InboundMessage) -> Result<()>;
}
