//! Canonical envelopes exchanged with the internal message bus.

pub mod port;
pub mod queue;
pub mod types;

pub use port::InboundSink;
pub use queue::MessageBus;
pub use types::{InboundMessage, OutboundMessage};
