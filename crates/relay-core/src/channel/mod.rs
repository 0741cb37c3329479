//! Chat platform channel: ports, the adapter and the typing scheduler.

pub mod adapter;
pub mod dispatch;
pub mod port;
pub mod types;
pub mod typing;

pub use adapter::{AdapterConfig, ChannelAdapter};
pub use dispatch::dispatch_outbound;
pub use port::{AttachmentDownloader, PlatformSession, Transcriber};
pub use types::{Attachment, ChannelState, PlatformMessage, PlatformUser};
pub use typing::{TypingConfig, TypingScheduler};
