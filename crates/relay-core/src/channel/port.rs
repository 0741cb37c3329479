use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{sync::mpsc, time::Instant};

use crate::{
    channel::types::{PlatformMessage, PlatformUser},
    Result,
};

/// Connection to a chat platform.
///
/// Telegram is the first implementation; anything that can push messages and
/// post text/typing signals fits behind the same interface.
#[async_trait]
pub trait PlatformSession: Send + Sync {
    /// Connect and start delivering inbound messages on `events`.
    async fn open(&self, events: mpsc::Sender<PlatformMessage>) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// The account this session is logged in as.
    async fn current_user(&self) -> Result<PlatformUser>;

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()>;

    /// Show a "typing..." indicator. Returns [`Error::Closed`](crate::Error::Closed)
    /// once the session can no longer deliver signals.
    async fn send_typing(&self, chat_id: &str) -> Result<()>;
}

/// Speech-to-text backend.
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn is_available(&self) -> bool;

    /// Transcribe a local audio file, giving up at `deadline`.
    async fn transcribe(&self, path: &Path, deadline: Instant) -> Result<String>;
}

/// Fetches remote attachments to local temporary files.
#[async_trait]
pub trait AttachmentDownloader: Send + Sync {
    /// Local path of the downloaded file, or `None` if anything went wrong.
    async fn download(&self, url: &str, suggested_name: &str) -> Option<PathBuf>;
}
