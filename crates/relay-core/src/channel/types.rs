use std::fmt;

/// Identity of a platform account (a sender, or the bot itself).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlatformUser {
    pub id: String,
    pub username: Option<String>,
    /// Human-readable name; falls back to `username` when absent.
    pub display_name: Option<String>,
}

impl PlatformUser {
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or(&self.id)
    }
}

/// A file attached to an inbound platform message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    pub content_type: Option<String>,
}

/// Platform event as delivered by a [`PlatformSession`](super::port::PlatformSession).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlatformMessage {
    /// Native event id; also used as the request id for typing indicators.
    pub id: String,
    pub chat_id: String,
    /// Group/guild the chat belongs to; `None` for direct messages.
    pub group_id: Option<String>,
    pub is_direct: bool,
    pub author: PlatformUser,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

/// Adapter lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Stopped => "stopped",
            ChannelState::Starting => "starting",
            ChannelState::Running => "running",
            ChannelState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}
