//! Telegram `Message` to [`PlatformMessage`] conversion.

use teloxide::{prelude::*, types::Message};
use tracing::warn;

use relay_core::channel::types::{Attachment, PlatformMessage, PlatformUser};

/// A file referenced by a message, before its download URL is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRef {
    pub file_id: String,
    pub filename: String,
    pub content_type: Option<String>,
}

/// Request id for a message: unique across chats, stable for one update.
pub fn request_id(msg: &Message) -> String {
    format!("{}:{}", msg.chat.id.0, msg.id.0)
}

/// Bot API download URL for a resolved file path. Contains the bot token.
pub fn file_url(token: &str, file_path: &str) -> String {
    format!("https://api.telegram.org/file/bot{token}/{file_path}")
}

pub fn author(user: &teloxide::types::User) -> PlatformUser {
    let full_name = user.full_name();
    PlatformUser {
        id: user.id.0.to_string(),
        username: user.username.clone(),
        display_name: (!full_name.trim().is_empty()).then_some(full_name),
    }
}

/// Files carried by a message, in a stable order. For photos only the largest
/// size is kept.
pub fn file_refs(msg: &Message) -> Vec<FileRef> {
    let mut refs = Vec::new();

    if let Some(doc) = msg.document() {
        refs.push(FileRef {
            file_id: doc.file.id.clone(),
            filename: doc.file_name.clone().unwrap_or_else(|| "document".to_string()),
            content_type: doc.mime_type.as_ref().map(|m| m.to_string()),
        });
    }
    if let Some(audio) = msg.audio() {
        refs.push(FileRef {
            file_id: audio.file.id.clone(),
            filename: audio.file_name.clone().unwrap_or_else(|| "audio".to_string()),
            content_type: audio.mime_type.as_ref().map(|m| m.to_string()),
        });
    }
    if let Some(voice) = msg.voice() {
        refs.push(FileRef {
            file_id: voice.file.id.clone(),
            filename: "voice.ogg".to_string(),
            content_type: Some(
                voice
                    .mime_type
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "audio/ogg".to_string()),
            ),
        });
    }
    if let Some(video) = msg.video() {
        refs.push(FileRef {
            file_id: video.file.id.clone(),
            filename: video.file_name.clone().unwrap_or_else(|| "video.mp4".to_string()),
            content_type: video.mime_type.as_ref().map(|m| m.to_string()),
        });
    }
    if let Some(photo) = msg
        .photo()
        .and_then(|sizes| sizes.iter().max_by_key(|p| p.width * p.height))
    {
        refs.push(FileRef {
            file_id: photo.file.id.clone(),
            filename: "photo.jpg".to_string(),
            content_type: Some("image/jpeg".to_string()),
        });
    }

    refs
}

/// Everything of a message except its attachments, which need API calls.
///
/// Returns `None` for messages without a sender (channel posts).
pub fn base_message(msg: &Message) -> Option<PlatformMessage> {
    let user = msg.from()?;
    let is_direct = msg.chat.is_private();
    Some(PlatformMessage {
        id: request_id(msg),
        chat_id: msg.chat.id.0.to_string(),
        group_id: (!is_direct).then(|| msg.chat.id.0.to_string()),
        is_direct,
        author: author(user),
        text: msg.text().or(msg.caption()).unwrap_or_default().to_string(),
        attachments: Vec::new(),
    })
}

/// Convert a message, resolving each file to its download URL.
///
/// Files that cannot be resolved are skipped with a warning.
pub async fn to_platform_message(bot: &Bot, token: &str, msg: &Message) -> Option<PlatformMessage> {
    let mut out = base_message(msg)?;

    for file in file_refs(msg) {
        match bot.get_file(file.file_id.clone()).await {
            Ok(resolved) => out.attachments.push(Attachment {
                url: file_url(token, &resolved.path),
                filename: file.filename,
                content_type: file.content_type,
            }),
            Err(e) => {
                warn!(chat_id = %out.chat_id, filename = %file.filename, error = %e, "failed to resolve telegram file");
            }
        }
    }

    Some(out)
}
