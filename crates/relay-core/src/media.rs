//! Attachment classification and inbound content assembly.

/// Content used when a message carries media but no text at all.
pub const MEDIA_ONLY: &str = "[media only]";

const AUDIO_EXTENSIONS: &[&str] = &[
    ".mp3", ".wav", ".ogg", ".oga", ".opus", ".m4a", ".flac", ".aac", ".wma",
];

/// Decide whether an attachment is audio from its name and declared MIME type.
pub fn is_audio_file(filename: &str, content_type: Option<&str>) -> bool {
    if let Some(ct) = content_type {
        let ct = ct.trim().to_ascii_lowercase();
        if ct.starts_with("audio/") || ct == "application/ogg" || ct == "application/x-ogg" {
            return true;
        }
    }
    let lower = filename.to_ascii_lowercase();
    AUDIO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Append a derived fragment to the accumulated message text.
pub fn append_content(content: &str, fragment: &str) -> String {
    if content.is_empty() {
        return fragment.to_string();
    }
    format!("{content}\n{fragment}")
}

pub fn attachment_placeholder(url: &str) -> String {
    format!("[attachment: {url}]")
}

pub fn audio_placeholder(filename: &str) -> String {
    format!("[audio: {filename}]")
}

pub fn audio_failed_placeholder(filename: &str) -> String {
    format!("[audio: {filename} (transcription failed)]")
}

pub fn audio_transcription(text: &str) -> String {
    format!("[audio transcription: {text}]")
}
