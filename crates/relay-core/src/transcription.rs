use std::{path::Path, sync::Arc, time::Duration};

use tokio::time::{timeout_at, Instant};
use tracing::{debug, error};

use crate::{
    channel::port::Transcriber,
    errors::Error,
    media::{audio_failed_placeholder, audio_placeholder, audio_transcription},
    utils::truncate_text,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TranscriptOutcome {
    Transcribed(String),
    Failed,
    /// No transcriber configured, or it reports itself unavailable.
    Unavailable,
}

impl TranscriptOutcome {
    /// Text fragment to merge into the inbound message for this outcome.
    pub fn render(&self, filename: &str) -> String {
        match self {
            TranscriptOutcome::Transcribed(text) => audio_transcription(text),
            TranscriptOutcome::Failed => audio_failed_placeholder(filename),
            TranscriptOutcome::Unavailable => audio_placeholder(filename),
        }
    }
}

/// Optional transcriber with a per-call deadline.
#[derive(Clone)]
pub struct TranscriptionGate {
    transcriber: Option<Arc<dyn Transcriber>>,
    timeout: Duration,
}

impl TranscriptionGate {
    pub fn new(transcriber: Option<Arc<dyn Transcriber>>, timeout: Duration) -> Self {
        Self {
            transcriber,
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(30))
    }

    pub fn is_available(&self) -> bool {
        self.transcriber.as_ref().is_some_and(|t| t.is_available())
    }

    /// Transcribe one file.
    ///
    /// The deadline is created for this call only and dropped when it returns,
    /// so a message with many audio attachments never stacks up live timers.
    pub async fn transcribe(&self, path: &Path) -> TranscriptOutcome {
        let Some(transcriber) = self.transcriber.as_ref().filter(|t| t.is_available()) else {
            return TranscriptOutcome::Unavailable;
        };

        let deadline = Instant::now() + self.timeout;
        let result = match timeout_at(deadline, transcriber.transcribe(path, deadline)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: "transcription",
                after: self.timeout,
            }),
        };

        match result {
            Ok(text) if !text.trim().is_empty() => {
                debug!(text = %truncate_text(&text, 50), "audio transcribed successfully");
                TranscriptOutcome::Transcribed(text)
            }
            Ok(_) => {
                error!(path = %path.display(), "voice transcription returned empty text");
                TranscriptOutcome::Failed
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "voice transcription failed");
                TranscriptOutcome::Failed
            }
        }
    }
}
