//! OpenAI-compatible speech-to-text adapter.
//!
//! Uploads the audio file to `<base>/audio/transcriptions` and returns the `text`
//! field of the response. Works with any server speaking the same API.

use std::path::Path;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use relay_core::{channel::port::Transcriber, errors::Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "whisper-1";

#[derive(Clone, Debug)]
pub struct OpenAiTranscriber {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl OpenAiTranscriber {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            http,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'))
    }
}

/// MIME type for an audio upload, from the file extension.
pub fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "m4a" => "audio/mp4",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "wma" => "audio/x-ms-wma",
        "webm" => "audio/webm",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn transcribe(&self, path: &Path, deadline: Instant) -> Result<String> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout {
                operation: "transcription",
                after: remaining,
            });
        }

        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("audio.ogg")
            .to_string();

        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(guess_mime(path))
                    .map_err(|e| Error::Transcription(format!("multipart error: {e}")))?,
            );

        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .timeout(remaining)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Transcription(format!("request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Transcription(format!(
                "{status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Transcription(format!("invalid response: {e}")))?;

        let text = v
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();

        if text.is_empty() {
            return Err(Error::Transcription("empty transcript".to_string()));
        }

        debug!(model = %self.model, chars = text.chars().count(), "transcription received");
        Ok(text)
    }
}
