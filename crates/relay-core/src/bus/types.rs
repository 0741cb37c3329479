use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Message received from a platform, normalized for the bus.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    pub session_key: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    pub fn session_key_for(channel: &str, chat_id: &str) -> String {
        format!("{channel}:{chat_id}")
    }
}

/// Message produced by a bus consumer for delivery through an adapter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_final: bool,
    /// Internal signal message, never shown to users.
    #[serde(default, skip_serializing_if = "is_false")]
    pub control: bool,
}

impl OutboundMessage {
    pub fn text(channel: &str, chat_id: &str, content: impl Into<String>) -> Self {
        Self {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Mark this message as the final reply for `request_id`.
    pub fn final_for(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self.is_final = true;
        self
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}
