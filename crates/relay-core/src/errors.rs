use std::time::Duration;

/// Core error type for the relay.
///
/// Platform and transcription crates map their client errors into this type so
/// the adapter can tell fatal start failures, send failures and timeouts apart.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("{channel} channel not running")]
    NotRunning { channel: String },

    #[error("{channel} channel is {state}")]
    InvalidState { channel: String, state: String },

    #[error("destination chat id is empty")]
    EmptyDestination,

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("send failed: {0}")]
    Send(String),

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("channel closed")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
