use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

const DEFAULT_CHANNEL_NAME: &str = "telegram";
const DEFAULT_TRANSCRIPTION_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";
const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 20 * 1024 * 1024;

/// Typed configuration for the relay.
#[derive(Clone, Debug)]
pub struct Config {
    // Platform
    pub telegram_bot_token: String,
    pub channel_name: String,
    pub allow_from: Vec<String>,

    // Transcription
    pub openai_api_key: Option<String>,
    pub transcription_base_url: String,
    pub transcription_model: String,
    pub transcription_timeout: Duration,

    // Outbound
    pub send_timeout: Duration,

    // Typing indicator
    pub typing_interval: Duration,
    pub typing_max_duration: Duration,

    // Downloads
    pub media_dir: PathBuf,
    pub download_timeout: Duration,
    pub max_download_bytes: u64,

    // Bus
    pub bus_capacity: usize,
}

impl Config {
    /// Load from the process environment, after merging an optional `.env`.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;
        let channel_name = get("RELAY_CHANNEL_NAME")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_CHANNEL_NAME.to_string());
        let allow_from = parse_csv(get("RELAY_ALLOW_FROM"));

        let openai_api_key = get("OPENAI_API_KEY");
        let transcription_base_url = get("TRANSCRIPTION_BASE_URL")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_BASE_URL.to_string());
        let transcription_model = get("TRANSCRIPTION_MODEL")
            .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string());
        let transcription_timeout =
            millis(&get, "TRANSCRIPTION_TIMEOUT_MS", 30_000)?;

        let send_timeout = millis(&get, "SEND_TIMEOUT_MS", 10_000)?;
        let typing_interval = millis(&get, "TYPING_INTERVAL_MS", 8_000)?;
        let typing_max_duration = millis(&get, "TYPING_MAX_DURATION_MS", 300_000)?;

        let media_dir = get("MEDIA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("relay-media"));
        let download_timeout = millis(&get, "DOWNLOAD_TIMEOUT_MS", 60_000)?;
        let max_download_bytes =
            positive(&get, "MAX_DOWNLOAD_BYTES", DEFAULT_MAX_DOWNLOAD_BYTES)?;

        let bus_capacity = positive(&get, "BUS_CAPACITY", 256)?;
        let bus_capacity = usize::try_from(bus_capacity)
            .map_err(|_| Error::Config(format!("BUS_CAPACITY is too large: {bus_capacity}")))?;

        Ok(Self {
            telegram_bot_token,
            channel_name,
            allow_from,
            openai_api_key,
            transcription_base_url,
            transcription_model,
            transcription_timeout,
            send_timeout,
            typing_interval,
            typing_max_duration,
            media_dir,
            download_timeout,
            max_download_bytes,
            bus_capacity,
        })
    }

    pub fn transcription_configured(&self) -> bool {
        self.openai_api_key.is_some()
    }
}

fn millis(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    positive(get, key, default).map(Duration::from_millis)
}

fn positive(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(Error::Config(format!("{key} must be greater than zero"))),
        Ok(v) => Ok(v),
        Err(_) => Err(Error::Config(format!("{key} is not a number: {raw}"))),
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
