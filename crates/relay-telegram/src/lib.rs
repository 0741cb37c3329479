//! Telegram adapter (teloxide).
//!
//! This crate implements the `relay-core` [`PlatformSession`] port over the
//! Telegram Bot API, using long polling for inbound updates.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use async_trait::async_trait;
use teloxide::{
    dispatching::{Dispatcher, ShutdownToken},
    dptree,
    prelude::*,
    types::{ChatId, Message},
};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::debug;

pub mod inbound;

use relay_core::{
    channel::{
        port::PlatformSession,
        types::{PlatformMessage, PlatformUser},
    },
    errors::Error,
    Result,
};

/// Telegram rejects text messages longer than this many characters.
pub const MAX_MESSAGE_LEN: usize = 4096;

struct Polling {
    shutdown: ShutdownToken,
    task: JoinHandle<()>,
}

/// Forwards dispatched messages into the adapter's event queue.
struct Forwarder {
    token: String,
    events: mpsc::Sender<PlatformMessage>,
}

pub struct TelegramSession {
    bot: Bot,
    token: String,
    polling: Mutex<Option<Polling>>,
    closed: AtomicBool,
}

impl TelegramSession {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            bot: Bot::new(token.clone()),
            token,
            polling: Mutex::new(None),
            closed: AtomicBool::new(true),
        }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn polling(&self) -> MutexGuard<'_, Option<Polling>> {
        self.polling.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::Send(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

async fn forward(bot: Bot, msg: Message, fwd: Arc<Forwarder>) -> ResponseResult<()> {
    let Some(event) = inbound::to_platform_message(&bot, &fwd.token, &msg).await else {
        debug!(chat_id = msg.chat.id.0, "ignoring message without sender");
        return Ok(());
    };
    if fwd.events.send(event).await.is_err() {
        debug!(chat_id = msg.chat.id.0, "event queue closed, dropping message");
    }
    Ok(())
}

/// Parse a bus chat id into a Telegram chat id.
pub fn parse_chat_id(chat_id: &str) -> Result<ChatId> {
    chat_id
        .trim()
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| Error::InvalidDestination(format!("not a telegram chat id: {chat_id:?}")))
}

/// Split text into chunks Telegram accepts, preferring to break after a newline.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest: Vec<char> = text.chars().collect();

    while rest.len() > max_chars {
        let window = &rest[..max_chars];
        let cut = window
            .iter()
            .rposition(|&c| c == '\n')
            .map(|i| i + 1)
            .filter(|&i| i > max_chars / 2)
            .unwrap_or(max_chars);
        chunks.push(rest[..cut].iter().collect());
        rest.drain(..cut);
    }
    if !rest.is_empty() {
        chunks.push(rest.into_iter().collect());
    }
    chunks
}

#[async_trait]
impl PlatformSession for TelegramSession {
    async fn open(&self, events: mpsc::Sender<PlatformMessage>) -> Result<()> {
        let mut polling = self.polling();
        if polling.is_some() {
            return Err(Error::Session("telegram session already open".to_string()));
        }

        let fwd = Arc::new(Forwarder {
            token: self.token.clone(),
            events,
        });
        let handler = dptree::entry().branch(Update::filter_message().endpoint(forward));

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![fwd])
            .default_handler(|_| async {})
            .build();
        let shutdown = dispatcher.shutdown_token();
        let task = tokio::spawn(async move { dispatcher.dispatch().await });

        *polling = Some(Polling { shutdown, task });
        self.closed.store(false, Ordering::SeqCst);
        debug!("telegram polling started");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let Some(Polling { shutdown, task }) = self.polling().take() else {
            return Ok(());
        };

        match shutdown.shutdown() {
            Ok(done) => done.await,
            Err(_) => {
                // Dispatcher never reached its polling loop.
                task.abort();
            }
        }
        debug!("telegram polling stopped");
        Ok(())
    }

    async fn current_user(&self) -> Result<PlatformUser> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| Error::Session(format!("telegram getMe failed: {e}")))?;
        Ok(inbound::author(&me.user))
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        self.ensure_open()?;
        let chat = parse_chat_id(chat_id)?;

        let chunks = split_message(text, MAX_MESSAGE_LEN);
        if chunks.is_empty() {
            debug!(chat_id, "skipping empty message");
            return Ok(());
        }
        for chunk in chunks {
            self.with_retry(|| self.bot.send_message(chat, chunk.clone()))
                .await?;
        }
        Ok(())
    }

    async fn send_typing(&self, chat_id: &str) -> Result<()> {
        self.ensure_open()?;
        let chat = parse_chat_id(chat_id)?;
        self.with_retry(|| {
            self.bot
                .send_chat_action(chat, teloxide::types::ChatAction::Typing)
        })
        .await?;
        Ok(())
    }
}
