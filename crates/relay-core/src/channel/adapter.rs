//! Platform-agnostic channel adapter.
//!
//! Owns the session lifecycle, filters and normalizes inbound platform
//! messages for the bus, and delivers outbound messages with a send timeout.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{sync::mpsc, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    bus::{
        port::InboundSink,
        types::{InboundMessage, OutboundMessage},
    },
    channel::{
        port::{AttachmentDownloader, PlatformSession},
        types::{ChannelState, PlatformMessage, PlatformUser},
        typing::{TypingConfig, TypingScheduler},
    },
    errors::Error,
    media::{append_content, attachment_placeholder, is_audio_file, MEDIA_ONLY},
    security::AllowList,
    transcription::TranscriptionGate,
    utils::truncate_text,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct AdapterConfig {
    pub send_timeout: Duration,
    pub typing: TypingConfig,
    /// Capacity of the queue between the platform session and the adapter.
    pub inbound_buffer: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(10),
            typing: TypingConfig::default(),
            inbound_buffer: 64,
        }
    }
}

pub struct ChannelAdapter {
    name: String,
    session: Arc<dyn PlatformSession>,
    sink: Arc<dyn InboundSink>,
    downloader: Arc<dyn AttachmentDownloader>,
    allow_list: AllowList,
    transcription: TranscriptionGate,
    typing: TypingScheduler,
    cfg: AdapterConfig,
    state: Mutex<ChannelState>,
    identity: Mutex<Option<PlatformUser>>,
    pump: Mutex<Option<CancellationToken>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChannelAdapter {
    pub fn new(
        name: impl Into<String>,
        session: Arc<dyn PlatformSession>,
        sink: Arc<dyn InboundSink>,
        downloader: Arc<dyn AttachmentDownloader>,
        cfg: AdapterConfig,
    ) -> Self {
        let name = name.into();
        let typing = TypingScheduler::new(name.clone(), Arc::clone(&session), cfg.typing);
        Self {
            name,
            session,
            sink,
            downloader,
            allow_list: AllowList::default(),
            transcription: TranscriptionGate::disabled(),
            typing,
            cfg,
            state: Mutex::new(ChannelState::Stopped),
            identity: Mutex::new(None),
            pump: Mutex::new(None),
        }
    }

    pub fn with_allow_list(mut self, allow_list: AllowList) -> Self {
        self.allow_list = allow_list;
        self
    }

    pub fn with_transcription(mut self, transcription: TranscriptionGate) -> Self {
        self.transcription = transcription;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ChannelState {
        *lock(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == ChannelState::Running
    }

    pub fn typing(&self) -> &TypingScheduler {
        &self.typing
    }

    /// The bot account, once started.
    pub fn identity(&self) -> Option<PlatformUser> {
        lock(&self.identity).clone()
    }

    fn set_state(&self, state: ChannelState) {
        *lock(&self.state) = state;
    }

    fn invalid_state(&self, state: ChannelState) -> Error {
        Error::InvalidState {
            channel: self.name.clone(),
            state: state.to_string(),
        }
    }

    // ============== Lifecycle ==============

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if *state != ChannelState::Stopped {
                return Err(self.invalid_state(*state));
            }
            *state = ChannelState::Starting;
        }
        info!(channel = %self.name, "starting channel");

        let (tx, rx) = mpsc::channel(self.cfg.inbound_buffer.max(1));
        if let Err(e) = self.session.open(tx).await {
            self.set_state(ChannelState::Stopped);
            return Err(Error::Session(format!("failed to open session: {e}")));
        }

        let me = match self.session.current_user().await {
            Ok(me) => me,
            Err(e) => {
                if let Err(close_err) = self.session.close().await {
                    warn!(channel = %self.name, error = %close_err, "failed to close session after start failure");
                }
                self.set_state(ChannelState::Stopped);
                return Err(Error::Session(format!("failed to get bot user: {e}")));
            }
        };
        info!(
            channel = %self.name,
            username = me.username.as_deref().unwrap_or(""),
            user_id = %me.id,
            "channel connected"
        );
        *lock(&self.identity) = Some(me);

        let cancel = CancellationToken::new();
        *lock(&self.pump) = Some(cancel.clone());
        self.typing.reopen();
        self.set_state(ChannelState::Running);
        tokio::spawn(Arc::clone(self).pump(rx, cancel));
        Ok(())
    }

    /// Stop the channel: cancel every typing indicator, stop reading inbound
    /// messages and close the session. Stopping a stopped channel is a no-op.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            let current = *state;
            match current {
                ChannelState::Stopped | ChannelState::Stopping => return Ok(()),
                ChannelState::Starting => return Err(self.invalid_state(current)),
                ChannelState::Running => *state = ChannelState::Stopping,
            }
        }
        info!(channel = %self.name, "stopping channel");

        let cancelled = self.typing.stop_all();
        if cancelled > 0 {
            debug!(channel = %self.name, count = cancelled, "cancelled typing indicators");
        }
        if let Some(cancel) = lock(&self.pump).take() {
            cancel.cancel();
        }

        let result = self
            .session
            .close()
            .await
            .map_err(|e| Error::Session(format!("failed to close session: {e}")));
        self.set_state(ChannelState::Stopped);
        result
    }

    async fn pump(self: Arc<Self>, mut rx: mpsc::Receiver<PlatformMessage>, cancel: CancellationToken) {
        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            let adapter = Arc::clone(&self);
            tokio::spawn(async move { adapter.handle_inbound(msg).await });
        }
        debug!(channel = %self.name, "inbound pump stopped");
    }

    // ============== Outbound ==============

    pub async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotRunning {
                channel: self.name.clone(),
            });
        }

        let chat_id = msg.chat_id.trim();
        if chat_id.is_empty() {
            return Err(Error::EmptyDestination);
        }

        let result = if msg.control {
            Ok(())
        } else {
            self.deliver(chat_id, &msg.content).await
        };

        // Stop typing only once the final reply of this request has resolved.
        // Other messages (progress, system notices) must not end another request's indicator.
        if msg.is_final {
            self.typing.stop(&msg.request_id);
        }
        result
    }

    async fn deliver(&self, chat_id: &str, text: &str) -> Result<()> {
        match timeout(self.cfg.send_timeout, self.session.send_text(chat_id, text)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: "send message",
                after: self.cfg.send_timeout,
            }),
        }
    }

    // ============== Inbound ==============

    /// Normalize one platform message and hand it to the bus.
    ///
    /// Rejections, downloads and transcription failures never surface as errors;
    /// they are logged and either dropped or folded into the message content.
    pub async fn handle_inbound(&self, msg: PlatformMessage) {
        if !self.is_running() {
            debug!(channel = %self.name, "dropping inbound message while not running");
            return;
        }
        if self.is_self(&msg.author) {
            return;
        }

        // Check the allowlist before downloading or transcribing anything.
        if !self
            .allow_list
            .is_allowed(&msg.author.id, msg.author.username.as_deref())
        {
            debug!(channel = %self.name, user_id = %msg.author.id, "message rejected by allowlist");
            return;
        }

        let request_id = msg.id.clone();
        let chat_id = msg.chat_id.clone();

        let mut local_files = TempFiles::default();
        let Some(inbound) = self.normalize(msg, &mut local_files).await else {
            return;
        };

        // Downloads and transcription can outlast a concurrent stop().
        if !self.is_running() {
            debug!(channel = %self.name, chat_id = %chat_id, "channel stopped while processing, dropping inbound message");
            return;
        }

        self.typing.start(&request_id, &chat_id);
        if let Err(e) = self.sink.publish_inbound(inbound).await {
            warn!(channel = %self.name, chat_id = %chat_id, error = %e, "failed to publish inbound message");
            self.typing.stop(&request_id);
        }
    }

    fn is_self(&self, author: &PlatformUser) -> bool {
        lock(&self.identity)
            .as_ref()
            .is_some_and(|me| me.id == author.id)
    }

    /// Build the bus message. Non-audio attachments become media references
    /// only, without a text fragment, so a lone image yields `[media only]`.
    /// Audio is transcribed; audio that fails to download falls back to its URL.
    async fn normalize(
        &self,
        msg: PlatformMessage,
        local_files: &mut TempFiles,
    ) -> Option<InboundMessage> {
        let mut content = msg.text;
        let mut media = Vec::with_capacity(msg.attachments.len());

        for attachment in &msg.attachments {
            if !is_audio_file(&attachment.filename, attachment.content_type.as_deref()) {
                media.push(attachment.url.clone());
                continue;
            }

            match self
                .downloader
                .download(&attachment.url, &attachment.filename)
                .await
            {
                Some(path) => {
                    local_files.push(path.clone());
                    let outcome = self.transcription.transcribe(&path).await;
                    content = append_content(&content, &outcome.render(&attachment.filename));
                }
                None => {
                    warn!(
                        channel = %self.name,
                        filename = %attachment.filename,
                        "failed to download audio attachment"
                    );
                    media.push(attachment.url.clone());
                    content = append_content(&content, &attachment_placeholder(&attachment.url));
                }
            }
        }

        if content.is_empty() && media.is_empty() {
            return None;
        }
        if content.is_empty() {
            content = MEDIA_ONLY.to_string();
        }

        let author = msg.author;
        debug!(
            channel = %self.name,
            sender_name = author.display_name(),
            sender_id = %author.id,
            preview = %truncate_text(&content, 50),
            "received message"
        );

        let metadata = HashMap::from([
            ("message_id".to_string(), msg.id.clone()),
            ("request_id".to_string(), msg.id),
            ("user_id".to_string(), author.id.clone()),
            (
                "username".to_string(),
                author.username.clone().unwrap_or_default(),
            ),
            ("display_name".to_string(), author.display_name().to_string()),
            ("group_id".to_string(), msg.group_id.unwrap_or_default()),
            ("channel_id".to_string(), msg.chat_id.clone()),
            ("is_dm".to_string(), msg.is_direct.to_string()),
        ]);

        Some(InboundMessage {
            channel: self.name.clone(),
            sender_id: author.id,
            session_key: InboundMessage::session_key_for(&self.name, &msg.chat_id),
            chat_id: msg.chat_id,
            content,
            media,
            metadata,
        })
    }
}

/// Local downloads owned by one inbound message; removed on drop.
#[derive(Default)]
struct TempFiles(Vec<PathBuf>);

impl TempFiles {
    fn push(&mut self, path: PathBuf) {
        self.0.push(path);
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for file in self.0.drain(..) {
            if let Err(e) = std::fs::remove_file(&file) {
                debug!(file = %file.display(), error = %e, "failed to cleanup temp file");
            }
        }
    }
}
