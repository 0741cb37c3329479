//! Fakes for the ports, shared by the unit tests of this crate.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, Notify},
    time::Instant,
};

use crate::{
    bus::{port::InboundSink, types::InboundMessage},
    channel::{
        port::{AttachmentDownloader, PlatformSession, Transcriber},
        types::{PlatformMessage, PlatformUser},
    },
    errors::Error,
    Result,
};

/// Let spawned tasks run until they block again.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum TypingMode {
    #[default]
    Ok,
    Fail,
    Closed,
}

#[derive(Clone, Debug, Default)]
pub(crate) enum SendMode {
    #[default]
    Ok,
    Fail,
    Hang,
    /// Hang for this chat only; other chats succeed.
    HangChat(String),
    /// Block until the gate is notified, then succeed.
    Gate(Arc<Notify>),
}

#[derive(Default)]
pub(crate) struct FakeSession {
    typing: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, String)>>,
    send_attempts: AtomicUsize,
    send_resolved_at: Mutex<Option<Instant>>,
    events: Mutex<Option<mpsc::Sender<PlatformMessage>>>,
    closes: AtomicUsize,
    fail_open: AtomicBool,
    fail_identity: AtomicBool,
    typing_mode: Mutex<TypingMode>,
    send_mode: Mutex<SendMode>,
}

impl FakeSession {
    pub(crate) fn set_typing_mode(&self, mode: TypingMode) {
        *self.typing_mode.lock().unwrap() = mode;
    }

    pub(crate) fn set_send_mode(&self, mode: SendMode) {
        *self.send_mode.lock().unwrap() = mode;
    }

    pub(crate) fn fail_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_identity(&self) {
        self.fail_identity.store(true, Ordering::SeqCst);
    }

    pub(crate) fn typing_count(&self) -> usize {
        self.typing.lock().unwrap().len()
    }

    pub(crate) fn typing_chats(&self) -> Vec<String> {
        self.typing.lock().unwrap().clone()
    }

    pub(crate) fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn send_resolved_at(&self) -> Option<Instant> {
        *self.send_resolved_at.lock().unwrap()
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.events.lock().unwrap().is_some()
    }

    /// Push an inbound message as if it arrived from the platform.
    pub(crate) async fn emit(&self, msg: PlatformMessage) {
        let tx = self.events.lock().unwrap().clone();
        tx.expect("session not open").send(msg).await.unwrap();
    }
}

#[async_trait]
impl PlatformSession for FakeSession {
    async fn open(&self, events: mpsc::Sender<PlatformMessage>) -> Result<()> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Session("connection refused".to_string()));
        }
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().take();
        Ok(())
    }

    async fn current_user(&self) -> Result<PlatformUser> {
        if self.fail_identity.load(Ordering::SeqCst) {
            return Err(Error::Session("unauthorized".to_string()));
        }
        Ok(PlatformUser {
            id: "bot".to_string(),
            username: Some("relay_bot".to_string()),
            display_name: None,
        })
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        let mode = self.send_mode.lock().unwrap().clone();
        let result = match mode {
            SendMode::Ok => Ok(()),
            SendMode::Fail => Err(Error::Send("bad request".to_string())),
            SendMode::Hang => std::future::pending().await,
            SendMode::HangChat(chat) if chat == chat_id => std::future::pending().await,
            SendMode::HangChat(_) => Ok(()),
            SendMode::Gate(gate) => {
                gate.notified().await;
                Ok(())
            }
        };
        if result.is_ok() {
            self.sent
                .lock()
                .unwrap()
                .push((chat_id.to_string(), text.to_string()));
        }
        *self.send_resolved_at.lock().unwrap() = Some(Instant::now());
        result
    }

    async fn send_typing(&self, chat_id: &str) -> Result<()> {
        self.typing.lock().unwrap().push(chat_id.to_string());
        match *self.typing_mode.lock().unwrap() {
            TypingMode::Ok => Ok(()),
            TypingMode::Fail => Err(Error::Send("rate limited".to_string())),
            TypingMode::Closed => Err(Error::Closed),
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    messages: Mutex<Vec<InboundMessage>>,
    reject: AtomicBool,
}

impl RecordingSink {
    pub(crate) fn messages(&self) -> Vec<InboundMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub(crate) fn reject_all(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl InboundSink for RecordingSink {
    async fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        self.messages.lock().unwrap().push(msg);
        Ok(())
    }
}

/// Writes a small file per download into a private temp dir.
pub(crate) struct FakeDownloader {
    dir: PathBuf,
    fail: AtomicBool,
    downloads: Mutex<Vec<PathBuf>>,
}

impl FakeDownloader {
    pub(crate) fn new(prefix: &str) -> Self {
        static N: AtomicUsize = AtomicUsize::new(0);
        let n = N.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("{prefix}-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        Self {
            dir,
            fail: AtomicBool::new(false),
            downloads: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(prefix: &str) -> Self {
        let d = Self::new(prefix);
        d.fail.store(true, Ordering::SeqCst);
        d
    }

    /// Every path handed out so far.
    pub(crate) fn downloads(&self) -> Vec<PathBuf> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttachmentDownloader for FakeDownloader {
    async fn download(&self, url: &str, suggested_name: &str) -> Option<PathBuf> {
        if self.fail.load(Ordering::SeqCst) {
            return None;
        }
        let mut downloads = self.downloads.lock().unwrap();
        let path = self.dir.join(format!("{}_{suggested_name}", downloads.len()));
        std::fs::write(&path, url).ok()?;
        downloads.push(path.clone());
        Some(path)
    }
}

#[derive(Clone, Debug)]
pub(crate) enum TranscribeMode {
    Text(String),
    Fail,
    Hang,
}

pub(crate) struct FakeTranscriber {
    available: bool,
    mode: TranscribeMode,
    calls: AtomicUsize,
    last_deadline: Mutex<Option<Instant>>,
}

impl FakeTranscriber {
    pub(crate) fn new(mode: TranscribeMode) -> Self {
        Self {
            available: true,
            mode,
            calls: AtomicUsize::new(0),
            last_deadline: Mutex::new(None),
        }
    }

    pub(crate) fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(TranscribeMode::Fail)
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_deadline(&self) -> Option<Instant> {
        *self.last_deadline.lock().unwrap()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn transcribe(&self, _path: &Path, deadline: Instant) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_deadline.lock().unwrap() = Some(deadline);
        match &self.mode {
            TranscribeMode::Text(t) => Ok(t.clone()),
            TranscribeMode::Fail => Err(Error::Transcription("bad audio".to_string())),
            TranscribeMode::Hang => std::future::pending().await,
        }
    }
}
