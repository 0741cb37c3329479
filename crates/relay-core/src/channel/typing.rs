//! Per-request typing indicators.
//!
//! Every in-flight request gets its own heartbeat task that keeps the
//! platform's "typing..." indicator alive until the final reply is sent, a hard
//! timeout elapses, or the adapter shuts down. Indicators are keyed by request,
//! not by chat, so concurrent requests in one chat never cancel each other.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{channel::port::PlatformSession, errors::Error};

#[derive(Clone, Copy, Debug)]
pub struct TypingConfig {
    /// Spacing between typing signals.
    pub interval: Duration,
    /// Hard stop for an indicator whose request never completes.
    pub max_duration: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(8),
            max_duration: Duration::from_secs(5 * 60),
        }
    }
}

struct TypingTask {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Registry {
    tasks: HashMap<String, TypingTask>,
    seq: u64,
    /// Set by `stop_all`; new indicators are refused until `reopen`.
    closed: bool,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct TypingScheduler {
    channel: String,
    session: Arc<dyn PlatformSession>,
    cfg: TypingConfig,
    registry: Arc<Mutex<Registry>>,
    live: Arc<AtomicUsize>,
}

impl TypingScheduler {
    pub fn new(
        channel: impl Into<String>,
        session: Arc<dyn PlatformSession>,
        cfg: TypingConfig,
    ) -> Self {
        Self {
            channel: channel.into(),
            session,
            cfg,
            registry: Arc::new(Mutex::new(Registry::default())),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn key(&self, request_id: &str) -> Option<String> {
        if request_id.is_empty() {
            return None;
        }
        Some(format!("{}:req:{request_id}", self.channel))
    }

    /// Start an indicator for `request_id` in `chat_id`.
    ///
    /// Returns `false` (and does nothing) if one is already running for this
    /// request, or if the scheduler was shut down by [`stop_all`](Self::stop_all).
    pub fn start(&self, request_id: &str, chat_id: &str) -> bool {
        let Some(key) = self.key(request_id) else {
            return false;
        };

        let (id, cancel) = {
            let mut reg = lock(&self.registry);
            if reg.closed || reg.tasks.contains_key(&key) {
                return false;
            }
            reg.seq += 1;
            let id = reg.seq;
            let cancel = CancellationToken::new();
            reg.tasks.insert(
                key.clone(),
                TypingTask {
                    id,
                    cancel: cancel.clone(),
                },
            );
            (id, cancel)
        };

        self.live.fetch_add(1, Ordering::SeqCst);
        let heartbeat = Heartbeat {
            key,
            id,
            chat_id: chat_id.to_string(),
            session: Arc::clone(&self.session),
            cfg: self.cfg,
            registry: Arc::clone(&self.registry),
            live: Arc::clone(&self.live),
        };
        tokio::spawn(heartbeat.run(cancel));
        true
    }

    /// Stop the indicator for `request_id`. Returns whether one was registered.
    pub fn stop(&self, request_id: &str) -> bool {
        let Some(key) = self.key(request_id) else {
            return false;
        };

        let task = lock(&self.registry).tasks.remove(&key);
        match task {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop every indicator and refuse new ones until [`reopen`](Self::reopen).
    /// Returns how many were cancelled.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<TypingTask> = {
            let mut reg = lock(&self.registry);
            reg.closed = true;
            reg.tasks.drain().map(|(_, task)| task).collect()
        };

        let count = drained.len();
        for task in drained {
            task.cancel.cancel();
        }
        count
    }

    /// Accept new indicators again after [`stop_all`](Self::stop_all).
    pub fn reopen(&self) {
        lock(&self.registry).closed = false;
    }

    pub fn is_active(&self, request_id: &str) -> bool {
        self.key(request_id)
            .is_some_and(|key| lock(&self.registry).tasks.contains_key(&key))
    }

    /// Number of registered indicators.
    pub fn active_count(&self) -> usize {
        lock(&self.registry).tasks.len()
    }

    /// Number of heartbeat tasks that have not exited yet.
    pub fn live_loops(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for TypingScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    TimedOut,
    Closed,
}

struct Heartbeat {
    key: String,
    id: u64,
    chat_id: String,
    session: Arc<dyn PlatformSession>,
    cfg: TypingConfig,
    registry: Arc<Mutex<Registry>>,
    live: Arc<AtomicUsize>,
}

impl Heartbeat {
    async fn run(self, cancel: CancellationToken) {
        let reason = tokio::select! {
            biased;
            _ = cancel.cancelled() => StopReason::Cancelled,
            _ = sleep(self.cfg.max_duration) => StopReason::TimedOut,
            reason = self.beat() => reason,
        };

        if reason == StopReason::TimedOut {
            debug!(session_key = %self.key, "typing indicator auto-stopped on timeout");
        }
        self.deregister();
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    /// Signal now, then on every interval, until the session reports it is closed.
    async fn beat(&self) -> StopReason {
        let mut ticker = interval(self.cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.session.send_typing(&self.chat_id).await {
                Ok(()) => {}
                Err(Error::Closed) => return StopReason::Closed,
                Err(e) => {
                    debug!(chat_id = %self.chat_id, error = %e, "failed to send typing indicator");
                }
            }
        }
    }

    // A newer indicator may have been registered under the same key after this
    // one was stopped; only remove the entry if it is still ours.
    fn deregister(&self) {
        let mut reg = lock(&self.registry);
        if reg.tasks.get(&self.key).is_some_and(|t| t.id == self.id) {
            reg.tasks.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{settle, FakeSession, TypingMode};

    fn scheduler(session: &Arc<FakeSession>) -> TypingScheduler {
        TypingScheduler::new(
            "telegram",
            session.clone() as Arc<dyn PlatformSession>,
            TypingConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_per_request() {
        let session = Arc::new(FakeSession::default());
        let typing = scheduler(&session);

        assert!(typing.start("r1", "chat"));
        assert!(!typing.start("r1", "chat"));
        settle().await;

        assert_eq!(typing.active_count(), 1);
        assert_eq!(typing.live_loops(), 1);
        assert_eq!(session.typing_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_request_id_is_ignored() {
        let session = Arc::new(FakeSession::default());
        let typing = scheduler(&session);

        assert!(!typing.start("", "chat"));
        assert!(!typing.stop(""));
        settle().await;
        assert_eq!(typing.live_loops(), 0);
        assert_eq!(session.typing_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn signals_immediately_then_on_interval() {
        let session = Arc::new(FakeSession::default());
        let typing = scheduler(&session);

        typing.start("r1", "chat");
        settle().await;
        assert_eq!(session.typing_count(), 1);

        tokio::time::advance(Duration::from_secs(8)).await;
        settle().await;
        assert_eq!(session.typing_count(), 2);

        for _ in 0..2 {
            tokio::time::advance(Duration::from_secs(8)).await;
            settle().await;
        }
        assert_eq!(session.typing_count(), 4);
        assert_eq!(session.typing_chats(), vec!["chat"; 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_loop() {
        let session = Arc::new(FakeSession::default());
        let typing = scheduler(&session);

        typing.start("r1", "chat");
        settle().await;
        assert!(typing.stop("r1"));
        assert!(!typing.stop("r1"));
        settle().await;

        assert!(!typing.is_active("r1"));
        assert_eq!(typing.live_loops(), 0);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(8)).await;
            settle().await;
        }
        assert_eq!(session.typing_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_in_one_chat_are_independent() {
        let session = Arc::new(FakeSession::default());
        let typing = scheduler(&session);

        typing.start("r1", "chat");
        typing.start("r2", "chat");
        settle().await;
        assert_eq!(typing.live_loops(), 2);

        typing.stop("r1");
        settle().await;
        assert!(typing.is_active("r2"));
        assert_eq!(typing.live_loops(), 1);

        tokio::time::advance(Duration::from_secs(8)).await;
        settle().await;
        assert_eq!(session.typing_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn max_duration_removes_the_indicator() {
        let session = Arc::new(FakeSession::default());
        let typing = scheduler(&session);

        typing.start("r1", "chat");
        settle().await;

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        settle().await;

        assert!(!typing.is_active("r1"));
        assert_eq!(typing.live_loops(), 0);
        // The request can be tracked again afterwards.
        assert!(typing.start("r1", "chat"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_loop_keeps_restarted_entry() {
        let session = Arc::new(FakeSession::default());
        let typing = scheduler(&session);

        typing.start("r1", "chat");
        settle().await;

        // Stop and restart before the first loop has observed its cancellation.
        assert!(typing.stop("r1"));
        assert!(typing.start("r1", "chat"));
        settle().await;

        assert!(typing.is_active("r1"));
        assert_eq!(typing.active_count(), 1);
        assert_eq!(typing.live_loops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_drains_every_indicator() {
        let session = Arc::new(FakeSession::default());
        let typing = scheduler(&session);

        for i in 0..5 {
            typing.start(&format!("r{i}"), "chat");
        }
        settle().await;
        assert_eq!(typing.live_loops(), 5);

        assert_eq!(typing.stop_all(), 5);
        assert_eq!(typing.stop_all(), 0);
        settle().await;

        assert_eq!(typing.active_count(), 0);
        assert_eq!(typing.live_loops(), 0);

        let before = session.typing_count();
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(session.typing_count(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_refused_after_stop_all_until_reopened() {
        let session = Arc::new(FakeSession::default());
        let typing = scheduler(&session);
        typing.stop_all();

        assert!(!typing.start("late", "chat"));
        settle().await;
        assert_eq!(typing.active_count(), 0);
        assert_eq!(typing.live_loops(), 0);
        assert_eq!(session.typing_count(), 0);

        typing.reopen();
        assert!(typing.start("late", "chat"));
        settle().await;
        assert_eq!(typing.live_loops(), 1);
        typing.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn send_errors_do_not_stop_the_loop() {
        let session = Arc::new(FakeSession::default());
        session.set_typing_mode(TypingMode::Fail);
        let typing = scheduler(&session);

        typing.start("r1", "chat");
        settle().await;
        tokio::time::advance(Duration::from_secs(8)).await;
        settle().await;

        assert!(typing.is_active("r1"));
        assert_eq!(session.typing_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_session_ends_the_loop() {
        let session = Arc::new(FakeSession::default());
        session.set_typing_mode(TypingMode::Closed);
        let typing = scheduler(&session);

        typing.start("r1", "chat");
        settle().await;

        assert!(!typing.is_active("r1"));
        assert_eq!(typing.live_loops(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_stops_and_timeout_remove_once() {
        let session = Arc::new(FakeSession::default());
        let typing = Arc::new(TypingScheduler::new(
            "telegram",
            session.clone() as Arc<dyn PlatformSession>,
            TypingConfig {
                interval: Duration::from_millis(5),
                max_duration: Duration::from_millis(20),
            },
        ));

        for round in 0..20 {
            let request_id = format!("r{round}");
            assert!(typing.start(&request_id, "chat"));
            tokio::time::sleep(Duration::from_millis(19)).await;

            let mut handles = Vec::new();
            for _ in 0..8 {
                let typing = typing.clone();
                let request_id = request_id.clone();
                handles.push(tokio::spawn(async move { typing.stop(&request_id) }));
            }
            let mut removed = 0;
            for h in handles {
                if h.await.unwrap() {
                    removed += 1;
                }
            }
            assert!(removed <= 1, "entry removed {removed} times");
        }

        for _ in 0..100 {
            if typing.live_loops() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(typing.active_count(), 0);
        assert_eq!(typing.live_loops(), 0);
    }
}
