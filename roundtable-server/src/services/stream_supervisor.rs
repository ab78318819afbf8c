use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::{Duration, Instant},
};

use metrics::{counter, gauge, histogram};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a recording session stopped producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStopReason {
    None,
    Cancelled,
    TimedOut,
    Completed,
}

impl StreamStopReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::Completed => "completed",
        }
    }
}

const STATE_ACTIVE: u8 = 0;
const STATE_CANCELLED: u8 = 1;
const STATE_TIMEOUT: u8 = 2;
const STATE_COMPLETED: u8 = 3;

/// One producer writing into a stream buffer.
#[derive(Debug)]
pub struct RecordingSession {
    stream_id: String,
    token: CancellationToken,
    state: AtomicU8,
    started_at: Instant,
}

impl RecordingSession {
    fn new(stream_id: String, max_duration: Option<Duration>) -> Arc<Self> {
        let session = Arc::new(Self {
            stream_id,
            token: CancellationToken::new(),
            state: AtomicU8::new(STATE_ACTIVE),
            started_at: Instant::now(),
        });

        if let Some(duration) = max_duration.filter(|d| !d.is_zero()) {
            let weak = Arc::downgrade(&session);
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                if let Some(session) = weak.upgrade() {
                    session.mark_timeout();
                }
            });
        }

        session
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(STATE_ACTIVE, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn mark_cancelled(&self) -> bool {
        if !self.transition(STATE_CANCELLED) {
            return false;
        }
        self.token.cancel();
        counter!("roundtable_recording_cancels_total").increment(1);
        let elapsed_ms = self.started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!("roundtable_recording_cancel_latency_ms").record(elapsed_ms);
        true
    }

    pub fn mark_timeout(&self) -> bool {
        if !self.transition(STATE_TIMEOUT) {
            return false;
        }
        self.token.cancel();
        counter!("roundtable_recording_timeouts_total").increment(1);
        debug!(stream_id = %self.stream_id, "recording session timed out");
        true
    }

    /// Settles the session and wakes anything waiting on its token.
    pub fn mark_completed(&self) {
        if self.transition(STATE_COMPLETED) {
            self.token.cancel();
        }
    }

    pub fn stop_reason(&self) -> StreamStopReason {
        match self.state.load(Ordering::SeqCst) {
            STATE_CANCELLED => StreamStopReason::Cancelled,
            STATE_TIMEOUT => StreamStopReason::TimedOut,
            STATE_COMPLETED => StreamStopReason::Completed,
            _ => StreamStopReason::None,
        }
    }
}

/// Tracks in-process recording sessions by stream id so they can be cancelled.
#[derive(Debug)]
pub struct StreamSupervisor {
    sessions: RwLock<HashMap<String, Arc<RecordingSession>>>,
    max_duration: Option<Duration>,
}

impl StreamSupervisor {
    pub fn new(max_duration: Option<Duration>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_duration,
        }
    }

    /// Creates and registers a session. A previous session for the same stream is cancelled.
    pub async fn begin(&self, stream_id: &str) -> Arc<RecordingSession> {
        let session = RecordingSession::new(stream_id.to_string(), self.max_duration);
        let previous = {
            let mut guard = self.sessions.write().await;
            let previous = guard.insert(stream_id.to_string(), Arc::clone(&session));
            gauge!("roundtable_recording_sessions_active").set(guard.len() as f64);
            previous
        };
        if let Some(previous) = previous {
            previous.mark_cancelled();
            debug!(stream_id, "replaced existing recording session");
        }
        session
    }

    pub async fn finish(&self, stream_id: &str) {
        let mut guard = self.sessions.write().await;
        if let Some(session) = guard.remove(stream_id) {
            session.mark_completed();
        }
        gauge!("roundtable_recording_sessions_active").set(guard.len() as f64);
    }

    /// Removes `session` only while it is still the one registered for its stream.
    pub async fn release(&self, session: &Arc<RecordingSession>) {
        let mut guard = self.sessions.write().await;
        if guard
            .get(session.stream_id())
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            guard.remove(session.stream_id());
        }
        session.mark_completed();
        gauge!("roundtable_recording_sessions_active").set(guard.len() as f64);
    }

    pub async fn is_current(&self, session: &Arc<RecordingSession>) -> bool {
        self.sessions
            .read()
            .await
            .get(session.stream_id())
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }

    pub async fn is_recording(&self, stream_id: &str) -> bool {
        self.sessions.read().await.contains_key(stream_id)
    }

    pub async fn cancel(&self, stream_id: &str) -> StreamStopReason {
        let session = {
            let guard = self.sessions.read().await;
            guard.get(stream_id).cloned()
        };

        session.map_or(StreamStopReason::None, |session| {
            if session.mark_cancelled() {
                StreamStopReason::Cancelled
            } else {
                session.stop_reason()
            }
        })
    }

    /// Cancels every session, used on shutdown.
    pub async fn cancel_all(&self) -> usize {
        let guard = self.sessions.read().await;
        guard
            .values()
            .filter(|session| session.mark_cancelled())
            .count()
    }
}

pub type SharedStreamSupervisor = Arc<StreamSupervisor>;
