//! Per-connection session state.
//!
//! Each session owns one bounded write channel. A dedicated writer task is
//! the only code that touches the socket's write side; everything else
//! enqueues through [`SessionHandle::enqueue`], which never blocks.
//! Lifecycle: Handshaking → Active → Closing → Closed, driven by atomic
//! compare-and-swap so close is idempotent.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use nexim_shared::platform::Platform;

use crate::store::now_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Handshaking = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Handshaking,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Kicked,
    SlowConsumer,
    ReadError,
    PongTimeout,
    ClientClose,
    ServerShutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kicked => "kicked",
            Self::SlowConsumer => "slow consumer",
            Self::ReadError => "read error",
            Self::PongTimeout => "pong timeout",
            Self::ClientClose => "client close",
            Self::ServerShutdown => "server shutdown",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Kicked => 0,
            Self::SlowConsumer => 1,
            Self::ReadError => 2,
            Self::PongTimeout => 3,
            Self::ClientClose => 4,
            Self::ServerShutdown => 5,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Kicked),
            1 => Some(Self::SlowConsumer),
            2 => Some(Self::ReadError),
            3 => Some(Self::PongTimeout),
            4 => Some(Self::ClientClose),
            5 => Some(Self::ServerShutdown),
            _ => None,
        }
    }
}

const NO_REASON: u8 = u8::MAX;

#[derive(Debug, Clone)]
pub enum OutFrame {
    Text(String),
    Close(CloseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Ok,
    Backpressure,
    Closed,
}

/// Cloneable view of one live connection, stored in the session table.
#[derive(Clone)]
pub struct SessionHandle {
    pub user_id: String,
    pub platform: Platform,
    pub conn_id: String,
    pub connected_at: i64,
    tx: mpsc::Sender<OutFrame>,
    state: Arc<AtomicU8>,
    close_reason: Arc<AtomicU8>,
    backpressure_strikes: Arc<AtomicU32>,
    closing: Arc<Notify>,
}

impl SessionHandle {
    pub fn new(
        user_id: impl Into<String>,
        platform: Platform,
        conn_id: impl Into<String>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<OutFrame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = Self {
            user_id: user_id.into(),
            platform,
            conn_id: conn_id.into(),
            connected_at: now_millis(),
            tx,
            state: Arc::new(AtomicU8::new(SessionState::Handshaking as u8)),
            close_reason: Arc::new(AtomicU8::new(NO_REASON)),
            backpressure_strikes: Arc::new(AtomicU32::new(0)),
            closing: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Handshaking → Active, once.
    pub fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Handshaking as u8,
                SessionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Non-blocking enqueue onto the write channel.
    pub fn enqueue(&self, text: String) -> EnqueueOutcome {
        if self.state() >= SessionState::Closing {
            return EnqueueOutcome::Closed;
        }
        match self.tx.try_send(OutFrame::Text(text)) {
            Ok(()) => {
                self.backpressure_strikes.store(0, Ordering::Release);
                EnqueueOutcome::Ok
            }
            Err(mpsc::error::TrySendError::Full(_)) => EnqueueOutcome::Backpressure,
            Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }

    /// Count a consecutive channel-full enqueue; returns the running count.
    pub fn note_backpressure(&self) -> u32 {
        self.backpressure_strikes.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Move to Closing, once. The writer drains to the close frame; the
    /// reader observes the notify and stops.
    pub fn begin_close(&self, reason: CloseReason) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= SessionState::Closing as u8 {
                return false;
            }
            match self.state.compare_exchange(
                current,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.close_reason.store(reason.to_u8(), Ordering::Release);
        // When the channel is full the writer notices the state flip while
        // draining; the notify covers an idle writer and the reader.
        let _ = self.tx.try_send(OutFrame::Close(reason));
        self.closing.notify_waiters();
        self.closing.notify_one();
        true
    }

    /// Closing (or any earlier state) → Closed; true only the first time.
    pub fn mark_closed(&self) -> bool {
        self.state.swap(SessionState::Closed as u8, Ordering::AcqRel)
            != SessionState::Closed as u8
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        CloseReason::from_u8(self.close_reason.load(Ordering::Acquire))
    }

    /// Resolves once the session has entered Closing.
    pub async fn wait_closing(&self) {
        if self.state() >= SessionState::Closing {
            return;
        }
        self.closing.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions_once() {
        let (handle, mut rx) = SessionHandle::new("u___1", Platform::Web, "c1", 4);
        assert_eq!(handle.state(), SessionState::Handshaking);

        assert!(handle.activate());
        assert!(!handle.activate());
        assert_eq!(handle.state(), SessionState::Active);

        assert!(handle.begin_close(CloseReason::Kicked));
        assert!(!handle.begin_close(CloseReason::ReadError));
        assert_eq!(handle.state(), SessionState::Closing);
        assert_eq!(handle.close_reason(), Some(CloseReason::Kicked));

        // The close frame is queued for the writer.
        match rx.try_recv() {
            Ok(OutFrame::Close(CloseReason::Kicked)) => {}
            other => panic!("expected close frame, got {other:?}"),
        }

        assert!(handle.mark_closed());
        assert!(!handle.mark_closed());
    }

    #[test]
    fn enqueue_reports_backpressure_when_full() {
        let (handle, _rx) = SessionHandle::new("u___1", Platform::Web, "c1", 2);
        handle.activate();

        assert_eq!(handle.enqueue("a".into()), EnqueueOutcome::Ok);
        assert_eq!(handle.enqueue("b".into()), EnqueueOutcome::Ok);
        assert_eq!(handle.enqueue("c".into()), EnqueueOutcome::Backpressure);
        assert_eq!(handle.note_backpressure(), 1);
        assert_eq!(handle.note_backpressure(), 2);
    }

    #[test]
    fn enqueue_after_close_reports_closed() {
        let (handle, _rx) = SessionHandle::new("u___1", Platform::Web, "c1", 2);
        handle.activate();
        handle.begin_close(CloseReason::ClientClose);
        assert_eq!(handle.enqueue("a".into()), EnqueueOutcome::Closed);
    }

    #[test]
    fn successful_enqueue_resets_strikes() {
        let (handle, mut rx) = SessionHandle::new("u___1", Platform::Web, "c1", 1);
        handle.activate();

        assert_eq!(handle.enqueue("a".into()), EnqueueOutcome::Ok);
        assert_eq!(handle.enqueue("b".into()), EnqueueOutcome::Backpressure);
        assert_eq!(handle.note_backpressure(), 1);

        // Drain and retry: the strike counter starts over.
        let _ = rx.try_recv();
        assert_eq!(handle.enqueue("c".into()), EnqueueOutcome::Ok);
        assert_eq!(handle.note_backpressure(), 1);
    }

    #[tokio::test]
    async fn wait_closing_resolves_after_begin_close() {
        let (handle, _rx) = SessionHandle::new("u___1", Platform::Web, "c1", 2);
        handle.activate();

        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.wait_closing().await });
        handle.begin_close(CloseReason::ServerShutdown);
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("wait_closing did not resolve")
            .unwrap();
    }
}
