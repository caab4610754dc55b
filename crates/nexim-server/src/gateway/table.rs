//! Process-wide session table: `user_id → platform → SessionHandle`.
//!
//! Callers get snapshots (handle clones), never a live guard. Registering a
//! second session on the same (user, platform) evicts the first with a
//! "kicked" close.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use nexim_shared::platform::Platform;

use super::session::{CloseReason, EnqueueOutcome, SessionHandle};
use crate::delivery::Pusher;

#[derive(Debug, Clone)]
pub struct PushResult {
    pub conn_id: String,
    pub platform: Platform,
    pub outcome: EnqueueOutcome,
}

type CloseHook = Box<dyn Fn(&SessionHandle) + Send + Sync>;

pub struct SessionTable {
    sessions: RwLock<HashMap<String, HashMap<i32, SessionHandle>>>,
    evict_threshold: u32,
    close_hooks: std::sync::Mutex<Vec<CloseHook>>,
}

impl SessionTable {
    pub fn new(evict_threshold: u32) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            evict_threshold: evict_threshold.max(1),
            close_hooks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register a hook to run once per session after it reaches Closed.
    pub fn on_close(&self, hook: impl Fn(&SessionHandle) + Send + Sync + 'static) {
        self.close_hooks.lock().unwrap().push(Box::new(hook));
    }

    pub(crate) fn run_close_hooks(&self, session: &SessionHandle) {
        for hook in self.close_hooks.lock().unwrap().iter() {
            hook(session);
        }
    }

    /// Insert a session, returning the one it superseded, if any. The
    /// evicted session has already been moved to Closing on return.
    pub async fn register(&self, handle: SessionHandle) -> Option<SessionHandle> {
        let evicted = {
            let mut sessions = self.sessions.write().await;
            sessions
                .entry(handle.user_id.clone())
                .or_default()
                .insert(handle.platform.id(), handle.clone())
        };

        if let Some(ref old) = evicted {
            info!(
                user_id = %old.user_id,
                platform = %old.platform.name(),
                conn_id = %old.conn_id,
                "evicting superseded session"
            );
            old.begin_close(CloseReason::Kicked);
        }
        evicted
    }

    /// Remove the session, but only while it still owns its table slot; a
    /// successor registered on the same (user, platform) stays.
    pub async fn remove(&self, user_id: &str, platform: Platform, conn_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(platforms) = sessions.get_mut(user_id) else {
            return false;
        };
        let matches = platforms
            .get(&platform.id())
            .map(|s| s.conn_id == conn_id)
            .unwrap_or(false);
        if matches {
            platforms.remove(&platform.id());
            if platforms.is_empty() {
                sessions.remove(user_id);
            }
        }
        matches
    }

    /// Snapshot of the user's live sessions; no lock held by the caller.
    pub async fn route(&self, user_id: &str) -> Vec<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions
            .get(user_id)
            .map(|platforms| platforms.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Enqueue a frame on every session of the user. A full channel counts
    /// a strike; past the threshold the session is moved to Closing.
    pub async fn push(&self, user_id: &str, frame: &str) -> Vec<PushResult> {
        let targets = self.route(user_id).await;
        let mut results = Vec::with_capacity(targets.len());

        for session in targets {
            let outcome = session.enqueue(frame.to_string());
            if outcome == EnqueueOutcome::Backpressure {
                let strikes = session.note_backpressure();
                if strikes >= self.evict_threshold {
                    warn!(
                        user_id = %session.user_id,
                        platform = %session.platform.name(),
                        conn_id = %session.conn_id,
                        strikes,
                        "evicting slow consumer"
                    );
                    session.begin_close(CloseReason::SlowConsumer);
                }
            }
            results.push(PushResult {
                conn_id: session.conn_id.clone(),
                platform: session.platform,
                outcome,
            });
        }
        results
    }

    /// Begin closing the user's sessions; all platforms when none is given.
    pub async fn kick(&self, user_id: &str, platform: Option<Platform>, reason: CloseReason) -> usize {
        let targets = self.route(user_id).await;
        let mut kicked = 0;
        for session in targets {
            if platform.map(|p| p == session.platform).unwrap_or(true) && session.begin_close(reason)
            {
                kicked += 1;
            }
        }
        kicked
    }

    pub async fn online_platforms(&self, user_id: &str) -> Vec<i32> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<i32> = sessions
            .get(user_id)
            .map(|platforms| platforms.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.values().map(|platforms| platforms.len()).sum()
    }

    pub async fn close_all(&self, reason: CloseReason) {
        let sessions = self.sessions.read().await;
        for platforms in sessions.values() {
            for session in platforms.values() {
                session.begin_close(reason);
            }
        }
    }
}

/// Fire-and-forget push capability handed to the delivery pipeline. Failures
/// are logged by the table; nothing propagates to the sender.
pub struct GatewayPusher {
    table: Arc<SessionTable>,
}

impl GatewayPusher {
    pub fn new(table: Arc<SessionTable>) -> Self {
        Self { table }
    }
}

impl Pusher for GatewayPusher {
    fn push(&self, user_id: &str, frame: String) {
        let table = self.table.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            for result in table.push(&user_id, &frame).await {
                if result.outcome != EnqueueOutcome::Ok {
                    debug!(
                        user_id = %user_id,
                        conn_id = %result.conn_id,
                        outcome = ?result.outcome,
                        "push not delivered"
                    );
                }
            }
        });
    }
}
