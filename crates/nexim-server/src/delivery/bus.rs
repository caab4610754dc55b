//! Cross-node delivery notifications.
//!
//! The pipeline publishes one notice per recipient; every gateway node
//! subscribes and delivers to the sessions it holds locally. Notices carry
//! the origin node id so the publishing node, which already pushed through
//! its own table, drops its echo. The broadcast channel is the in-process
//! build of the shared pub/sub channel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::Pusher;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushNotice {
    pub origin_node: String,
    pub recv_id: String,
    pub frame: String,
}

pub struct DeliveryBus {
    node_id: String,
    tx: broadcast::Sender<PushNotice>,
}

impl DeliveryBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            node_id: Uuid::new_v4().simple().to_string(),
            tx,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn publish(&self, recv_id: &str, frame: &str) {
        // No subscribers is fine; single-node deployments deliver locally.
        let _ = self.tx.send(PushNotice {
            origin_node: self.node_id.clone(),
            recv_id: recv_id.to_string(),
            frame: frame.to_string(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushNotice> {
        self.tx.subscribe()
    }
}

impl Default for DeliveryBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Deliver remote notices through the local session table.
pub fn spawn_subscriber(bus: Arc<DeliveryBus>, pusher: Arc<dyn Pusher>) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notice) => {
                    if notice.origin_node == bus.node_id() {
                        continue;
                    }
                    pusher.push(&notice.recv_id, notice.frame);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "delivery bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
