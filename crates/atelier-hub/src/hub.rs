use atelier_core::{AgentLog, Decision, Task};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Outbound queue depth per subscriber. A subscriber that falls this far
/// behind is dropped rather than slowing the cycle.
const SUBSCRIBER_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskUpdate,
    AgentLog,
    Decision,
    Metrics,
}

/// The frame every subscriber receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubMessage {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub project_id: Uuid,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl HubMessage {
    pub fn new(kind: EventKind, project_id: Uuid, data: serde_json::Value) -> Self {
        Self {
            kind,
            project_id,
            data,
            timestamp: Utc::now(),
        }
    }
}

struct Subscriber {
    project_id: Uuid,
    #[allow(dead_code)]
    user_id: Uuid,
    tx: mpsc::Sender<String>,
}

/// In-process fan-out of cycle events to realtime subscribers.
///
/// Delivery is project-scoped. Writes to the map are rare (subscribe and
/// unsubscribe), broadcasts are frequent, so the map sits behind an RwLock.
/// Backpressure is drop-slowest: a full queue unsubscribes its owner and the
/// closed channel ends that client's write loop.
pub struct Hub {
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
        })
    }

    /// Register a subscriber for one project. Returns its id and the message
    /// stream to forward to the client.
    pub async fn subscribe(&self, project_id: Uuid, user_id: Uuid) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = Uuid::new_v4();
        self.subscribers.write().await.insert(
            id,
            Subscriber {
                project_id,
                user_id,
                tx,
            },
        );
        info!(subscriber_id = %id, project_id = %project_id, "hub subscriber added");
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        if self.subscribers.write().await.remove(&id).is_some() {
            info!(subscriber_id = %id, "hub subscriber removed");
        }
    }

    pub async fn subscriber_count(&self, project_id: Uuid) -> usize {
        self.subscribers
            .read()
            .await
            .values()
            .filter(|s| s.project_id == project_id)
            .count()
    }

    /// Deliver to every subscriber of the message's project. Subscribers
    /// whose queue is full (or gone) are dropped.
    pub async fn broadcast(&self, message: HubMessage) {
        let payload = match serde_json::to_string(&message) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode hub message");
                return;
            }
        };

        let mut stale = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for (id, sub) in subscribers.iter() {
                if sub.project_id != message.project_id {
                    continue;
                }
                if sub.tx.try_send(payload.clone()).is_err() {
                    stale.push(*id);
                }
            }
        }

        if !stale.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in stale {
                subscribers.remove(&id);
                warn!(subscriber_id = %id, "hub subscriber dropped (queue full or closed)");
            }
        }
    }

    /// Direct send to one subscriber (application-level pong). Same
    /// drop-on-full discipline as broadcast.
    pub async fn send_to(&self, id: Uuid, payload: String) {
        let full = {
            let subscribers = self.subscribers.read().await;
            match subscribers.get(&id) {
                Some(sub) => sub.tx.try_send(payload).is_err(),
                None => false,
            }
        };
        if full {
            self.unsubscribe(id).await;
        }
    }

    // -- typed helpers used by the orchestrator --

    pub async fn task_update(&self, task: &Task) {
        let data = serde_json::to_value(task).unwrap_or_default();
        self.broadcast(HubMessage::new(EventKind::TaskUpdate, task.project_id, data))
            .await;
    }

    pub async fn agent_log(&self, log: &AgentLog) {
        let data = serde_json::to_value(log).unwrap_or_default();
        self.broadcast(HubMessage::new(EventKind::AgentLog, log.project_id, data))
            .await;
    }

    pub async fn decision(&self, decision: &Decision) {
        let data = serde_json::to_value(decision).unwrap_or_default();
        self.broadcast(HubMessage::new(
            EventKind::Decision,
            decision.project_id,
            data,
        ))
        .await;
    }

    pub async fn metrics(&self, project_id: Uuid, data: serde_json::Value) {
        self.broadcast(HubMessage::new(EventKind::Metrics, project_id, data))
            .await;
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }
}
