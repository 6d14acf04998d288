//! Cluster lifecycle and failover events

use crate::node::Endpoint;
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Faults surfaced as [`ClusterEvent::Errored`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Fault {
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("no node holds the primary role")]
    Degraded,

    #[error("could not reattach {node}: {reason}")]
    ReplicaReattach { node: String, reason: String },
}

/// Event published on the cluster's broadcast bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClusterEvent {
    /// Bootstrap finished
    Initialized,
    /// Bootstrap finished and the failure monitor is running
    Started,
    Errored { fault: Fault },
    NodeDown { label: String },
    NodeRecovered { label: String },
    PrimaryElected { label: String, endpoint: Endpoint },
}

/// Broadcast bus for [`ClusterEvent`]s.
///
/// Publishing never fails: events sent while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClusterEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ClusterEvent) {
        tracing::debug!(?event, "cluster event");
        let _ = self.tx.send(event);
    }

    pub fn fault(&self, fault: Fault) {
        self.emit(ClusterEvent::Errored { fault });
    }
}
