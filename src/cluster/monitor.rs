//! Failure monitor: reacts to node events once bootstrap is done

use crate::cluster::election::elect;
use crate::cluster::events::{ClusterEvent, EventBus, Fault};
use crate::cluster::registry::ClusterRegistry;
use crate::node::{Connectivity, NodeEvent, NodeHandle, Role};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Drains the node-event channel one event at a time.
///
/// An election triggered by an event completes before the next event is
/// looked at, so node state only ever has one writer.
pub struct FailureMonitor {
    registry: Arc<ClusterRegistry>,
    record_key: String,
    events: EventBus,
}

impl FailureMonitor {
    pub fn new(registry: Arc<ClusterRegistry>, record_key: impl Into<String>, events: EventBus) -> Self {
        Self {
            registry,
            record_key: record_key.into(),
            events,
        }
    }

    pub async fn run(self, mut node_events: mpsc::Receiver<NodeEvent>) {
        while let Some(event) = node_events.recv().await {
            self.handle(event).await;
        }
        tracing::debug!("node event channel closed, failure monitor stopped");
    }

    pub async fn handle(&self, event: NodeEvent) {
        let Some(node) = self.registry.node(event.index()).cloned() else {
            return;
        };
        match event {
            NodeEvent::Ready { .. } => self.on_ready(&node).await,
            NodeEvent::Error { cause, .. } => self.on_error(&node, &cause).await,
        }
    }

    async fn on_error(&self, node: &NodeHandle, cause: &str) {
        // same outage, already accounted for
        if node.is_recovering() {
            tracing::trace!("{} still down: {}", node.label(), cause);
            return;
        }

        let was_primary = node.is_primary();
        node.set_connectivity(Connectivity::Recovering);
        tracing::warn!("{} ({}) is down: {}", node.label(), node.endpoint(), cause);
        self.events.emit(ClusterEvent::NodeDown {
            label: node.label().to_string(),
        });

        if was_primary {
            node.set_role(Role::Unknown);
            tracing::warn!("primary {} lost, electing a new one", node.label());
            elect(&self.registry, &self.record_key, &self.events).await;
        }
    }

    async fn on_ready(&self, node: &NodeHandle) {
        if node.is_online() {
            return;
        }

        self.registry.mark_ready(node);
        tracing::info!("{} ({}) is back", node.label(), node.endpoint());
        self.events.emit(ClusterEvent::NodeRecovered {
            label: node.label().to_string(),
        });

        let Some(primary) = self.registry.current_primary() else {
            tracing::info!("no primary while {} recovered, running election", node.label());
            elect(&self.registry, &self.record_key, &self.events).await;
            return;
        };
        if primary.index() == node.index() {
            return;
        }

        match node.follow(primary.endpoint()).await {
            Ok(()) => {
                node.set_role(Role::Replica);
                tracing::info!("{} now replicates {}", node.label(), primary.label());
            }
            Err(e) => {
                tracing::warn!("could not reattach {} to {}: {}", node.label(), primary.label(), e);
                self.events.fault(Fault::ReplicaReattach {
                    node: node.label().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}
