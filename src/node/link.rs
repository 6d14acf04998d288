//! Per-node link task: connect, report readiness, health-check, reconnect

use crate::common::with_deadline;
use crate::node::{Connector, NodeClient, NodeHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Connection-level health signal for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A connection was established and answered PING
    Ready { index: usize },
    /// A connection attempt failed or an established connection broke
    Error { index: usize, cause: String },
}

impl NodeEvent {
    pub fn index(&self) -> usize {
        match self {
            NodeEvent::Ready { index } | NodeEvent::Error { index, .. } => *index,
        }
    }
}

/// Keeps one node connected for the lifetime of the cluster.
///
/// Every failed attempt is reported, so a node that stays down produces a
/// stream of `Error` events until it comes back; the coordinator is
/// responsible for treating them as a single episode.
pub struct NodeLink {
    node: Arc<NodeHandle>,
    connector: Arc<dyn Connector>,
    events: mpsc::Sender<NodeEvent>,
    health_check_interval: Duration,
}

impl NodeLink {
    pub fn new(
        node: Arc<NodeHandle>,
        connector: Arc<dyn Connector>,
        events: mpsc::Sender<NodeEvent>,
        health_check_interval: Duration,
    ) -> Self {
        Self {
            node,
            connector,
            events,
            health_check_interval,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Runs until the event receiver is dropped
    async fn run(self) {
        let index = self.node.index();

        loop {
            debug!("connecting to {} ({}) ...", self.node.label(), self.node.endpoint());
            let connected = with_deadline(
                self.node.command_timeout(),
                "connect",
                self.connector.connect(self.node.endpoint()),
            )
            .await;

            let cause = match connected {
                Ok(client) => {
                    self.node.attach_client(client.clone());
                    if !self.emit(NodeEvent::Ready { index }).await {
                        return;
                    }
                    let cause = match self.watch(client.as_ref()).await {
                        Some(cause) => cause,
                        None => return,
                    };
                    self.node.detach_client();
                    cause
                }
                Err(e) => e.to_string(),
            };

            trace!(node = %self.node.label(), %cause, "link error");
            if !self.emit(NodeEvent::Error { index, cause }).await {
                return;
            }

            tokio::time::sleep(self.node.retry_interval()).await;
        }
    }

    /// Pings until the connection breaks. Returns the failure cause, or
    /// `None` once nobody listens for events anymore.
    async fn watch(&self, client: &dyn NodeClient) -> Option<String> {
        loop {
            tokio::time::sleep(self.health_check_interval).await;
            if self.events.is_closed() {
                return None;
            }
            if let Err(e) = with_deadline(self.node.command_timeout(), "PING", client.ping()).await
            {
                return Some(e.to_string());
            }
        }
    }

    async fn emit(&self, event: NodeEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NodeConfig;
    use crate::node::{Endpoint, MemoryWorld};

    fn link_for(world: &Arc<MemoryWorld>) -> (Arc<NodeHandle>, mpsc::Receiver<NodeEvent>, JoinHandle<()>) {
        let config = NodeConfig::new("127.0.0.1", 6379).with_retry_interval(Duration::from_millis(10));
        let node = Arc::new(NodeHandle::new(0, &config, Duration::from_millis(200)));
        let (tx, rx) = mpsc::channel(64);
        let handle = NodeLink::new(node.clone(), world.connector(), tx, Duration::from_millis(10)).spawn();
        (node, rx, handle)
    }

    #[tokio::test]
    async fn test_ready_then_error_on_kill() {
        let endpoint = Endpoint::new("127.0.0.1", 6379);
        let world = MemoryWorld::with_nodes([endpoint.clone()]);
        let (node, mut rx, handle) = link_for(&world);

        assert_eq!(rx.recv().await, Some(NodeEvent::Ready { index: 0 }));
        assert!(node.is_connected());

        world.kill(&endpoint);
        match rx.recv().await {
            Some(NodeEvent::Error { index, .. }) => assert_eq!(index, 0),
            other => panic!("expected error event, got {:?}", other),
        }
        assert!(!node.is_connected());

        world.revive(&endpoint);
        loop {
            match rx.recv().await {
                Some(NodeEvent::Ready { .. }) => break,
                Some(NodeEvent::Error { .. }) => continue,
                None => panic!("link stopped"),
            }
        }
        assert!(node.is_connected());
        handle.abort();
    }

    #[tokio::test]
    async fn test_unreachable_node_keeps_reporting() {
        let world = MemoryWorld::new();
        let (_node, mut rx, handle) = link_for(&world);

        for _ in 0..3 {
            assert!(matches!(rx.recv().await, Some(NodeEvent::Error { .. })));
        }
        handle.abort();
    }

    #[tokio::test]
    async fn test_link_stops_when_receiver_dropped() {
        let world = MemoryWorld::new();
        let (_node, rx, handle) = link_for(&world);
        drop(rx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("link should exit")
            .unwrap();
    }
}
