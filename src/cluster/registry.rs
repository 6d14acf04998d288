//! Cluster registry: the fixed, ordered set of nodes

use crate::common::{ClusterConfig, Result};
use crate::node::{Connectivity, Connector, Endpoint, NodeEvent, NodeHandle, NodeLink, Role};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const NODE_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Owns every [`NodeHandle`] for the lifetime of a cluster.
///
/// Configured order is the election tie-break.
pub struct ClusterRegistry {
    nodes: Vec<Arc<NodeHandle>>,
    ready_seq: AtomicU64,
    links: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterRegistry {
    /// Build handles without connecting them
    pub fn new(config: &ClusterConfig) -> Self {
        let nodes = config
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| Arc::new(NodeHandle::new(index, node, config.command_timeout())))
            .collect();

        Self {
            nodes,
            ready_seq: AtomicU64::new(0),
            links: Mutex::new(Vec::new()),
        }
    }

    /// Build handles and start one link task per node.
    ///
    /// The returned receiver carries every node's readiness and error
    /// signals; whoever drains it owns node state transitions.
    pub fn connect_all(
        config: &ClusterConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<NodeEvent>)> {
        config.validate()?;

        let registry = Arc::new(Self::new(config));
        let (tx, rx) = mpsc::channel(NODE_EVENT_CHANNEL_CAPACITY);

        let links = registry
            .nodes
            .iter()
            .map(|node| {
                NodeLink::new(
                    node.clone(),
                    connector.clone(),
                    tx.clone(),
                    config.health_check_interval(),
                )
                .spawn()
            })
            .collect();
        *registry.links.lock().unwrap_or_else(PoisonError::into_inner) = links;

        tracing::info!("connecting to {} node(s)", registry.nodes.len());
        Ok((registry, rx))
    }

    pub fn nodes(&self) -> &[Arc<NodeHandle>] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&Arc<NodeHandle>> {
        self.nodes.get(index)
    }

    pub fn get(&self, label: &str) -> Option<&Arc<NodeHandle>> {
        self.nodes.iter().find(|n| n.label() == label)
    }

    pub fn find(&self, endpoint: &Endpoint) -> Option<&Arc<NodeHandle>> {
        self.nodes.iter().find(|n| n.endpoint() == endpoint)
    }

    /// Online nodes in configured order
    pub fn online_nodes(&self) -> Vec<Arc<NodeHandle>> {
        self.nodes.iter().filter(|n| n.is_online()).cloned().collect()
    }

    pub fn current_primary(&self) -> Option<Arc<NodeHandle>> {
        self.nodes.iter().find(|n| n.is_primary()).cloned()
    }

    pub fn primary_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_primary()).count()
    }

    /// The online node that reported ready last
    pub fn most_recently_ready(&self) -> Option<Arc<NodeHandle>> {
        self.nodes
            .iter()
            .filter(|n| n.is_online())
            .filter_map(|n| n.state().ready_seq.map(|seq| (seq, n)))
            .max_by_key(|(seq, _)| *seq)
            .map(|(_, n)| n.clone())
    }

    /// Record a readiness signal: the node goes online and gets the next
    /// ready sequence number
    pub(crate) fn mark_ready(&self, node: &NodeHandle) {
        let seq = self.ready_seq.fetch_add(1, Ordering::SeqCst) + 1;
        node.mark_ready(seq);
    }

    /// Stop every link task and drop their connections
    pub fn shutdown(&self) {
        let links = std::mem::take(&mut *self.links.lock().unwrap_or_else(PoisonError::into_inner));
        for link in links {
            link.abort();
        }
        for node in &self.nodes {
            node.detach_client();
        }
    }

    pub fn status(&self) -> ClusterStatus {
        let nodes = self
            .nodes
            .iter()
            .map(|n| {
                let state = n.state();
                NodeStatus {
                    label: n.label().to_string(),
                    endpoint: n.endpoint().to_string(),
                    connectivity: state.connectivity,
                    role: state.role,
                }
            })
            .collect();

        ClusterStatus {
            primary: self.current_primary().map(|n| n.label().to_string()),
            nodes,
        }
    }
}

impl Drop for ClusterRegistry {
    fn drop(&mut self) {
        for link in self.links.get_mut().unwrap_or_else(PoisonError::into_inner).drain(..) {
            link.abort();
        }
    }
}

/// Snapshot served by the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub primary: Option<String>,
    pub nodes: Vec<NodeStatus>,
}

impl ClusterStatus {
    pub fn is_degraded(&self) -> bool {
        self.primary.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub label: String,
    pub endpoint: String,
    pub connectivity: Connectivity,
    pub role: Role,
}
