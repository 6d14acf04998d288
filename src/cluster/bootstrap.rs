//! Initial primary selection

use crate::cluster::record::{read_record, write_record};
use crate::cluster::registry::ClusterRegistry;
use crate::common::{Error, Result};
use crate::node::{Connectivity, Endpoint, NodeEvent, NodeHandle, Role};
use futures_util::future::{try_join, try_join_all};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Result of a successful bootstrap
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    /// `None` when the recorded primary is not one of the configured nodes
    pub primary: Option<Arc<NodeHandle>>,
    pub replicas: Vec<Arc<NodeHandle>>,
    /// Endpoint every replica was pointed at
    pub target: Endpoint,
}

impl BootstrapOutcome {
    pub fn is_degraded(&self) -> bool {
        self.primary.is_none()
    }
}

/// Waits for the nodes to settle, then recovers or picks the initial
/// primary and arranges every other ready node as its replica.
pub struct BootstrapCoordinator<'a> {
    registry: &'a ClusterRegistry,
    settle_window: Duration,
    record_key: &'a str,
}

impl<'a> BootstrapCoordinator<'a> {
    pub fn new(registry: &'a ClusterRegistry, settle_window: Duration, record_key: &'a str) -> Self {
        Self {
            registry,
            settle_window,
            record_key,
        }
    }

    pub async fn run(&self, events: &mut mpsc::Receiver<NodeEvent>) -> Result<BootstrapOutcome> {
        self.settle(events).await;

        let online = self.registry.online_nodes();
        let Some(source) = self.registry.most_recently_ready() else {
            return Err(Error::Bootstrap(format!(
                "no node became ready within {}ms",
                self.settle_window.as_millis()
            )));
        };
        tracing::info!(
            "{} of {} node(s) ready after settle window",
            online.len(),
            self.registry.nodes().len()
        );

        let record = read_record(&source, self.record_key)
            .await
            .map_err(|e| failed(&source, e))?;

        let target = match &record {
            Some(record) => {
                tracing::info!("recorded primary is {}:{}", record.host, record.port);
                record.endpoint()
            }
            None => online[0].endpoint().clone(),
        };

        let primary = online.iter().find(|n| *n.endpoint() == target).cloned();
        let replicas: Vec<_> = online
            .iter()
            .filter(|n| *n.endpoint() != target)
            .cloned()
            .collect();

        match &primary {
            Some(node) => {
                node.set_role(Role::Primary);
                tracing::info!("primary: {} ({})", node.label(), node.endpoint());
            }
            None => tracing::warn!("recorded primary {} is not a configured node", target),
        }

        let promote = async {
            if let Some(node) = &primary {
                node.promote().await.map_err(|e| failed(node, e))?;
                let current = record.as_ref().map(|r| r.endpoint());
                if current.as_ref() != Some(&target) {
                    write_record(node, self.record_key, &target)
                        .await
                        .map_err(|e| failed(node, e))?;
                }
            }
            Ok::<_, Error>(())
        };

        let follow = try_join_all(replicas.iter().map(|node| {
            let target = &target;
            async move {
                node.follow(target).await.map_err(|e| failed(node, e))?;
                node.set_role(Role::Replica);
                tracing::info!("replica: {} -> {}", node.label(), target);
                Ok::<_, Error>(())
            }
        }));

        try_join(promote, follow).await?;

        Ok(BootstrapOutcome {
            primary,
            replicas,
            target,
        })
    }

    /// Collect readiness signals until the settle window closes
    async fn settle(&self, events: &mut mpsc::Receiver<NodeEvent>) {
        let deadline = Instant::now() + self.settle_window;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return,
                event = events.recv() => match event {
                    Some(event) => self.record(event),
                    None => return,
                },
            }
        }
    }

    fn record(&self, event: NodeEvent) {
        let Some(node) = self.registry.node(event.index()) else {
            return;
        };
        match event {
            NodeEvent::Ready { .. } => {
                self.registry.mark_ready(node);
                tracing::debug!("{} is ready", node.label());
            }
            NodeEvent::Error { cause, .. } => {
                node.set_connectivity(Connectivity::Offline);
                tracing::debug!("{} is not reachable: {}", node.label(), cause);
            }
        }
    }
}

fn failed(node: &NodeHandle, e: Error) -> Error {
    Error::Bootstrap(format!("{}: {}", node.label(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ClusterConfig, NodeConfig};

    #[tokio::test]
    async fn test_nothing_ready_fails() {
        let registry = ClusterRegistry::new(&ClusterConfig::new(vec![NodeConfig::new(
            "127.0.0.1",
            6379,
        )]));
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(NodeEvent::Error {
            index: 0,
            cause: "connection refused".into(),
        })
        .await
        .unwrap();

        let err = BootstrapCoordinator::new(&registry, Duration::from_millis(20), "MASTER_INFO")
            .run(&mut rx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Bootstrap(_)));
        assert_eq!(registry.nodes()[0].connectivity(), Connectivity::Offline);
    }
}
