//! Primary election after the primary is lost

use crate::cluster::events::{ClusterEvent, EventBus, Fault};
use crate::cluster::record::write_record;
use crate::cluster::registry::ClusterRegistry;
use crate::node::{NodeHandle, Role};
use futures_util::future::join_all;
use std::sync::Arc;

/// Promote the first online non-primary node in configured order, persist
/// the record on it, then point every other online node at it.
///
/// A candidate whose promotion fails is skipped. Reattach failures are
/// reported and left in place. Returns `None` (and signals the degraded
/// state) when no candidate could be promoted.
pub async fn elect(
    registry: &ClusterRegistry,
    record_key: &str,
    events: &EventBus,
) -> Option<Arc<NodeHandle>> {
    let primary = promote_first_candidate(registry).await;

    let Some(primary) = primary else {
        tracing::error!("no online node can take over as primary, cluster is degraded");
        events.fault(Fault::Degraded);
        return None;
    };

    let endpoint = primary.endpoint().clone();
    tracing::info!("elected {} ({}) as primary", primary.label(), endpoint);

    if let Err(e) = write_record(&primary, record_key, &endpoint).await {
        tracing::warn!("could not persist {} on {}: {}", record_key, primary.label(), e);
    }
    events.emit(ClusterEvent::PrimaryElected {
        label: primary.label().to_string(),
        endpoint: endpoint.clone(),
    });

    let others: Vec<_> = registry
        .online_nodes()
        .into_iter()
        .filter(|n| n.index() != primary.index())
        .collect();

    let results = join_all(others.iter().map(|node| {
        let endpoint = &endpoint;
        async move { (node, node.follow(endpoint).await) }
    }))
    .await;

    for (node, result) in results {
        match result {
            Ok(()) => {
                node.set_role(Role::Replica);
                tracing::info!("{} now replicates {}", node.label(), endpoint);
            }
            Err(e) => {
                tracing::warn!("could not reattach {} to {}: {}", node.label(), endpoint, e);
                events.fault(Fault::ReplicaReattach {
                    node: node.label().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Some(primary)
}

async fn promote_first_candidate(registry: &ClusterRegistry) -> Option<Arc<NodeHandle>> {
    for node in registry.nodes() {
        if !node.is_online() || node.is_primary() {
            continue;
        }

        node.set_role(Role::Primary);
        match node.promote().await {
            Ok(()) => return Some(node.clone()),
            Err(e) => {
                tracing::warn!("promoting {} failed: {}", node.label(), e);
                node.set_role(Role::Unknown);
            }
        }
    }
    None
}
