//! Shared helpers for the cluster integration tests

#![allow(dead_code)]

use sessionkv::cluster::{Cluster, ClusterEvent};
use sessionkv::common::{ClusterConfig, NodeConfig};
use sessionkv::node::{Endpoint, MemoryWorld};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const RECORD_KEY: &str = "MASTER_INFO";

pub fn endpoint(port: u16) -> Endpoint {
    Endpoint::new("127.0.0.1", port)
}

/// Cluster config with timings short enough for tests
pub fn cluster_config(ports: &[u16]) -> ClusterConfig {
    let nodes = ports
        .iter()
        .map(|port| NodeConfig::new("127.0.0.1", *port).with_retry_interval(Duration::from_millis(20)))
        .collect();
    ClusterConfig {
        settle_window_ms: 150,
        health_check_interval_ms: 20,
        command_timeout_ms: 500,
        ..ClusterConfig::new(nodes)
    }
}

/// Memory nodes for `ports` plus a cluster connected to them
pub fn memory_cluster(ports: &[u16]) -> (Arc<MemoryWorld>, Cluster) {
    let world = MemoryWorld::with_nodes(ports.iter().map(|p| endpoint(*p)));
    let cluster = Cluster::connect(cluster_config(ports), world.connector()).unwrap();
    (world, cluster)
}

pub fn record_json(port: u16) -> String {
    format!(r#"{{"host":"127.0.0.1","port":{}}}"#, port)
}

/// Poll `condition` until it holds, panicking after a few seconds
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for the first event matching `pred`
pub async fn next_event(
    rx: &mut broadcast::Receiver<ClusterEvent>,
    pred: impl Fn(&ClusterEvent) -> bool,
) -> ClusterEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Everything already published on `rx`
pub fn drain(rx: &mut broadcast::Receiver<ClusterEvent>) -> Vec<ClusterEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
