//! In-process key-value nodes.
//!
//! Used by the frontend's mock mode and by tests. Each simulated node keeps
//! its own data and replication upstream; writes on a primary are copied
//! to the live replicas following it, and a node told to follow an
//! upstream takes a full copy of the upstream's data.
//!
//! Fault injection: [`MemoryWorld::kill`] takes a node down and breaks every
//! client connected to it; [`MemoryWorld::revive`] brings it back as a
//! standalone primary, like a restarted server without replication config.

use crate::common::{Error, Result};
use crate::node::{Connector, Endpoint, NodeClient};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const READONLY_REPLY: &str = "READONLY You can't write against a read only replica.";

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
struct MemoryNode {
    up: bool,
    /// Bumped on every kill so clients from before the outage go stale
    epoch: u64,
    upstream: Option<Endpoint>,
    data: HashMap<String, Entry>,
    refuse_role_changes: bool,
}

impl MemoryNode {
    fn new() -> Self {
        Self {
            up: true,
            epoch: 0,
            upstream: None,
            data: HashMap::new(),
            refuse_role_changes: false,
        }
    }
}

/// A set of simulated nodes addressed by endpoint
#[derive(Debug, Default)]
pub struct MemoryWorld {
    nodes: Mutex<HashMap<Endpoint, MemoryNode>>,
}

impl MemoryWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// World with every endpoint up and standalone
    pub fn with_nodes<I>(endpoints: I) -> Arc<Self>
    where
        I: IntoIterator<Item = Endpoint>,
    {
        let world = Self::new();
        for endpoint in endpoints {
            world.add_node(endpoint);
        }
        world
    }

    pub fn add_node(&self, endpoint: Endpoint) {
        self.lock().insert(endpoint, MemoryNode::new());
    }

    pub fn connector(self: &Arc<Self>) -> Arc<MemoryConnector> {
        Arc::new(MemoryConnector {
            world: Arc::clone(self),
        })
    }

    /// Take a node down; existing connections fail from now on
    pub fn kill(&self, endpoint: &Endpoint) {
        if let Some(node) = self.lock().get_mut(endpoint) {
            node.up = false;
            node.epoch += 1;
        }
    }

    /// Bring a node back. It keeps its data but forgets its upstream.
    pub fn revive(&self, endpoint: &Endpoint) {
        if let Some(node) = self.lock().get_mut(endpoint) {
            node.up = true;
            node.upstream = None;
        }
    }

    pub fn is_up(&self, endpoint: &Endpoint) -> bool {
        self.lock().get(endpoint).is_some_and(|n| n.up)
    }

    /// Upstream the node replicates from, `None` for a primary
    pub fn upstream_of(&self, endpoint: &Endpoint) -> Option<Endpoint> {
        self.lock().get(endpoint).and_then(|n| n.upstream.clone())
    }

    /// Read a key directly, bypassing connections
    pub fn read(&self, endpoint: &Endpoint, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        self.lock()
            .get(endpoint)
            .and_then(|n| n.data.get(key))
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone())
    }

    /// Write a key directly, bypassing connections and read-only checks
    pub fn write(&self, endpoint: &Endpoint, key: &str, value: impl Into<Bytes>) {
        if let Some(node) = self.lock().get_mut(endpoint) {
            node.data.insert(
                key.to_string(),
                Entry {
                    value: value.into(),
                    expires_at: None,
                },
            );
        }
    }

    /// Make role-change commands against the node fail
    pub fn refuse_role_changes(&self, endpoint: &Endpoint, refuse: bool) {
        if let Some(node) = self.lock().get_mut(endpoint) {
            node.refuse_role_changes = refuse;
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Endpoint, MemoryNode>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// [`Connector`] over a [`MemoryWorld`]
pub struct MemoryConnector {
    world: Arc<MemoryWorld>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn NodeClient>> {
        let nodes = self.world.lock();
        match nodes.get(endpoint) {
            Some(node) if node.up => Ok(Arc::new(MemoryClient {
                world: Arc::clone(&self.world),
                endpoint: endpoint.clone(),
                epoch: node.epoch,
            })),
            _ => Err(Error::ConnectionFailed(format!(
                "{}: connection refused",
                endpoint
            ))),
        }
    }
}

/// One connection to a simulated node
struct MemoryClient {
    world: Arc<MemoryWorld>,
    endpoint: Endpoint,
    epoch: u64,
}

impl MemoryClient {
    /// Runs `f` against the whole world after checking this connection is
    /// still alive.
    fn with_world<T>(
        &self,
        f: impl FnOnce(&mut HashMap<Endpoint, MemoryNode>) -> Result<T>,
    ) -> Result<T> {
        let mut nodes = self.world.lock();
        match nodes.get(&self.endpoint) {
            Some(node) if node.up && node.epoch == self.epoch => f(&mut nodes),
            _ => Err(Error::ConnectionFailed(format!(
                "{}: connection reset",
                self.endpoint
            ))),
        }
    }

    fn rejected(&self, reason: &str) -> Error {
        Error::Command {
            node: self.endpoint.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Apply a write to the primary and every live replica following it
    fn replicate(
        &self,
        nodes: &mut HashMap<Endpoint, MemoryNode>,
        apply: impl Fn(&mut HashMap<String, Entry>),
    ) -> Result<()> {
        if nodes
            .get(&self.endpoint)
            .is_some_and(|n| n.upstream.is_some())
        {
            return Err(self.rejected(READONLY_REPLY));
        }

        for (endpoint, node) in nodes.iter_mut() {
            let follows = node.up && node.upstream.as_ref() == Some(&self.endpoint);
            if *endpoint == self.endpoint || follows {
                apply(&mut node.data);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NodeClient for MemoryClient {
    async fn ping(&self) -> Result<()> {
        self.with_world(|_| Ok(()))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let now = Instant::now();
        self.with_world(|nodes| {
            let data = match nodes.get_mut(&self.endpoint) {
                Some(node) => &mut node.data,
                None => return Ok(None),
            };
            match data.get(key) {
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
            data.remove(key);
            Ok(None)
        })
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.with_world(|nodes| {
            self.replicate(nodes, |data| {
                data.insert(key.to_string(), entry.clone());
            })
        })
    }

    async fn del(&self, key: &str) -> Result<bool> {
        self.with_world(|nodes| {
            let existed = nodes
                .get(&self.endpoint)
                .is_some_and(|n| n.data.contains_key(key));
            self.replicate(nodes, |data| {
                data.remove(key);
            })?;
            Ok(existed)
        })
    }

    async fn replica_of(&self, upstream: Option<&Endpoint>) -> Result<()> {
        self.with_world(|nodes| {
            if nodes
                .get(&self.endpoint)
                .is_some_and(|n| n.refuse_role_changes)
            {
                return Err(self.rejected("ERR role change refused"));
            }

            let Some(upstream) = upstream else {
                if let Some(node) = nodes.get_mut(&self.endpoint) {
                    node.upstream = None;
                }
                return Ok(());
            };

            if *upstream == self.endpoint {
                return Err(self.rejected("ERR can't replicate from itself"));
            }

            // full resync when the upstream is reachable
            let snapshot = nodes
                .get(upstream)
                .filter(|n| n.up)
                .map(|n| n.data.clone());

            if let Some(node) = nodes.get_mut(&self.endpoint) {
                node.upstream = Some(upstream.clone());
                if let Some(data) = snapshot {
                    node.data = data;
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(port: u16) -> Endpoint {
        Endpoint::new("127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_connect_refused_for_unknown_or_down() {
        let world = MemoryWorld::with_nodes([ep(6379)]);
        let connector = world.connector();

        assert!(connector.connect(&ep(6380)).await.is_err());
        world.kill(&ep(6379));
        assert!(connector.connect(&ep(6379)).await.is_err());
        world.revive(&ep(6379));
        assert!(connector.connect(&ep(6379)).await.is_ok());
    }

    #[tokio::test]
    async fn test_kill_breaks_existing_clients() {
        let world = MemoryWorld::with_nodes([ep(6379)]);
        let client = world.connector().connect(&ep(6379)).await.unwrap();
        client.ping().await.unwrap();

        world.kill(&ep(6379));
        world.revive(&ep(6379));

        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_replication_and_readonly() {
        let world = MemoryWorld::with_nodes([ep(6379), ep(6380)]);
        let connector = world.connector();
        let primary = connector.connect(&ep(6379)).await.unwrap();
        let replica = connector.connect(&ep(6380)).await.unwrap();

        primary
            .set("before", Bytes::from_static(b"1"), None)
            .await
            .unwrap();
        replica.replica_of(Some(&ep(6379))).await.unwrap();
        assert_eq!(world.upstream_of(&ep(6380)), Some(ep(6379)));
        assert_eq!(world.read(&ep(6380), "before"), Some(Bytes::from_static(b"1")));

        primary
            .set("after", Bytes::from_static(b"2"), None)
            .await
            .unwrap();
        assert_eq!(
            replica.get("after").await.unwrap(),
            Some(Bytes::from_static(b"2"))
        );

        let err = replica
            .set("nope", Bytes::from_static(b"x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Command { .. }));

        assert!(primary.del("after").await.unwrap());
        assert_eq!(replica.get("after").await.unwrap(), None);

        replica.replica_of(None).await.unwrap();
        assert_eq!(world.upstream_of(&ep(6380)), None);
    }

    #[tokio::test]
    async fn test_expiry() {
        let world = MemoryWorld::with_nodes([ep(6379)]);
        let client = world.connector().connect(&ep(6379)).await.unwrap();
        client
            .set("sess:1", Bytes::from_static(b"{}"), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(client.get("sess:1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(client.get("sess:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refused_role_change() {
        let world = MemoryWorld::with_nodes([ep(6379), ep(6380)]);
        world.refuse_role_changes(&ep(6380), true);
        let client = world.connector().connect(&ep(6380)).await.unwrap();

        assert!(client.replica_of(Some(&ep(6379))).await.is_err());
        assert!(client.replica_of(Some(&ep(6380))).await.is_err());
    }

    #[test]
    fn test_revive_forgets_upstream() {
        let world = MemoryWorld::with_nodes([ep(6379), ep(6380)]);
        world.write(&ep(6380), "k", "v");
        {
            let mut nodes = world.lock();
            nodes.get_mut(&ep(6380)).unwrap().upstream = Some(ep(6379));
        }
        world.kill(&ep(6380));
        assert!(!world.is_up(&ep(6380)));

        world.revive(&ep(6380));
        assert!(world.is_up(&ep(6380)));
        assert_eq!(world.upstream_of(&ep(6380)), None);
        assert_eq!(world.read(&ep(6380), "k"), Some(Bytes::from_static(b"v")));
    }
}
