//! Node handle: one key-value endpoint plus its observed state

use crate::common::{with_deadline, Error, NodeConfig, Result};
use crate::node::NodeClient;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

/// Network address of a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidConfig(format!("expected host:port, got {}", s)))?;
        if host.is_empty() {
            return Err(Error::InvalidConfig(format!("missing host in {}", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::InvalidConfig(format!("invalid port in {}", s)))?;
        Ok(Endpoint::new(host, port))
    }
}

/// Connection state as observed by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    /// Initial state, no readiness signal yet
    Connecting,
    Online,
    /// Failed before the failure monitor attached
    Offline,
    /// Disconnected; reattachment pending on the next readiness signal
    Recovering,
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connectivity::Connecting => write!(f, "connecting"),
            Connectivity::Online => write!(f, "online"),
            Connectivity::Offline => write!(f, "offline"),
            Connectivity::Recovering => write!(f, "recovering"),
        }
    }
}

/// Replication role assigned by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Replica,
    Unknown,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Replica => write!(f, "replica"),
            Role::Unknown => write!(f, "unknown"),
        }
    }
}

/// Snapshot of a node's mutable state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeState {
    pub connectivity: Connectivity,
    pub role: Role,
    /// Order in which the node last reported ready (higher is later)
    pub ready_seq: Option<u64>,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::Connecting,
            role: Role::Unknown,
            ready_seq: None,
        }
    }
}

/// One key-value node of the cluster.
///
/// State is only mutated by the coordinator (bootstrap, then the failure
/// monitor). The client slot is filled by the node's link task while a
/// connection is established.
pub struct NodeHandle {
    index: usize,
    label: String,
    endpoint: Endpoint,
    retry_interval: Duration,
    command_timeout: Duration,
    state: Mutex<NodeState>,
    client: RwLock<Option<Arc<dyn NodeClient>>>,
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("label", &self.label)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl NodeHandle {
    pub fn new(index: usize, config: &NodeConfig, command_timeout: Duration) -> Self {
        Self {
            index,
            label: config.label_or_default(index),
            endpoint: config.endpoint(),
            retry_interval: config.retry_interval(),
            command_timeout,
            state: Mutex::new(NodeState::default()),
            client: RwLock::new(None),
        }
    }

    /// Position in the configured node order
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn state(&self) -> NodeState {
        *self.lock_state()
    }

    pub fn connectivity(&self) -> Connectivity {
        self.lock_state().connectivity
    }

    pub fn role(&self) -> Role {
        self.lock_state().role
    }

    pub fn is_online(&self) -> bool {
        self.connectivity() == Connectivity::Online
    }

    pub fn is_primary(&self) -> bool {
        self.role() == Role::Primary
    }

    pub fn is_recovering(&self) -> bool {
        self.connectivity() == Connectivity::Recovering
    }

    pub(crate) fn set_connectivity(&self, connectivity: Connectivity) {
        self.lock_state().connectivity = connectivity;
    }

    pub(crate) fn set_role(&self, role: Role) {
        self.lock_state().role = role;
    }

    pub(crate) fn mark_ready(&self, seq: u64) {
        let mut state = self.lock_state();
        state.connectivity = Connectivity::Online;
        state.ready_seq = Some(seq);
    }

    fn lock_state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Connection slot ===

    pub(crate) fn attach_client(&self, client: Arc<dyn NodeClient>) {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client);
    }

    pub(crate) fn detach_client(&self) {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_connected(&self) -> bool {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Current client, or a retryable error while the link is down
    pub fn client(&self) -> Result<Arc<dyn NodeClient>> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::ConnectionFailed(format!("{} is not connected", self.label)))
    }

    // === Commands (each bounded by the command deadline) ===

    pub async fn ping(&self) -> Result<()> {
        let client = self.client()?;
        with_deadline(self.command_timeout, "PING", client.ping()).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let client = self.client()?;
        with_deadline(self.command_timeout, "GET", client.get(key)).await
    }

    pub async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let client = self.client()?;
        with_deadline(self.command_timeout, "SET", client.set(key, value, ttl)).await
    }

    pub async fn del(&self, key: &str) -> Result<bool> {
        let client = self.client()?;
        with_deadline(self.command_timeout, "DEL", client.del(key)).await
    }

    /// Role change: become primary (no upstream)
    pub async fn promote(&self) -> Result<()> {
        let client = self.client()?;
        with_deadline(self.command_timeout, "REPLICAOF NO ONE", client.replica_of(None)).await
    }

    /// Role change: become a replica of `upstream`
    pub async fn follow(&self, upstream: &Endpoint) -> Result<()> {
        let client = self.client()?;
        with_deadline(
            self.command_timeout,
            "REPLICAOF",
            client.replica_of(Some(upstream)),
        )
        .await
    }
}
