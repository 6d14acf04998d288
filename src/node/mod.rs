//! Key-value nodes: handles, client seam, link tasks and backends
//!
//! A node is reached through a [`Connector`], which yields a [`NodeClient`]
//! for each established connection. Two backends ship with the crate:
//! - [`RespConnector`]: real servers over TCP
//! - [`MemoryConnector`]: in-process nodes (mock mode and tests)

pub mod handle;
pub mod link;
pub mod memory;
pub mod resp_client;

pub use handle::{Connectivity, Endpoint, NodeHandle, NodeState, Role};
pub use link::{NodeEvent, NodeLink};
pub use memory::{MemoryConnector, MemoryWorld};
pub use resp_client::{RespClient, RespConnector};

use crate::common::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Commands the coordinator and the bound resources issue to a node
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    /// Returns whether the key existed
    async fn del(&self, key: &str) -> Result<bool>;

    /// Role change: `None` makes the node a primary, `Some` a replica of
    /// the given endpoint.
    async fn replica_of(&self, upstream: Option<&Endpoint>) -> Result<()>;
}

/// Opens connections to nodes
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn NodeClient>>;
}
