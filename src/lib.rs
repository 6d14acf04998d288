//! # sessionkv
//!
//! Resilient session storage for a web frontend on top of a small cluster of
//! Redis-protocol key-value nodes:
//! - exactly one node is treated as the writable primary, the others follow it
//! - the primary is recorded on the primary itself and recovered at bootstrap
//! - when the primary is lost the first online node in configured order is
//!   promoted and the rest are reattached to it
//! - a node that comes back always rejoins as a replica
//! - session and login-guard resources rebind to the new primary on failure
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────┐
//!   │  Frontend (axum)             │
//!   │  session middleware, guard   │
//!   └──────────────┬───────────────┘
//!                  │ BoundResources (generation-tagged)
//!   ┌──────────────▼───────────────┐
//!   │  Cluster                     │
//!   │  bootstrap → failure monitor │
//!   └──────────────┬───────────────┘
//!                  │ one link task per node (RESP over TCP)
//!   ┌──────────┐ ┌─▼────────┐ ┌──────────┐
//!   │ kv-node-1│ │ kv-node-2│ │ kv-node-3│
//!   │ primary  │ │ replica  │ │ replica  │
//!   └──────────┘ └──────────┘ └──────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Serve the frontend against two nodes
//! sessionkv serve --node 127.0.0.1:6379,127.0.0.1:6380 --bind 0.0.0.0:3000
//!
//! # Bootstrap only and print the primary
//! sessionkv probe --node 127.0.0.1:6379,127.0.0.1:6380
//!
//! # No servers around: in-process nodes
//! sessionkv serve --mock --node 127.0.0.1:6379,127.0.0.1:6380
//! ```

#![allow(clippy::result_large_err)]

pub mod cluster;
pub mod common;
pub mod frontend;
pub mod node;
pub mod resp;
pub mod session;

pub use cluster::{Cluster, ClusterEvent, Fault};
pub use common::{Config, Error, Result};
pub use session::{BoundResources, ResourceFactory};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
