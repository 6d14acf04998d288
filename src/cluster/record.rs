//! Persisted primary record
//!
//! One JSON key on the primary names the node that was last promoted. It is
//! read once at bootstrap and is advisory only.

use crate::common::Result;
use crate::node::{Endpoint, NodeHandle};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryRecord {
    pub host: String,
    pub port: u16,
}

impl PrimaryRecord {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

impl From<&Endpoint> for PrimaryRecord {
    fn from(endpoint: &Endpoint) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
        }
    }
}

/// Read the record from `node`. Anything that does not decode is logged
/// and treated as absent.
pub async fn read_record(node: &NodeHandle, key: &str) -> Result<Option<PrimaryRecord>> {
    let Some(raw) = node.get(key).await? else {
        return Ok(None);
    };

    match serde_json::from_slice::<PrimaryRecord>(&raw) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            tracing::warn!(
                node = %node.label(),
                "ignoring malformed {} value {:?}: {}",
                key,
                String::from_utf8_lossy(&raw),
                e
            );
            Ok(None)
        }
    }
}

/// Overwrite the record on `node` (the primary) so it names `primary`
pub async fn write_record(node: &NodeHandle, key: &str, primary: &Endpoint) -> Result<()> {
    let json = serde_json::to_vec(&PrimaryRecord::from(primary))?;
    node.set(key, Bytes::from(json), None).await
}
