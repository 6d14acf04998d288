//! Session store bound to one node

use crate::common::{Error, Result, SessionConfig};
use crate::node::NodeHandle;
use bytes::Bytes;
use std::sync::Arc;

/// Session contents: a free-form JSON object
pub type SessionData = serde_json::Map<String, serde_json::Value>;

/// Reads and writes sessions on the node it was bound to.
///
/// Once that node stops being primary every call fails with
/// [`Error::StaleBinding`] and the caller is expected to rebind.
#[derive(Debug, Clone)]
pub struct SessionStore {
    node: Arc<NodeHandle>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(node: Arc<NodeHandle>, config: SessionConfig) -> Self {
        Self { node, config }
    }

    pub fn node(&self) -> &Arc<NodeHandle> {
        &self.node
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub async fn load(&self, sid: &str) -> Result<Option<SessionData>> {
        self.ensure_primary()?;
        let Some(raw) = self.node.get(&self.key(sid)).await? else {
            return Ok(None);
        };

        match serde_json::from_slice(&raw) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                tracing::warn!("dropping unreadable session {}: {}", sid, e);
                Ok(None)
            }
        }
    }

    /// Write the session and refresh its expiry
    pub async fn save(&self, sid: &str, data: &SessionData) -> Result<()> {
        self.ensure_primary()?;
        let json = serde_json::to_vec(data)?;
        self.node
            .set(&self.key(sid), Bytes::from(json), Some(self.config.ttl()))
            .await
    }

    pub async fn destroy(&self, sid: &str) -> Result<()> {
        self.ensure_primary()?;
        self.node.del(&self.key(sid)).await?;
        Ok(())
    }

    /// Still usable: bound node is primary and connected
    pub fn is_usable(&self) -> bool {
        self.node.is_primary() && self.node.is_connected()
    }

    fn key(&self, sid: &str) -> String {
        format!("{}{}", self.config.key_prefix, sid)
    }

    fn ensure_primary(&self) -> Result<()> {
        if self.node.is_primary() {
            Ok(())
        } else {
            Err(Error::StaleBinding(self.node.label().to_string()))
        }
    }
}
