//! Resource factory: builds resources bound to the current primary

use crate::cluster::ClusterRegistry;
use crate::common::{Error, GuardConfig, Result, SessionConfig};
use crate::session::{LoginGuard, SessionStore};
use std::sync::Arc;

/// Looks up the primary on every call and never touches resources it has
/// already handed out.
#[derive(Clone)]
pub struct ResourceFactory {
    registry: Arc<ClusterRegistry>,
    session: SessionConfig,
    guard: GuardConfig,
}

impl ResourceFactory {
    pub fn new(registry: Arc<ClusterRegistry>, session: SessionConfig, guard: GuardConfig) -> Self {
        Self {
            registry,
            session,
            guard,
        }
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session
    }

    pub fn session_resource(&self) -> Result<SessionStore> {
        let primary = self.registry.current_primary().ok_or(Error::DegradedCluster)?;
        tracing::debug!("session store bound to {}", primary.label());
        Ok(SessionStore::new(primary, self.session.clone()))
    }

    pub fn login_guard_resource(&self) -> Result<LoginGuard> {
        let primary = self.registry.current_primary().ok_or(Error::DegradedCluster)?;
        tracing::debug!("login guard bound to {}", primary.label());
        Ok(LoginGuard::new(primary, self.guard.clone()))
    }
}
