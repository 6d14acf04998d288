//! Failover coordination for a replicated key-value cluster
//!
//! A [`Cluster`] owns the node registry, bootstraps the initial primary and
//! (once started) runs the failure monitor that elects a new primary when the
//! current one is lost.

pub mod bootstrap;
pub mod election;
pub mod events;
pub mod monitor;
pub mod record;
pub mod registry;

pub use bootstrap::{BootstrapCoordinator, BootstrapOutcome};
pub use events::{ClusterEvent, EventBus, Fault};
pub use monitor::FailureMonitor;
pub use record::PrimaryRecord;
pub use registry::{ClusterRegistry, ClusterStatus, NodeStatus};

use crate::common::{ClusterConfig, Error, GuardConfig, Result, SessionConfig};
use crate::node::{Connectivity, Connector, NodeEvent, NodeHandle};
use crate::session::ResourceFactory;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// One coordinated cluster. Create as many as needed; nothing is global.
pub struct Cluster {
    config: ClusterConfig,
    registry: Arc<ClusterRegistry>,
    events: EventBus,
    node_events: Mutex<Option<mpsc::Receiver<NodeEvent>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Cluster {
    /// Build the registry and start connecting every node
    pub fn connect(config: ClusterConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let (registry, node_events) = ClusterRegistry::connect_all(&config, connector)?;
        Ok(Self {
            config,
            registry,
            events: EventBus::new(),
            node_events: Mutex::new(Some(node_events)),
            driver: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn current_primary(&self) -> Option<Arc<NodeHandle>> {
        self.registry.current_primary()
    }

    /// Bootstrap only. Readiness keeps being recorded afterwards, but a lost
    /// primary is not replaced.
    pub async fn init(&self) -> Result<BootstrapOutcome> {
        let mut node_events = self.take_node_events()?;
        let outcome = self.bootstrap(&mut node_events).await?;

        let registry = self.registry.clone();
        self.set_driver(tokio::spawn(observe(registry, node_events)));
        Ok(outcome)
    }

    /// Bootstrap, then hand the node events to the failure monitor
    pub async fn start(&self) -> Result<BootstrapOutcome> {
        let mut node_events = self.take_node_events()?;
        let outcome = self.bootstrap(&mut node_events).await?;

        let monitor = FailureMonitor::new(
            self.registry.clone(),
            self.config.record_key.clone(),
            self.events.clone(),
        );
        self.set_driver(tokio::spawn(monitor.run(node_events)));

        self.events.emit(ClusterEvent::Started);
        tracing::info!("failover mechanism has been applied");
        Ok(outcome)
    }

    /// Factory for resources bound to whichever node is primary when asked
    pub fn resources(&self, session: SessionConfig, guard: GuardConfig) -> ResourceFactory {
        ResourceFactory::new(self.registry.clone(), session, guard)
    }

    /// Stop the monitor and every node link
    pub fn shutdown(&self) {
        if let Some(driver) = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            driver.abort();
        }
        self.registry.shutdown();
        tracing::info!("cluster shut down");
    }

    async fn bootstrap(&self, node_events: &mut mpsc::Receiver<NodeEvent>) -> Result<BootstrapOutcome> {
        let coordinator = BootstrapCoordinator::new(
            &self.registry,
            self.config.settle_window(),
            &self.config.record_key,
        );

        match coordinator.run(node_events).await {
            Ok(outcome) => {
                if outcome.is_degraded() {
                    self.events.fault(Fault::Degraded);
                }
                self.events.emit(ClusterEvent::Initialized);
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!("{}", e);
                self.events.fault(Fault::Bootstrap(e.to_string()));
                Err(e)
            }
        }
    }

    fn take_node_events(&self) -> Result<mpsc::Receiver<NodeEvent>> {
        self.node_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::AlreadyStarted)
    }

    fn set_driver(&self, handle: JoinHandle<()>) {
        *self.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        if let Some(driver) = self
            .driver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            driver.abort();
        }
    }
}

/// Passive consumer used after `init`: tracks connectivity, changes no roles
async fn observe(registry: Arc<ClusterRegistry>, mut node_events: mpsc::Receiver<NodeEvent>) {
    while let Some(event) = node_events.recv().await {
        let Some(node) = registry.node(event.index()) else {
            continue;
        };
        match event {
            NodeEvent::Ready { .. } => registry.mark_ready(node),
            NodeEvent::Error { .. } => node.set_connectivity(Connectivity::Offline),
        }
    }
}
