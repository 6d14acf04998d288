//! Frontend server

use crate::cluster::Cluster;
use crate::common::{Config, Result};
use crate::frontend::http::{create_router, FrontendState};
use crate::session::BoundResources;
use std::net::SocketAddr;
use std::sync::Arc;

pub struct Frontend {
    config: Config,
    resources: Arc<BoundResources>,
}

impl Frontend {
    pub fn new(config: Config, cluster: &Cluster) -> Self {
        let factory = cluster.resources(config.session.clone(), config.login_guard.clone());
        Self {
            config,
            resources: Arc::new(BoundResources::new(factory)),
        }
    }

    pub fn resources(&self) -> &Arc<BoundResources> {
        &self.resources
    }

    /// Serve until Ctrl-C
    pub async fn serve(self) -> Result<()> {
        let bind_addr = self.config.frontend.bind_addr;
        let state = FrontendState::new(self.resources.clone(), self.config.frontend.title.clone());
        let router = create_router(state);

        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        tracing::info!("frontend listening on http://{}", listener.local_addr()?);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        tracing::info!("frontend stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
