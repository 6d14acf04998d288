//! sessionkv binary: cluster coordinator plus session frontend

use clap::{Parser, Subcommand};
use sessionkv::cluster::{Cluster, ClusterEvent};
use sessionkv::common::{Config, NodeConfig};
use sessionkv::frontend::Frontend;
use sessionkv::node::{Connector, MemoryWorld, RespConnector};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sessionkv")]
#[command(about = "Session frontend with primary/replica failover over a key-value cluster")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./sessionkv.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cluster nodes as host:port or label=host:port (comma-separated,
    /// replaces the configured list)
    #[arg(long = "node", global = true, value_delimiter = ',')]
    nodes: Vec<NodeConfig>,

    /// Use in-process memory nodes instead of real servers
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the failover monitor and the HTTP frontend
    Serve {
        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// Bootstrap the cluster, print the primary and exit
    Probe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file and environment, then apply CLI overrides
    let mut config = Config::load(cli.config.as_deref())?;
    if !cli.nodes.is_empty() {
        config.cluster.nodes = cli.nodes;
    }
    if cli.mock {
        config.frontend.mock = true;
    }

    let level = if config.log_level.is_empty() {
        "info".to_string()
    } else {
        config.log_level.clone()
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let connector: Arc<dyn Connector> = if config.frontend.mock {
        tracing::info!("mock mode: using in-process nodes");
        let world = MemoryWorld::with_nodes(config.cluster.nodes.iter().map(|n| n.endpoint()));
        world.connector() as Arc<dyn Connector>
    } else {
        Arc::new(RespConnector::new())
    };

    let cluster = Cluster::connect(config.cluster.clone(), connector)?;
    spawn_event_log(&cluster);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.frontend.bind_addr = bind;
            }

            cluster.start().await?;
            let frontend = Frontend::new(config, &cluster);
            frontend.serve().await?;
        }
        Commands::Probe => {
            let outcome = cluster.init().await?;
            match &outcome.primary {
                Some(primary) => println!("primary: {} ({})", primary.label(), primary.endpoint()),
                None => println!("primary: none (recorded {} is not configured)", outcome.target),
            }
            for replica in &outcome.replicas {
                println!("replica: {} ({})", replica.label(), replica.endpoint());
            }
        }
    }

    cluster.shutdown();
    Ok(())
}

fn spawn_event_log(cluster: &Cluster) {
    let mut events = cluster.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ClusterEvent::Errored { fault }) => tracing::warn!("cluster fault: {}", fault),
                Ok(event) => tracing::debug!(?event, "cluster event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("event log skipped {} event(s)", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
