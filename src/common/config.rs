//! Configuration for sessionkv components

use crate::common::{Error, Result};
use crate::node::Endpoint;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable prefix (`SESSIONKV__CLUSTER__SETTLE_WINDOW_MS=...`)
pub const ENV_PREFIX: &str = "SESSIONKV";

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "sessionkv";

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Key-value cluster coordinated by the failover monitor
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Session store settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Brute-force guard for the login endpoint
    #[serde(default)]
    pub login_guard: GuardConfig,

    /// HTTP frontend
    #[serde(default)]
    pub frontend: FrontendConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from an optional TOML file and the environment.
    ///
    /// Without an explicit path, `sessionkv.toml` in the working directory is
    /// used when present. Environment variables override file values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: Config = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Nodes in election order
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    /// How long bootstrap waits for readiness signals
    #[serde(default = "default_settle_window")]
    pub settle_window_ms: u64,

    /// Interval between health-check pings on a connected node
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_ms: u64,

    /// Deadline applied to every command sent to a node
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Key holding the persisted primary record
    #[serde(default = "default_record_key")]
    pub record_key: String,
}

fn default_settle_window() -> u64 {
    5000
}
fn default_health_check_interval() -> u64 {
    1000
}
fn default_command_timeout() -> u64 {
    2000
}
fn default_record_key() -> String {
    "MASTER_INFO".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            settle_window_ms: default_settle_window(),
            health_check_interval_ms: default_health_check_interval(),
            command_timeout_ms: default_command_timeout(),
            record_key: default_record_key(),
        }
    }
}

impl ClusterConfig {
    pub fn new(nodes: Vec<NodeConfig>) -> Self {
        Self {
            nodes,
            ..Default::default()
        }
    }

    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Check the cluster definition before any connection is attempted
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::InvalidConfig("cluster has no nodes".into()));
        }
        if self.record_key.is_empty() {
            return Err(Error::InvalidConfig("record_key cannot be empty".into()));
        }
        if self.health_check_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "health_check_interval_ms must be positive".into(),
            ));
        }

        let mut labels = HashSet::new();
        let mut endpoints = HashSet::new();
        for (index, node) in self.nodes.iter().enumerate() {
            if node.port == 0 {
                return Err(Error::InvalidConfig(format!(
                    "node {} has port 0",
                    node.label_or_default(index)
                )));
            }
            if !labels.insert(node.label_or_default(index)) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate node label: {}",
                    node.label_or_default(index)
                )));
            }
            if !endpoints.insert(node.endpoint()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate node endpoint: {}",
                    node.endpoint()
                )));
            }
        }

        Ok(())
    }
}

/// A single key-value node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Delay between reconnection attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_interval_ms: Option<u64>,
}

const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            label: None,
            retry_interval_ms: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Label, or `kv-node-N` from the node's 1-based position
    pub fn label_or_default(&self, index: usize) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("kv-node-{}", index + 1))
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.unwrap_or(DEFAULT_RETRY_INTERVAL_MS))
    }
}

/// Parses `host:port` or `label=host:port`
impl FromStr for NodeConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (label, addr) = match s.split_once('=') {
            Some((label, addr)) => (Some(label.trim()), addr.trim()),
            None => (None, s.trim()),
        };

        let endpoint: Endpoint = addr.parse()?;
        let mut node = NodeConfig::new(endpoint.host, endpoint.port);
        if let Some(label) = label.filter(|l| !l.is_empty()) {
            node = node.with_label(label);
        }
        Ok(node)
    }
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session lifetime (cookie max-age and key TTL)
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_session_prefix")]
    pub key_prefix: String,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

fn default_session_ttl() -> u64 {
    30 * 60
}
fn default_session_prefix() -> String {
    "sess:".to_string()
}
fn default_cookie_name() -> String {
    "sid".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            key_prefix: default_session_prefix(),
            cookie_name: default_cookie_name(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Login guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Attempts allowed before any delay applies
    #[serde(default = "default_free_retries")]
    pub free_retries: u32,

    /// First enforced delay
    #[serde(default = "default_min_wait")]
    pub min_wait_ms: u64,

    /// Upper bound on the enforced delay
    #[serde(default = "default_max_wait")]
    pub max_wait_ms: u64,

    #[serde(default = "default_guard_prefix")]
    pub key_prefix: String,
}

fn default_free_retries() -> u32 {
    3
}
fn default_min_wait() -> u64 {
    5 * 60 * 1000
}
fn default_max_wait() -> u64 {
    60 * 60 * 1000
}
fn default_guard_prefix() -> String {
    "bruteforce:".to_string()
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            free_retries: default_free_retries(),
            min_wait_ms: default_min_wait(),
            max_wait_ms: default_max_wait(),
            key_prefix: default_guard_prefix(),
        }
    }
}

impl GuardConfig {
    pub fn min_wait(&self) -> Duration {
        Duration::from_millis(self.min_wait_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// HTTP frontend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendConfig {
    /// Bind address for HTTP
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Run against in-process memory nodes instead of real servers
    #[serde(default)]
    pub mock: bool,

    /// Heading shown on the main page
    #[serde(default = "default_title")]
    pub title: String,
}

fn default_title() -> String {
    "sessionkv".to_string()
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            mock: false,
            title: default_title(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn two_nodes() -> ClusterConfig {
        ClusterConfig::new(vec![
            NodeConfig::new("127.0.0.1", 6379),
            NodeConfig::new("127.0.0.1", 6380),
        ])
    }

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::default();
        assert_eq!(config.settle_window(), Duration::from_millis(5000));
        assert_eq!(config.record_key, "MASTER_INFO");

        let guard = GuardConfig::default();
        assert_eq!(guard.free_retries, 3);
        assert_eq!(guard.min_wait(), Duration::from_secs(300));
        assert_eq!(guard.max_wait(), Duration::from_secs(3600));

        assert_eq!(SessionConfig::default().ttl(), Duration::from_secs(1800));
    }

    #[test]
    fn test_default_labels() {
        let node = NodeConfig::new("127.0.0.1", 6379);
        assert_eq!(node.label_or_default(0), "kv-node-1");
        assert_eq!(node.retry_interval(), Duration::from_millis(1000));

        let node = node.with_label("cache-a");
        assert_eq!(node.label_or_default(0), "cache-a");
    }

    #[test]
    fn test_validate() {
        assert!(two_nodes().validate().is_ok());
        assert!(ClusterConfig::default().validate().is_err());

        let mut dup = two_nodes();
        dup.nodes[1].port = 6379;
        assert!(dup.validate().is_err());

        let mut labels = two_nodes();
        labels.nodes[0].label = Some("kv-node-2".into());
        assert!(labels.validate().is_err());

        let mut zero = two_nodes();
        zero.nodes[0].port = 0;
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_parse_node() {
        let node: NodeConfig = "10.0.0.5:6380".parse().unwrap();
        assert_eq!(node.host, "10.0.0.5");
        assert_eq!(node.port, 6380);
        assert_eq!(node.label, None);

        let node: NodeConfig = "primary=redis:6379".parse().unwrap();
        assert_eq!(node.label.as_deref(), Some("primary"));
        assert_eq!(node.host, "redis");

        assert!("redis".parse::<NodeConfig>().is_err());
        assert!("redis:notaport".parse::<NodeConfig>().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[cluster]
settle_window_ms = 250
record_key = "primary"

[[cluster.nodes]]
host = "127.0.0.1"
port = 6379
label = "a"

[[cluster.nodes]]
host = "127.0.0.1"
port = 6380
retry_interval_ms = 200

[login_guard]
free_retries = 5
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.cluster.settle_window_ms, 250);
        assert_eq!(config.cluster.record_key, "primary");
        assert_eq!(config.cluster.nodes.len(), 2);
        assert_eq!(config.cluster.nodes[0].label.as_deref(), Some("a"));
        assert_eq!(
            config.cluster.nodes[1].retry_interval(),
            Duration::from_millis(200)
        );
        assert_eq!(config.login_guard.free_retries, 5);
        assert_eq!(config.login_guard.max_wait_ms, 3_600_000);
        assert_eq!(config.session.cookie_name, "sid");
        assert!(config.cluster.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Some(Path::new("/nonexistent/sessionkv.toml")));
        assert!(result.is_err());
    }
}
