//! Error types for sessionkv

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Node Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Command rejected by {node}: {reason}")]
    Command { node: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] crate::resp::ProtocolError),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Coordination Errors ===
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Degraded cluster: no node holds the primary role")]
    DegradedCluster,

    #[error("Replica reattach failed on {node}: {reason}")]
    ReplicaReattach { node: String, reason: String },

    #[error("Cluster already started")]
    AlreadyStarted,

    // === Binding Errors ===
    #[error("Stale binding: {0} is no longer primary")]
    StaleBinding(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    // === Serialization ===
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    ///
    /// Retryable errors mean the bound node went away or lost its role;
    /// the caller should rebind against the current primary and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Timeout(_)
                | Error::ConnectionFailed(_)
                | Error::DegradedCluster
                | Error::StaleBinding(_)
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::DegradedCluster
            | Error::StaleBinding(_)
            | Error::ConnectionFailed(_)
            | Error::Io(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}
