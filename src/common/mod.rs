//! Common utilities and types shared across sessionkv

pub mod config;
pub mod error;
pub mod utils;

pub use config::{
    ClusterConfig, Config, FrontendConfig, GuardConfig, NodeConfig, SessionConfig,
};
pub use error::{Error, Result};
pub use utils::{timestamp_now_millis, with_deadline};
