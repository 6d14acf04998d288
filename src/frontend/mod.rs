//! Web frontend storing its sessions on the cluster primary

pub mod http;
pub mod middleware;
pub mod server;

pub use http::{create_router, FrontendState};
pub use middleware::{session_middleware, with_session_store, Session};
pub use server::Frontend;
