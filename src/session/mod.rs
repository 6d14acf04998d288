//! Resources bound to the current primary
//!
//! - [`ResourceFactory`]: makes a fresh binding on request
//! - [`BoundResources`]: generation-tagged cell the HTTP layer reads from
//! - [`SessionStore`] and [`LoginGuard`]: the bound resources themselves

pub mod binding;
pub mod factory;
pub mod guard;
pub mod store;

pub use binding::{Binding, BoundResources};
pub use factory::ResourceFactory;
pub use guard::{AttemptRecord, GuardDecision, LoginGuard};
pub use store::{SessionData, SessionStore};
