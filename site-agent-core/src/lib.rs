//! Reconciliation core for the site-side control agent.
//!
//! Wires together the backend abstraction (`backend`), the control-plane
//! client (`control_plane`), the three reconciliation lanes (`processors`),
//! per-cycle memoization (`cache`), billing-period arithmetic (`billing`),
//! event-driven dispatch (`events`), the offering supervisor
//! (`supervisor`), configuration (`config`), metrics and the shared error
//! type. See `site-agent-types` for the domain model these modules operate
//! on.

pub mod backend;
pub mod billing;
pub mod cache;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod events;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod processors;
pub mod supervisor;

#[cfg(test)]
mod test;

pub use error::{Error, Result};
