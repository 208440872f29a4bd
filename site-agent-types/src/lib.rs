//! Domain model for the site-side control agent.
//!
//! These types are the shared vocabulary between the control-plane client,
//! the backend driver abstraction and the three reconciliation processors.
//! None of them carry any backend- or control-plane-specific wire details;
//! those live behind the respective client traits in `site-agent-core`.

mod offering;
mod offering_user;
mod order;
mod resource;
mod usage;

pub use offering::{AccountingType, Component, ComponentRemapTarget, Offering};
pub use offering_user::{OfferingUser, OfferingUserState};
pub use order::{Order, OrderState, OrderType};
pub use resource::{
    BackendResourceInfo, MarketplaceResource, ResourceState, TOTAL_ACCOUNT_USAGE,
};
pub use usage::UsageRecord;
