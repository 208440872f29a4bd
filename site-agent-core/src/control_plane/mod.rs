//! Control-plane REST abstraction (`spec.md` §6).

pub mod client;
pub mod dto;
pub mod waldur;

pub use client::ControlPlaneClient;
pub use dto::{
    CourseAccount, LastSync, OfferingDetails, OfferingUserFilter, OfferingUserPatch, OrderFilter,
    ResourceFilter, ServiceAccount, TeamMember,
};
pub use waldur::WaldurRestClient;
