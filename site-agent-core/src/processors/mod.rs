//! The three reconciliation lanes (`spec.md` §4.5-4.7): orders, membership,
//! usage reports. Each processor owns one [`site_agent_types::Offering`] and
//! is driven by the supervisor on its own polling/event cadence.

mod membership;
mod order;
mod report;

pub use membership::MembershipProcessor;
pub use order::OrderProcessor;
pub use report::ReportProcessor;
