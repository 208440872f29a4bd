use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved usage-map key that always carries the resource's total
/// consumption, zero-valued when the backend has no data yet.
/// See `spec.md` §3 (`BackendResourceInfo`) and §4.1 (`pull_resource`).
pub const TOTAL_ACCOUNT_USAGE: &str = "TOTAL_ACCOUNT_USAGE";

/// Lifecycle state of a [`MarketplaceResource`] as tracked by the control
/// plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    Creating,
    #[serde(rename = "OK")]
    Ok,
    Updating,
    Erred,
    Terminating,
    Terminated,
}

/// The core's view of a resource as seen from the control plane. Immutable
/// snapshot for the duration of one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceResource {
    pub uuid: Uuid,
    pub name: String,
    pub backend_id: String,
    pub state: ResourceState,
    pub limits: HashMap<String, i64>,
    pub downscaled: bool,
    pub paused: bool,
    pub restrict_member_access: bool,
    pub project_uuid: Uuid,
    pub project_slug: String,
    pub customer_slug: String,
}

impl MarketplaceResource {
    /// Whether this resource has already been assigned a non-empty backend
    /// identifier (used by `OrderProcessor` to establish create idempotency).
    pub fn has_backend_id(&self) -> bool {
        !self.backend_id.trim().is_empty()
    }
}

/// The core's view of what the backend currently reports for one resource.
/// Produced only by driver reads (`BackendDriver::pull_resource`); never
/// mutated by the core directly.
///
/// `usage` is keyed first by "who", then by component: the reserved
/// [`TOTAL_ACCOUNT_USAGE`] key always carries the resource-wide total, and
/// any other top-level key is a backend username carrying that user's
/// component breakdown (`spec.md` §4.7 step 5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendResourceInfo {
    pub backend_id: String,
    pub users: Vec<String>,
    pub usage: HashMap<String, HashMap<String, Decimal>>,
    pub limits: HashMap<String, i64>,
    pub parent_id: Option<String>,
}

impl BackendResourceInfo {
    /// Per-username usage breakdowns, excluding the reserved total-usage
    /// entry. Backends that can't attribute usage to a specific user simply
    /// never populate these entries.
    pub fn per_user_usage(&self) -> impl Iterator<Item = (&String, &HashMap<String, Decimal>)> {
        self.usage
            .iter()
            .filter(|(key, _)| key.as_str() != TOTAL_ACCOUNT_USAGE)
    }

    pub fn total_usage(&self) -> HashMap<String, Decimal> {
        self.usage.get(TOTAL_ACCOUNT_USAGE).cloned().unwrap_or_default()
    }
}
