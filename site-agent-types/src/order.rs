use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Create,
    Update,
    Terminate,
}

/// Lifecycle state of an [`Order`]. `spec.md` §3: Create orders may carry a
/// blank `marketplace_resource_uuid` transiently while in `Executing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    PendingProvider,
    Executing,
    Done,
    Erred,
    Rejected,
}

impl OrderState {
    /// Orders in these two states are the only ones `OrderProcessor` polls
    /// for (`spec.md` §4.5 step 1). Any other state reaching the processor
    /// is defensive: log and skip.
    pub fn is_actionable(self) -> bool {
        matches!(self, OrderState::PendingProvider | OrderState::Executing)
    }
}

/// A control-plane directive to create, update or terminate a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub uuid: Uuid,
    pub order_type: OrderType,
    pub state: OrderState,
    pub resource_uuid: Uuid,

    /// Populated only once the backing resource has been created on the
    /// control plane; empty for a brand-new `Create` order until then.
    pub marketplace_resource_uuid: Option<Uuid>,

    /// New limits requested by an `Update` order (control-plane units).
    pub limits: HashMap<String, i64>,

    pub project_slug: String,
    pub customer_slug: String,

    pub error_message: Option<String>,
    pub error_traceback: Option<String>,
}
