use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-resource, per-component, per-billing-period usage tuple. At most one
/// record per `(resource, component, period)` exists on the control plane
/// (`spec.md` §3); a strictly decreasing resubmission is an anomaly (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// The control plane's own identifier for this record. `None` for a
    /// record being constructed locally for submission; always `Some` on a
    /// record returned from a listing call.
    #[serde(default)]
    pub uuid: Option<Uuid>,

    pub resource_uuid: Uuid,
    pub component: String,

    /// First day of the billing period this record covers.
    pub billing_period: NaiveDate,

    pub amount: Decimal,

    /// Username this record is scoped to, or `None` for the resource total.
    pub username: Option<String>,
}
