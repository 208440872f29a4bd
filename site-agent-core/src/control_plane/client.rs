//! Control-plane REST surface as consumed by the core (`spec.md` §6).
//!
//! Grounded on the operation set `waldur_site_agent/common/processors.py`
//! calls through its generated `waldur_api_client` bindings (order
//! list/retrieve/approve/reject/set-state-*, resource
//! list/retrieve/set-backend-id/set-limits/set-as-ok/set-as-erred/team-list,
//! offering-user list/patch/set-*, component-usage list/set-usage/
//! set-user-usage/list-user-usages, service/course account list). The trait
//! is the seam concrete control-plane clients (Waldur REST, or a test
//! double) implement; `spec.md` §9 calls out the BackendDriver/BackendClient
//! interfaces as the only sanctioned test-injection points, and this trait
//! plays the same role on the control-plane side.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use site_agent_types::{MarketplaceResource, OfferingUser, Order, UsageRecord};
use uuid::Uuid;

use crate::control_plane::dto::{
    CourseAccount, OfferingDetails, OfferingUserFilter, OfferingUserPatch, OrderFilter,
    ResourceFilter, ServiceAccount, TeamMember,
};
use crate::error::Result;

#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    // --- Orders ---------------------------------------------------------
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>>;
    async fn get_order(&self, uuid: Uuid) -> Result<Order>;
    async fn approve_order_by_provider(&self, uuid: Uuid) -> Result<()>;
    async fn reject_order_by_provider(&self, uuid: Uuid) -> Result<()>;
    async fn set_order_done(&self, uuid: Uuid) -> Result<()>;
    async fn set_order_erred(&self, uuid: Uuid, message: &str, traceback: &str) -> Result<()>;

    // --- Resources --------------------------------------------------------
    async fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<MarketplaceResource>>;
    async fn get_resource(&self, uuid: Uuid) -> Result<MarketplaceResource>;
    async fn set_resource_backend_id(&self, uuid: Uuid, backend_id: &str) -> Result<()>;
    async fn set_resource_backend_metadata(
        &self,
        uuid: Uuid,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;
    async fn set_resource_limits(&self, uuid: Uuid, limits: &HashMap<String, i64>) -> Result<()>;
    async fn set_resource_as_ok(&self, uuid: Uuid) -> Result<()>;
    async fn set_resource_as_erred(&self, uuid: Uuid, message: &str, traceback: &str)
        -> Result<()>;
    async fn refresh_resource_last_sync(&self, uuid: Uuid) -> Result<()>;
    async fn get_resource_team(&self, uuid: Uuid) -> Result<Vec<TeamMember>>;

    // --- Offering users -----------------------------------------------
    async fn list_offering_users(&self, filter: &OfferingUserFilter) -> Result<Vec<OfferingUser>>;
    async fn patch_offering_user(&self, uuid: Uuid, patch: &OfferingUserPatch) -> Result<()>;
    async fn set_offering_user_creating(&self, uuid: Uuid) -> Result<()>;
    async fn set_offering_user_ok(&self, uuid: Uuid, username: &str) -> Result<()>;
    async fn set_offering_user_pending_account_linking(
        &self,
        uuid: Uuid,
        comment: &str,
        comment_url: Option<&str>,
    ) -> Result<()>;
    async fn set_offering_user_pending_additional_validation(
        &self,
        uuid: Uuid,
        comment: &str,
        comment_url: Option<&str>,
    ) -> Result<()>;

    // --- Component usages -------------------------------------------------
    async fn list_component_usages(
        &self,
        resource_uuid: Uuid,
        period: NaiveDate,
    ) -> Result<Vec<UsageRecord>>;
    /// Batched write of resource-total usage records (`spec.md` §4.7 step 4:
    /// "Submit total usage as a single batched write").
    async fn set_usage(&self, records: &[UsageRecord]) -> Result<()>;
    async fn set_user_usage(&self, record: &UsageRecord) -> Result<()>;
    async fn list_user_usages(
        &self,
        resource_uuid: Uuid,
        period: NaiveDate,
    ) -> Result<Vec<UsageRecord>>;

    /// Per-component limit overrides a project admin set for one user on
    /// one resource, keyed by component (`spec.md` §4.6 step 7). Distinct
    /// from usage records: this is a cap, not a consumption reading.
    async fn list_user_component_limits(
        &self,
        resource_uuid: Uuid,
        username: &str,
    ) -> Result<HashMap<String, i64>>;

    // --- Service / course accounts ---------------------------------------
    async fn list_service_accounts(&self, project_uuid: Uuid) -> Result<Vec<ServiceAccount>>;
    async fn list_course_accounts(&self, project_uuid: Uuid) -> Result<Vec<CourseAccount>>;

    // --- Offering details -------------------------------------------------
    async fn get_offering_details(&self, uuid: Uuid) -> Result<OfferingDetails>;
}
