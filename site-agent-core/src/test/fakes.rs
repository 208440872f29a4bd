//! Shared in-memory test doubles for `ControlPlaneClient`, `BackendDriver`
//! and `UsernameManager`, plus fixture constructors every scenario module in
//! this directory draws from. Grounded on the stateful fixture objects in
//! `examples/original_source/tests/test_processor_caching.py` and the
//! teacher's own `operator/src/test/util.rs`, which plays the same
//! shared-setup role for its own scenario modules.
//!
//! `spec.md` §9 names `BackendDriver` and `BackendClient` (and, by the same
//! reasoning on the control-plane side, `ControlPlaneClient`) as "the only
//! sanctioned test-injection points" — these fakes are plain trait
//! implementations, not mocks of internal processor state.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use site_agent_types::{
    BackendResourceInfo, Component, MarketplaceResource, Offering, OfferingUser,
    OfferingUserState, Order, OrderState, OrderType, ResourceState, UsageRecord,
};
use uuid::Uuid;

use crate::backend::{BackendDriver, OrderDecision, UserContext, UsernameManager, UsernameResult};
use crate::control_plane::{
    ControlPlaneClient, CourseAccount, OfferingDetails, OfferingUserFilter, OfferingUserPatch,
    OrderFilter, ResourceFilter, ServiceAccount, TeamMember,
};
use crate::error::Result;

// --- Fixture constructors -----------------------------------------------

pub fn fixture_offering(components: Vec<Component>) -> Offering {
    Offering {
        name: "test-offering".to_owned(),
        uuid: Uuid::new_v4(),
        api_url: String::new(),
        api_token: String::new(),
        backend_type: "fake".to_owned(),
        backend_settings: HashMap::new(),
        components: components.into_iter().map(|c| (c.name.clone(), c)).collect(),
        messaging_topic: None,
        timezone: "UTC".to_owned(),
    }
}

pub fn fixture_resource(project_uuid: Uuid) -> MarketplaceResource {
    MarketplaceResource {
        uuid: Uuid::new_v4(),
        name: "my-resource".to_owned(),
        backend_id: String::new(),
        state: ResourceState::Ok,
        limits: HashMap::new(),
        downscaled: false,
        paused: false,
        restrict_member_access: false,
        project_uuid,
        project_slug: "my-project".to_owned(),
        customer_slug: "my-customer".to_owned(),
    }
}

pub fn fixture_order(resource_uuid: Uuid) -> Order {
    Order {
        uuid: Uuid::new_v4(),
        order_type: OrderType::Create,
        state: OrderState::Executing,
        resource_uuid,
        marketplace_resource_uuid: Some(resource_uuid),
        limits: HashMap::new(),
        project_slug: "my-project".to_owned(),
        customer_slug: "my-customer".to_owned(),
        error_message: None,
        error_traceback: None,
    }
}

pub fn fixture_offering_user(
    offering_uuid: Uuid,
    username: &str,
    state: OfferingUserState,
) -> OfferingUser {
    OfferingUser {
        uuid: Uuid::new_v4(),
        user_uuid: Uuid::new_v4(),
        offering_uuid,
        username: username.to_owned(),
        state,
        restrict_member_access: false,
        comment: None,
        comment_url: None,
    }
}

// --- FakeControlPlane ----------------------------------------------------

/// Single-offering, in-memory `ControlPlaneClient`. All collections are
/// keyed by the entity's own uuid, mirroring the real REST resource shape
/// closely enough that processor logic cannot tell it apart from
/// `WaldurRestClient` short of the wire format.
#[derive(Default)]
pub struct FakeControlPlane {
    pub orders: Mutex<HashMap<Uuid, Order>>,
    pub resources: Mutex<HashMap<Uuid, MarketplaceResource>>,
    pub resource_metadata: Mutex<HashMap<Uuid, HashMap<String, String>>>,
    pub offering_users: Mutex<HashMap<Uuid, OfferingUser>>,
    pub teams: Mutex<HashMap<Uuid, Vec<TeamMember>>>,
    pub usages: Mutex<Vec<UsageRecord>>,
    pub user_component_limits: Mutex<HashMap<(Uuid, String), HashMap<String, i64>>>,
    pub service_accounts: Mutex<HashMap<Uuid, Vec<ServiceAccount>>>,
    pub course_accounts: Mutex<HashMap<Uuid, Vec<CourseAccount>>>,
    pub erred_resources: Mutex<Vec<Uuid>>,
    pub erred_orders: Mutex<Vec<Uuid>>,
    pub done_orders: Mutex<Vec<Uuid>>,
    pub set_usage_calls: Mutex<u32>,
    pub refresh_calls: Mutex<HashMap<Uuid, u32>>,
}

impl FakeControlPlane {
    pub fn insert_order(&self, order: Order) {
        self.orders.lock().unwrap().insert(order.uuid, order);
    }

    pub fn insert_resource(&self, resource: MarketplaceResource) {
        self.resources.lock().unwrap().insert(resource.uuid, resource);
    }

    pub fn insert_offering_user(&self, user: OfferingUser) {
        self.offering_users.lock().unwrap().insert(user.uuid, user);
    }

    pub fn set_team(&self, resource_uuid: Uuid, team: Vec<TeamMember>) {
        self.teams.lock().unwrap().insert(resource_uuid, team);
    }

    pub fn order(&self, uuid: Uuid) -> Order {
        self.orders.lock().unwrap().get(&uuid).cloned().expect("order fixture missing")
    }

    pub fn resource(&self, uuid: Uuid) -> MarketplaceResource {
        self.resources.lock().unwrap().get(&uuid).cloned().expect("resource fixture missing")
    }

    pub fn offering_user(&self, uuid: Uuid) -> OfferingUser {
        self.offering_users
            .lock()
            .unwrap()
            .get(&uuid)
            .cloned()
            .expect("offering user fixture missing")
    }
}

#[async_trait]
impl ControlPlaneClient for FakeControlPlane {
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| filter.states.is_empty() || filter.states.contains(&o.state))
            .cloned()
            .collect())
    }

    async fn get_order(&self, uuid: Uuid) -> Result<Order> {
        Ok(self.order(uuid))
    }

    async fn approve_order_by_provider(&self, uuid: Uuid) -> Result<()> {
        self.orders.lock().unwrap().get_mut(&uuid).unwrap().state = OrderState::Executing;
        Ok(())
    }

    async fn reject_order_by_provider(&self, uuid: Uuid) -> Result<()> {
        self.orders.lock().unwrap().get_mut(&uuid).unwrap().state = OrderState::Rejected;
        Ok(())
    }

    async fn set_order_done(&self, uuid: Uuid) -> Result<()> {
        self.orders.lock().unwrap().get_mut(&uuid).unwrap().state = OrderState::Done;
        self.done_orders.lock().unwrap().push(uuid);
        Ok(())
    }

    async fn set_order_erred(&self, uuid: Uuid, _message: &str, _traceback: &str) -> Result<()> {
        self.orders.lock().unwrap().get_mut(&uuid).unwrap().state = OrderState::Erred;
        self.erred_orders.lock().unwrap().push(uuid);
        Ok(())
    }

    async fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<MarketplaceResource>> {
        Ok(self
            .resources
            .lock()
            .unwrap()
            .values()
            .filter(|r| filter.states.is_empty() || filter.states.contains(&r.state))
            .cloned()
            .collect())
    }

    async fn get_resource(&self, uuid: Uuid) -> Result<MarketplaceResource> {
        Ok(self.resource(uuid))
    }

    async fn set_resource_backend_id(&self, uuid: Uuid, backend_id: &str) -> Result<()> {
        self.resources.lock().unwrap().get_mut(&uuid).unwrap().backend_id = backend_id.to_owned();
        Ok(())
    }

    async fn set_resource_backend_metadata(
        &self,
        uuid: Uuid,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        self.resource_metadata.lock().unwrap().insert(uuid, metadata.clone());
        Ok(())
    }

    async fn set_resource_limits(&self, uuid: Uuid, limits: &HashMap<String, i64>) -> Result<()> {
        self.resources.lock().unwrap().get_mut(&uuid).unwrap().limits = limits.clone();
        Ok(())
    }

    async fn set_resource_as_ok(&self, uuid: Uuid) -> Result<()> {
        self.resources.lock().unwrap().get_mut(&uuid).unwrap().state = ResourceState::Ok;
        Ok(())
    }

    async fn set_resource_as_erred(
        &self,
        uuid: Uuid,
        _message: &str,
        _traceback: &str,
    ) -> Result<()> {
        self.resources.lock().unwrap().get_mut(&uuid).unwrap().state = ResourceState::Erred;
        self.erred_resources.lock().unwrap().push(uuid);
        Ok(())
    }

    async fn refresh_resource_last_sync(&self, uuid: Uuid) -> Result<()> {
        *self.refresh_calls.lock().unwrap().entry(uuid).or_insert(0) += 1;
        Ok(())
    }

    async fn get_resource_team(&self, uuid: Uuid) -> Result<Vec<TeamMember>> {
        Ok(self.teams.lock().unwrap().get(&uuid).cloned().unwrap_or_default())
    }

    async fn list_offering_users(&self, filter: &OfferingUserFilter) -> Result<Vec<OfferingUser>> {
        Ok(self
            .offering_users
            .lock()
            .unwrap()
            .values()
            .filter(|u| {
                filter.offering_uuid.map_or(true, |v| v == u.offering_uuid)
                    && filter.username.as_deref().map_or(true, |v| v == u.username)
                    && filter.user_uuid.map_or(true, |v| v == u.user_uuid)
                    && filter
                        .restrict_member_access
                        .map_or(true, |v| v == u.restrict_member_access)
            })
            .cloned()
            .collect())
    }

    async fn patch_offering_user(&self, uuid: Uuid, patch: &OfferingUserPatch) -> Result<()> {
        let mut users = self.offering_users.lock().unwrap();
        let user = users.get_mut(&uuid).unwrap();
        if let Some(username) = &patch.username {
            user.username = username.clone();
        }
        if let Some(comment) = &patch.comment {
            user.comment = Some(comment.clone());
        }
        if let Some(comment_url) = &patch.comment_url {
            user.comment_url = Some(comment_url.clone());
        }
        Ok(())
    }

    async fn set_offering_user_creating(&self, uuid: Uuid) -> Result<()> {
        self.offering_users.lock().unwrap().get_mut(&uuid).unwrap().state = OfferingUserState::Creating;
        Ok(())
    }

    async fn set_offering_user_ok(&self, uuid: Uuid, username: &str) -> Result<()> {
        let mut users = self.offering_users.lock().unwrap();
        let user = users.get_mut(&uuid).unwrap();
        user.state = OfferingUserState::Ok;
        user.username = username.to_owned();
        Ok(())
    }

    async fn set_offering_user_pending_account_linking(
        &self,
        uuid: Uuid,
        comment: &str,
        comment_url: Option<&str>,
    ) -> Result<()> {
        let mut users = self.offering_users.lock().unwrap();
        let user = users.get_mut(&uuid).unwrap();
        user.state = OfferingUserState::PendingAccountLinking;
        user.comment = Some(comment.to_owned());
        user.comment_url = comment_url.map(str::to_owned);
        Ok(())
    }

    async fn set_offering_user_pending_additional_validation(
        &self,
        uuid: Uuid,
        comment: &str,
        comment_url: Option<&str>,
    ) -> Result<()> {
        let mut users = self.offering_users.lock().unwrap();
        let user = users.get_mut(&uuid).unwrap();
        user.state = OfferingUserState::PendingAdditionalValidation;
        user.comment = Some(comment.to_owned());
        user.comment_url = comment_url.map(str::to_owned);
        Ok(())
    }

    async fn list_component_usages(
        &self,
        resource_uuid: Uuid,
        period: NaiveDate,
    ) -> Result<Vec<UsageRecord>> {
        Ok(self
            .usages
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.resource_uuid == resource_uuid && r.billing_period == period)
            .cloned()
            .collect())
    }

    async fn set_usage(&self, records: &[UsageRecord]) -> Result<()> {
        *self.set_usage_calls.lock().unwrap() += 1;
        let mut usages = self.usages.lock().unwrap();
        for record in records {
            let existing = usages.iter_mut().find(|r| {
                r.resource_uuid == record.resource_uuid
                    && r.component == record.component
                    && r.billing_period == record.billing_period
                    && r.username.is_none()
            });
            match existing {
                Some(slot) => slot.amount = record.amount,
                None => {
                    let mut stored = record.clone();
                    stored.uuid = Some(Uuid::new_v4());
                    usages.push(stored);
                }
            }
        }
        Ok(())
    }

    async fn set_user_usage(&self, record: &UsageRecord) -> Result<()> {
        let mut usages = self.usages.lock().unwrap();
        let existing = usages.iter_mut().find(|r| {
            r.resource_uuid == record.resource_uuid
                && r.component == record.component
                && r.billing_period == record.billing_period
                && r.username == record.username
        });
        match existing {
            Some(slot) => slot.amount = record.amount,
            None => {
                let mut stored = record.clone();
                stored.uuid = Some(Uuid::new_v4());
                usages.push(stored);
            }
        }
        Ok(())
    }

    async fn list_user_usages(
        &self,
        resource_uuid: Uuid,
        period: NaiveDate,
    ) -> Result<Vec<UsageRecord>> {
        Ok(self
            .usages
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.resource_uuid == resource_uuid && r.billing_period == period && r.username.is_some()
            })
            .cloned()
            .collect())
    }

    async fn list_user_component_limits(
        &self,
        resource_uuid: Uuid,
        username: &str,
    ) -> Result<HashMap<String, i64>> {
        Ok(self
            .user_component_limits
            .lock()
            .unwrap()
            .get(&(resource_uuid, username.to_owned()))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_service_accounts(&self, project_uuid: Uuid) -> Result<Vec<ServiceAccount>> {
        Ok(self
            .service_accounts
            .lock()
            .unwrap()
            .get(&project_uuid)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_course_accounts(&self, project_uuid: Uuid) -> Result<Vec<CourseAccount>> {
        Ok(self
            .course_accounts
            .lock()
            .unwrap()
            .get(&project_uuid)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_offering_details(&self, uuid: Uuid) -> Result<OfferingDetails> {
        Ok(OfferingDetails {
            uuid,
            name: "test-offering".to_owned(),
            components: HashMap::new(),
            plugin_options: HashMap::new(),
        })
    }
}

// --- FakeBackendDriver ----------------------------------------------------

/// In-memory `BackendDriver`. Backend resources are keyed by `backend_id`,
/// the same identifier the core treats as opaque.
#[derive(Default)]
pub struct FakeBackendDriver {
    pub components: HashMap<String, Component>,
    pub resources: Mutex<HashMap<String, BackendResourceInfo>>,
    pub user_limits: Mutex<HashMap<String, HashMap<String, HashMap<String, i64>>>>,
    pub metadata: Mutex<HashMap<String, HashMap<String, String>>>,
    pub pending_decision: Mutex<Option<OrderDecision>>,
    pub add_users_calls: Mutex<u32>,
}

impl FakeBackendDriver {
    pub fn insert_resource(&self, info: BackendResourceInfo) {
        self.resources.lock().unwrap().insert(info.backend_id.clone(), info);
    }

    pub fn resource(&self, backend_id: &str) -> Option<BackendResourceInfo> {
        self.resources.lock().unwrap().get(backend_id).cloned()
    }
}

#[async_trait]
impl BackendDriver for FakeBackendDriver {
    fn backend_type(&self) -> &str {
        "fake"
    }

    async fn ping(&self, _raise: bool) -> Result<bool> {
        Ok(true)
    }

    fn list_components(&self) -> &HashMap<String, Component> {
        &self.components
    }

    async fn create_resource(
        &self,
        _resource: &MarketplaceResource,
        resource_name_base: &str,
        _user_context: Option<&UserContext>,
    ) -> Result<BackendResourceInfo> {
        let mut resources = self.resources.lock().unwrap();
        let backend_id = format!("alloc_{resource_name_base}");
        let info = resources.entry(backend_id.clone()).or_insert_with(|| BackendResourceInfo {
            backend_id: backend_id.clone(),
            ..Default::default()
        });
        Ok(info.clone())
    }

    async fn delete_resource(&self, backend_id: &str) -> Result<()> {
        self.resources.lock().unwrap().remove(backend_id);
        Ok(())
    }

    async fn pull_resource(&self, backend_id: &str) -> Result<Option<BackendResourceInfo>> {
        Ok(self.resources.lock().unwrap().get(backend_id).cloned())
    }

    async fn get_usage_report(
        &self,
        _backend_ids: &[String],
    ) -> Result<HashMap<String, HashMap<String, HashMap<String, Decimal>>>> {
        Ok(HashMap::new())
    }

    async fn set_resource_limits(
        &self,
        backend_id: &str,
        limits: &HashMap<String, i64>,
    ) -> Result<()> {
        if let Some(info) = self.resources.lock().unwrap().get_mut(backend_id) {
            info.limits = limits.clone();
        }
        Ok(())
    }

    async fn get_resource_limits(&self, backend_id: &str) -> Result<HashMap<String, i64>> {
        Ok(self
            .resources
            .lock()
            .unwrap()
            .get(backend_id)
            .map(|info| info.limits.clone())
            .unwrap_or_default())
    }

    async fn get_resource_user_limits(
        &self,
        backend_id: &str,
    ) -> Result<HashMap<String, HashMap<String, i64>>> {
        Ok(self.user_limits.lock().unwrap().get(backend_id).cloned().unwrap_or_default())
    }

    async fn set_resource_user_limits(
        &self,
        backend_id: &str,
        username: &str,
        limits: &HashMap<String, i64>,
    ) -> Result<()> {
        let mut all = self.user_limits.lock().unwrap();
        let entry = all.entry(backend_id.to_owned()).or_default();
        if limits.is_empty() {
            entry.remove(username);
        } else {
            entry.insert(username.to_owned(), limits.clone());
        }
        Ok(())
    }

    async fn add_users_to_resource(
        &self,
        backend_id: &str,
        usernames: &std::collections::HashSet<String>,
    ) -> Result<std::collections::HashSet<String>> {
        *self.add_users_calls.lock().unwrap() += 1;
        let mut resources = self.resources.lock().unwrap();
        let info = resources.entry(backend_id.to_owned()).or_insert_with(|| BackendResourceInfo {
            backend_id: backend_id.to_owned(),
            ..Default::default()
        });
        for username in usernames {
            if !info.users.contains(username) {
                info.users.push(username.clone());
            }
        }
        Ok(usernames.clone())
    }

    async fn remove_users_from_resource(
        &self,
        backend_id: &str,
        usernames: &std::collections::HashSet<String>,
    ) -> Result<Vec<String>> {
        let mut resources = self.resources.lock().unwrap();
        let Some(info) = resources.get_mut(backend_id) else {
            return Ok(Vec::new());
        };
        info.users.retain(|u| !usernames.contains(u));
        Ok(usernames.iter().cloned().collect())
    }

    async fn get_resource_metadata(&self, backend_id: &str) -> Result<HashMap<String, String>> {
        Ok(self.metadata.lock().unwrap().get(backend_id).cloned().unwrap_or_default())
    }

    async fn evaluate_pending_order(&self, _order: &Order) -> Result<OrderDecision> {
        Ok(self.pending_decision.lock().unwrap().unwrap_or(OrderDecision::Accept))
    }
}

// --- FakeUsernameManager --------------------------------------------------

/// Scripted `UsernameManager`: returns `UsernameResult::Ok(user_uuid)` by
/// default (the same fallback `PassthroughUsernameManager` uses), or a
/// scripted outcome keyed by offering-user uuid.
#[derive(Default)]
pub struct FakeUsernameManager {
    pub scripted: Mutex<HashMap<Uuid, UsernameResult>>,
}

impl FakeUsernameManager {
    pub fn script(&self, offering_user_uuid: Uuid, result: UsernameResult) {
        self.scripted.lock().unwrap().insert(offering_user_uuid, result);
    }
}

#[async_trait]
impl UsernameManager for FakeUsernameManager {
    async fn get_username(&self, _offering_user: &OfferingUser) -> Result<Option<String>> {
        Ok(None)
    }

    async fn generate_username(&self, offering_user: &OfferingUser) -> Result<UsernameResult> {
        Ok(self
            .scripted
            .lock()
            .unwrap()
            .get(&offering_user.uuid)
            .cloned()
            .unwrap_or_else(|| UsernameResult::Ok(offering_user.user_uuid.to_string())))
    }
}
