//! `OrderProcessor`: reconciles control-plane orders against the backend
//! (`spec.md` §4.5).
//!
//! Grounded on `examples/original_source/waldur_site_agent/common/processors.py`'s
//! `OfferingOrderProcessor` — `process_offering`, `process_order_with_retries`
//! (10 attempts, 5 s fixed delay), `process_order` (approve/reject branch,
//! dispatch by `order.type_`), `_process_create_order` (4-attempt, 5 s poll
//! for `marketplace_resource_uuid`), `_create_resource`,
//! `_fetch_user_context_for_resource`, `_add_users_to_resource`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use site_agent_types::{Order, OrderState, OrderType};
use uuid::Uuid;

use crate::backend::{mapper, BackendDriver, OrderDecision, UserContext, UsernameManager, UsernameResult};
use crate::control_plane::{ControlPlaneClient, OfferingUserFilter, OfferingUserPatch, OrderFilter};
use crate::error::{Error, Result};

/// `process_order_with_retries` retry budget in the source: 10 attempts,
/// fixed 5 s delay.
const ORDER_RETRY_ATTEMPTS: u32 = 10;
const ORDER_RETRY_DELAY: Duration = Duration::from_secs(5);

/// `_process_create_order`'s bounded poll for `marketplace_resource_uuid`:
/// 4 attempts, 5 s apart.
const CREATE_POLL_ATTEMPTS: u32 = 4;
const CREATE_POLL_DELAY: Duration = Duration::from_secs(5);

pub struct OrderProcessor {
    pub offering: site_agent_types::Offering,
    pub control: Arc<dyn ControlPlaneClient>,
    pub driver: Arc<dyn BackendDriver>,
    pub username_manager: Arc<dyn UsernameManager>,
}

impl OrderProcessor {
    pub fn new(
        offering: site_agent_types::Offering,
        control: Arc<dyn ControlPlaneClient>,
        driver: Arc<dyn BackendDriver>,
        username_manager: Arc<dyn UsernameManager>,
    ) -> Self {
        OrderProcessor {
            offering,
            control,
            driver,
            username_manager,
        }
    }

    /// `spec.md` §4.5 step 1-2: fetch pending-provider/executing orders,
    /// process each sequentially in listing order with the per-order retry
    /// wrapper.
    pub async fn process_offering(&self) -> Result<()> {
        let orders = self
            .control
            .list_orders(&OrderFilter {
                offering_uuid: Some(self.offering.uuid),
                states: vec![OrderState::PendingProvider, OrderState::Executing],
            })
            .await?;

        for order in orders {
            if let Err(err) = self.process_order_with_retries(order.uuid).await {
                tracing::error!(order_uuid = %order.uuid, error = %err, "order processing failed after retries");
            }
        }
        Ok(())
    }

    async fn process_order_with_retries(&self, order_uuid: Uuid) -> Result<()> {
        let mut last_err = None;
        for attempt in 0..ORDER_RETRY_ATTEMPTS {
            let order = match self.control.get_order(order_uuid).await {
                Ok(order) => order,
                Err(err) => {
                    last_err = Some(err);
                    tokio::time::sleep(ORDER_RETRY_DELAY).await;
                    continue;
                }
            };
            match self.process_order(order).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt + 1 < ORDER_RETRY_ATTEMPTS => {
                    tracing::info!(order_uuid = %order_uuid, attempt, "retrying order processing");
                    last_err = Some(err);
                    tokio::time::sleep(ORDER_RETRY_DELAY).await;
                }
                Err(err) => {
                    let _ = self
                        .control
                        .set_order_erred(order_uuid, &err.to_string(), "")
                        .await;
                    return Err(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            Error::TransientBackend(format!("exhausted retries processing order {order_uuid}"))
        }))
    }

    /// `spec.md` §4.5 step 3-5.
    async fn process_order(&self, mut order: Order) -> Result<()> {
        match order.state {
            OrderState::Executing => {}
            OrderState::PendingProvider => match self.driver.evaluate_pending_order(&order).await? {
                OrderDecision::Accept => {
                    self.control.approve_order_by_provider(order.uuid).await?;
                    order = self.control.get_order(order.uuid).await?;
                }
                OrderDecision::Reject => {
                    self.control.reject_order_by_provider(order.uuid).await?;
                    return Ok(());
                }
                OrderDecision::Pending => return Ok(()),
            },
            _ => {
                tracing::warn!(order_uuid = %order.uuid, state = ?order.state, "order in unexpected state, skipping");
                return Ok(());
            }
        }

        let done = match order.order_type {
            OrderType::Create => self.process_create_order(&order).await?,
            OrderType::Update => self.process_update_order(&order).await?,
            OrderType::Terminate => self.process_terminate_order(&order).await?,
        };

        if done {
            self.control.set_order_done(order.uuid).await?;
        } else {
            tracing::warn!(order_uuid = %order.uuid, "order processing did not complete this pass");
        }
        Ok(())
    }

    /// `spec.md` §4.5 step 4, Create.
    async fn process_create_order(&self, order: &Order) -> Result<bool> {
        let mut current = order.clone();
        let mut attempts = 0;
        while current.marketplace_resource_uuid.is_none() {
            if attempts >= CREATE_POLL_ATTEMPTS {
                tracing::error!(order_uuid = %order.uuid, "order processing timed out waiting for resource uuid");
                return Ok(false);
            }
            if current.state != OrderState::Executing {
                tracing::error!(order_uuid = %order.uuid, state = ?current.state, "order has unexpected state while awaiting resource creation");
                return Ok(false);
            }
            tokio::time::sleep(CREATE_POLL_DELAY).await;
            current = self.control.get_order(order.uuid).await?;
            attempts += 1;
        }

        let resource_uuid = current
            .marketplace_resource_uuid
            .expect("checked non-none above");
        let resource = self.control.get_resource(resource_uuid).await?;
        let user_context = self.fetch_user_context_for_resource(resource_uuid).await;

        let backend_id = if resource.has_backend_id()
            && self.driver.pull_resource(&resource.backend_id).await?.is_some()
        {
            resource.backend_id.clone()
        } else {
            let name_base = if resource.project_slug.is_empty() {
                resource.name.clone()
            } else {
                resource.project_slug.clone()
            };
            let info = self
                .driver
                .create_resource(&resource, &name_base, Some(&user_context))
                .await?;
            if info.backend_id.is_empty() {
                return Err(Error::PermanentBackend(format!(
                    "unable to create a backend resource for offering {}",
                    self.offering.name
                )));
            }
            self.control
                .set_resource_backend_id(resource.uuid, &info.backend_id)
                .await?;
            info.backend_id
        };

        self.add_users_to_resource(&backend_id, &user_context).await?;
        Ok(true)
    }

    /// `spec.md` §4.5 step 4, Update.
    async fn process_update_order(&self, order: &Order) -> Result<bool> {
        let resource_uuid = match order.marketplace_resource_uuid {
            Some(uuid) => uuid,
            None => order.resource_uuid,
        };
        let resource = self.control.get_resource(resource_uuid).await?;
        let backend_limits = mapper::convert_limits_to_backend(&self.offering, &order.limits);
        self.driver
            .set_resource_limits(&resource.backend_id, &backend_limits)
            .await?;
        Ok(true)
    }

    /// `spec.md` §4.5 step 4, Terminate.
    async fn process_terminate_order(&self, order: &Order) -> Result<bool> {
        let resource_uuid = match order.marketplace_resource_uuid {
            Some(uuid) => uuid,
            None => order.resource_uuid,
        };
        let resource = self.control.get_resource(resource_uuid).await?;
        self.driver.delete_resource(&resource.backend_id).await?;
        Ok(true)
    }

    /// `spec.md` §4.5 step 4: "assemble the user context (team + offering
    /// users + mapping tables)". Grounded on
    /// `_fetch_user_context_for_resource`, which swallows fetch failures and
    /// degrades to an empty context rather than failing the whole order.
    async fn fetch_user_context_for_resource(&self, resource_uuid: Uuid) -> UserContext {
        let team = match self.control.get_resource_team(resource_uuid).await {
            Ok(team) => team,
            Err(err) => {
                tracing::warn!(resource_uuid = %resource_uuid, error = %err, "failed to fetch team for resource");
                return UserContext::default();
            }
        };
        let team_user_uuids: HashSet<Uuid> = team.iter().map(|m| m.user_uuid).collect();

        let offering_users = self
            .control
            .list_offering_users(&OfferingUserFilter {
                offering_uuid: Some(self.offering.uuid),
                restrict_member_access: Some(false),
                ..Default::default()
            })
            .await
            .unwrap_or_default();

        let offering_users_by_user_uuid = offering_users
            .into_iter()
            .filter(|u| team_user_uuids.contains(&u.user_uuid))
            .map(|u| (u.user_uuid, u))
            .collect();

        UserContext {
            team_usernames: team.into_iter().map(|m| m.username).collect(),
            offering_users_by_user_uuid,
        }
    }

    /// `spec.md` §4.5 step 4: "invoke `add_users_to_resource`". Grounded on
    /// `_add_users_to_resource`, which first resolves blank usernames via the
    /// `UsernameManager` before filtering to the non-blank set.
    async fn add_users_to_resource(&self, backend_id: &str, context: &UserContext) -> Result<()> {
        let mut usernames = HashSet::new();
        for offering_user in context.offering_users_by_user_uuid.values() {
            if offering_user.has_username() {
                usernames.insert(offering_user.username.clone());
                continue;
            }
            let _ = self.control.set_offering_user_creating(offering_user.uuid).await;
            match self.username_manager.get_or_create_username(offering_user).await? {
                UsernameResult::Ok(username) => {
                    usernames.insert(username.clone());
                    let _ = self
                        .control
                        .patch_offering_user(
                            offering_user.uuid,
                            &OfferingUserPatch {
                                username: Some(username.clone()),
                                ..Default::default()
                            },
                        )
                        .await;
                    let _ = self
                        .control
                        .set_offering_user_ok(offering_user.uuid, &username)
                        .await;
                }
                UsernameResult::NeedsLinking { message, url } => {
                    self.control
                        .set_offering_user_pending_account_linking(
                            offering_user.uuid,
                            &message,
                            url.as_deref(),
                        )
                        .await?;
                }
                UsernameResult::NeedsValidation { message, url } => {
                    self.control
                        .set_offering_user_pending_additional_validation(
                            offering_user.uuid,
                            &message,
                            url.as_deref(),
                        )
                        .await?;
                }
                UsernameResult::Error(cause) => {
                    tracing::warn!(offering_user = %offering_user.uuid, cause = %cause, "username generation failed");
                }
            }
        }

        if usernames.is_empty() {
            tracing::info!(backend_id, "no users to add to resource");
            return Ok(());
        }
        self.driver.add_users_to_resource(backend_id, &usernames).await?;
        Ok(())
    }
}
