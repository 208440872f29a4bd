//! `MembershipProcessor`: syncs backend user membership, status and limits
//! against the control plane (`spec.md` §4.6).
//!
//! Grounded on `examples/original_source/waldur_site_agent/common/processors.py`'s
//! `OfferingMembershipProcessor` — `_get_resource_usernames` (existing/new/
//! stale partition), `_sync_resource_users` (restrict-access early return),
//! `_sync_resource_status` (pause/downscale/restore tri-state),
//! `_sync_resource_limits` (backend-authoritative drift check),
//! `_sync_resource_user_limits`, `process_user_role_changed`,
//! `process_project_user_sync`. Username resolution for blank-username team
//! members is grounded on the same source's `_get_username_for_offering_user`
//! call in `_add_users_to_resource`, reused here so a user who reaches the
//! team before their username is resolved is not silently excluded from
//! membership sync.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use site_agent_types::{MarketplaceResource, OfferingUser, ResourceState};
use uuid::Uuid;

use crate::backend::{BackendDriver, UsernameManager, UsernameResult};
use crate::cache::PerCycleCache;
use crate::control_plane::{ControlPlaneClient, OfferingUserFilter, OfferingUserPatch, ResourceFilter};
use crate::error::Result;

pub struct MembershipProcessor {
    pub offering: site_agent_types::Offering,
    pub control: Arc<dyn ControlPlaneClient>,
    pub driver: Arc<dyn BackendDriver>,
    pub username_manager: Arc<dyn UsernameManager>,
}

impl MembershipProcessor {
    pub fn new(
        offering: site_agent_types::Offering,
        control: Arc<dyn ControlPlaneClient>,
        driver: Arc<dyn BackendDriver>,
        username_manager: Arc<dyn UsernameManager>,
    ) -> Self {
        MembershipProcessor {
            offering,
            control,
            driver,
            username_manager,
        }
    }

    /// `spec.md` §4.6: one fresh [`PerCycleCache`] per pass, discarded at the
    /// end — never a processor field.
    pub async fn process_offering(&self) -> Result<()> {
        let cache = PerCycleCache::new();
        let resources = self
            .control
            .list_resources(&ResourceFilter {
                offering_uuid: Some(self.offering.uuid),
                states: vec![ResourceState::Ok, ResourceState::Erred],
            })
            .await?;

        for resource in resources {
            if !resource.has_backend_id() {
                continue;
            }
            if let Err(err) = self.process_resource(&resource, &cache).await {
                tracing::error!(resource_uuid = %resource.uuid, error = %err, "membership sync failed for resource");
                let _ = self
                    .control
                    .set_resource_as_erred(resource.uuid, &err.to_string(), "")
                    .await;
            }
        }
        Ok(())
    }

    /// `spec.md` §4.6 step `process_resource_by_uuid(uuid)`, the targeted
    /// event-driven variant.
    pub async fn process_resource_by_uuid(&self, resource_uuid: Uuid) -> Result<()> {
        let cache = PerCycleCache::new();
        let resource = self.control.get_resource(resource_uuid).await?;
        if !resource.has_backend_id() {
            return Ok(());
        }
        self.process_resource(&resource, &cache).await
    }

    /// `process_user_role_changed(user, project, granted)`: targeted
    /// add/remove of one user across every resource in a project, skipping
    /// restricted resources on grant.
    pub async fn process_user_role_changed(
        &self,
        username: &str,
        project_uuid: Uuid,
        granted: bool,
    ) -> Result<()> {
        let resources = self.resources_for_project(project_uuid).await?;
        let mut usernames = HashSet::new();
        usernames.insert(username.to_owned());
        for resource in resources {
            if granted {
                if resource.restrict_member_access {
                    continue;
                }
                if let Err(err) = self
                    .driver
                    .add_users_to_resource(&resource.backend_id, &usernames)
                    .await
                {
                    tracing::error!(username, backend_id = %resource.backend_id, error = %err, "unable to add user to resource");
                }
            } else if let Err(err) = self
                .driver
                .remove_users_from_resource(&resource.backend_id, &usernames)
                .await
            {
                tracing::error!(username, backend_id = %resource.backend_id, error = %err, "unable to remove user from resource");
            }
        }
        Ok(())
    }

    /// `process_project_user_sync(project)`: full re-sync of every resource
    /// in one project.
    pub async fn process_project_user_sync(&self, project_uuid: Uuid) -> Result<()> {
        let cache = PerCycleCache::new();
        let resources = self.resources_for_project(project_uuid).await?;
        for resource in resources {
            if let Err(err) = self.process_resource(&resource, &cache).await {
                tracing::error!(resource_uuid = %resource.uuid, error = %err, "unable to sync resource");
            }
        }
        Ok(())
    }

    async fn resources_for_project(&self, project_uuid: Uuid) -> Result<Vec<MarketplaceResource>> {
        let resources = self
            .control
            .list_resources(&ResourceFilter {
                offering_uuid: Some(self.offering.uuid),
                states: vec![ResourceState::Ok, ResourceState::Erred],
            })
            .await?;
        Ok(resources
            .into_iter()
            .filter(|r| r.project_uuid == project_uuid && r.has_backend_id())
            .collect())
    }

    async fn process_resource(
        &self,
        resource: &MarketplaceResource,
        cache: &PerCycleCache,
    ) -> Result<()> {
        let active_usernames = self.sync_resource_users(resource, cache).await?;
        self.sync_service_and_course_accounts(resource, cache).await?;
        self.sync_resource_status(resource).await?;
        self.sync_resource_limits(resource).await?;
        self.sync_resource_user_limits(resource, &active_usernames).await?;

        self.control.refresh_resource_last_sync(resource.uuid).await?;
        if resource.state == ResourceState::Erred {
            self.control.set_resource_as_ok(resource.uuid).await?;
        }
        Ok(())
    }

    /// Resolves blank usernames for team members before the existing/new/
    /// stale partition runs, the same way `OrderProcessor::add_users_to_resource`
    /// resolves them at creation time. Without this, an `OfferingUser` that
    /// reaches the team with state `requested` and no username can never be
    /// synced by this processor: `has_username()` would exclude it from every
    /// partition forever. A resolved username is patched back to the offering
    /// user; the deferred `NeedsLinking`/`NeedsValidation` outcomes patch the
    /// offering user's state instead and leave the blank username for a later
    /// pass to retry.
    async fn resolve_pending_usernames(
        &self,
        offering_users: Vec<OfferingUser>,
        team_user_uuids: &HashSet<Uuid>,
    ) -> Vec<OfferingUser> {
        let mut resolved = HashMap::new();
        for offering_user in &offering_users {
            if offering_user.has_username() || !team_user_uuids.contains(&offering_user.user_uuid) {
                continue;
            }
            let _ = self.control.set_offering_user_creating(offering_user.uuid).await;
            match self.username_manager.get_or_create_username(offering_user).await {
                Ok(UsernameResult::Ok(username)) => {
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
                    resolved.insert(offering_user.uuid, username);
                }
                Ok(UsernameResult::NeedsLinking { message, url }) => {
                    let _ = self
                        .control
                        .set_offering_user_pending_account_linking(
                            offering_user.uuid,
                            &message,
                            url.as_deref(),
                        )
                        .await;
                }
                Ok(UsernameResult::NeedsValidation { message, url }) => {
                    let _ = self
                        .control
                        .set_offering_user_pending_additional_validation(
                            offering_user.uuid,
                            &message,
                            url.as_deref(),
                        )
                        .await;
                }
                Ok(UsernameResult::Error(cause)) => {
                    tracing::warn!(offering_user = %offering_user.uuid, cause = %cause, "username generation failed");
                }
                Err(err) => {
                    tracing::warn!(offering_user = %offering_user.uuid, error = %err, "username generation failed");
                }
            }
        }

        if resolved.is_empty() {
            return offering_users;
        }
        offering_users
            .into_iter()
            .map(|mut u| {
                if let Some(username) = resolved.get(&u.uuid) {
                    u.username = username.clone();
                }
                u
            })
            .collect()
    }

    /// `spec.md` §4.6 steps 1-4: pull, partition, restrict-or-sync.
    async fn sync_resource_users(
        &self,
        resource: &MarketplaceResource,
        cache: &PerCycleCache,
    ) -> Result<HashSet<String>> {
        let backend_info = self
            .driver
            .pull_resource(&resource.backend_id)
            .await?
            .unwrap_or_default();
        let local_usernames: HashSet<String> = backend_info.users.into_iter().collect();

        let team = cache
            .team(resource.uuid, || async {
                self.control.get_resource_team(resource.uuid).await
            })
            .await
            .unwrap_or_default();
        let team_user_uuids: HashSet<Uuid> = team.iter().map(|m| m.user_uuid).collect();

        let offering_users = cache
            .membership_eligible_offering_users(|| async {
                self.control
                    .list_offering_users(&OfferingUserFilter {
                        offering_uuid: Some(self.offering.uuid),
                        restrict_member_access: Some(false),
                        ..Default::default()
                    })
                    .await
            })
            .await?;
        let offering_users = self
            .resolve_pending_usernames(offering_users, &team_user_uuids)
            .await;

        let existing: HashSet<String> = offering_users
            .iter()
            .filter(|u| {
                u.has_username()
                    && local_usernames.contains(&u.username)
                    && team_user_uuids.contains(&u.user_uuid)
            })
            .map(|u| u.username.clone())
            .collect();
        let new_usernames: HashSet<String> = offering_users
            .iter()
            .filter(|u| {
                u.has_username()
                    && !local_usernames.contains(&u.username)
                    && team_user_uuids.contains(&u.user_uuid)
            })
            .map(|u| u.username.clone())
            .collect();
        let stale: HashSet<String> = offering_users
            .iter()
            .filter(|u| {
                u.has_username()
                    && local_usernames.contains(&u.username)
                    && !team_user_uuids.contains(&u.user_uuid)
            })
            .map(|u| u.username.clone())
            .collect();

        if resource.restrict_member_access {
            self.driver
                .remove_users_from_resource(&resource.backend_id, &existing)
                .await?;
            return Ok(HashSet::new());
        }

        let added = self
            .driver
            .add_users_to_resource(&resource.backend_id, &new_usernames)
            .await?;
        self.driver
            .remove_users_from_resource(&resource.backend_id, &stale)
            .await?;

        Ok(existing.union(&added).cloned().collect())
    }

    /// `spec.md` §4.6 closing sentence: "Service-account and course-account
    /// sync run alongside the user sync, each guarded by the per-cycle cache
    /// keyed on project id." Neither kind is subject to the existing/new/
    /// stale partition against `OfferingUser` state: a service account has no
    /// offering-user record at all, and a course account is added only while
    /// its enrollment window covers today and otherwise removed. Both are
    /// skipped entirely on a restricted resource, matching the user sync.
    async fn sync_service_and_course_accounts(
        &self,
        resource: &MarketplaceResource,
        cache: &PerCycleCache,
    ) -> Result<()> {
        if resource.restrict_member_access {
            return Ok(());
        }

        let service_accounts = cache
            .service_accounts(resource.project_uuid, || async {
                self.control.list_service_accounts(resource.project_uuid).await
            })
            .await
            .unwrap_or_default();
        let service_usernames: HashSet<String> =
            service_accounts.into_iter().map(|a| a.username).collect();
        self.driver
            .add_users_to_resource(&resource.backend_id, &service_usernames)
            .await?;

        let today = chrono::Utc::now().date_naive();
        let course_accounts = cache
            .course_accounts(resource.project_uuid, || async {
                self.control.list_course_accounts(resource.project_uuid).await
            })
            .await
            .unwrap_or_default();
        let (active, expired): (Vec<_>, Vec<_>) = course_accounts.into_iter().partition(|a| {
            a.start_date.map_or(true, |start| start <= today)
                && a.end_date.map_or(true, |end| end >= today)
        });
        let active_usernames: HashSet<String> = active.into_iter().map(|a| a.username).collect();
        let expired_usernames: HashSet<String> = expired.into_iter().map(|a| a.username).collect();

        self.driver
            .add_users_to_resource(&resource.backend_id, &active_usernames)
            .await?;
        self.driver
            .remove_users_from_resource(&resource.backend_id, &expired_usernames)
            .await?;
        Ok(())
    }

    /// `spec.md` §4.6 step 5: pause/downscale/restore tri-state, then
    /// metadata write-back.
    async fn sync_resource_status(&self, resource: &MarketplaceResource) -> Result<()> {
        if resource.paused {
            self.driver.pause_resource(&resource.backend_id).await?;
        } else if resource.downscaled {
            self.driver.downscale_resource(&resource.backend_id).await?;
        } else {
            self.driver.restore_resource(&resource.backend_id).await?;
        }

        let metadata = self.driver.get_resource_metadata(&resource.backend_id).await?;
        self.control
            .set_resource_backend_metadata(resource.uuid, &metadata)
            .await?;
        Ok(())
    }

    /// `spec.md` §4.6 step 6: the backend is authoritative for limits in
    /// this direction.
    async fn sync_resource_limits(&self, resource: &MarketplaceResource) -> Result<()> {
        let backend_limits = self.driver.get_resource_limits(&resource.backend_id).await?;
        if backend_limits.is_empty() {
            return Ok(());
        }
        if backend_limits == resource.limits {
            return Ok(());
        }
        self.control
            .set_resource_limits(resource.uuid, &backend_limits)
            .await
    }

    /// `spec.md` §4.6 step 7.
    async fn sync_resource_user_limits(
        &self,
        resource: &MarketplaceResource,
        usernames: &HashSet<String>,
    ) -> Result<()> {
        if resource.restrict_member_access {
            return Ok(());
        }
        let backend_user_limits = self
            .driver
            .get_resource_user_limits(&resource.backend_id)
            .await?;

        for username in usernames {
            let desired = self
                .control
                .list_user_component_limits(resource.uuid, username)
                .await
                .unwrap_or_default();

            if desired.is_empty() {
                if !backend_user_limits.contains_key(username) {
                    continue;
                }
                self.driver
                    .set_resource_user_limits(&resource.backend_id, username, &Default::default())
                    .await?;
                continue;
            }

            if backend_user_limits.get(username) == Some(&desired) {
                continue;
            }
            self.driver
                .set_resource_user_limits(&resource.backend_id, username, &desired)
                .await?;
        }
        Ok(())
    }
}
