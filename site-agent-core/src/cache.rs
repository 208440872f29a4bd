//! Per-cycle memoization of control-plane reads (`spec.md` §4.4,
//! `PerCycleCache`).
//!
//! Grounded on `examples/original_source/tests/test_processor_caching.py`
//! and the `_offering_users_cache`/`_team_cache`/`_service_accounts_cache`/
//! `_course_accounts_cache` instance attributes in
//! `waldur_site_agent/common/processors.py`. `spec.md` §9 re-architects the
//! source's mutable-instance-field cache into an explicit context object
//! whose lifetime is exactly one `process_offering` call — so unlike the
//! source, this cache is never a processor field; it's constructed fresh at
//! the start of a pass and dropped at the end.
//!
//! Invalidation matches the source exactly: `invalidate_offering_users`
//! (and the team/service/course caches, which have no mutating
//! counterpart and so are never invalidated mid-pass) must only be called
//! when a mutating control-plane write actually changed something — a
//! no-change mutation leaves the cache populated.

use std::cell::RefCell;
use std::collections::HashMap;

use site_agent_types::{OfferingUser, OfferingUserState};
use uuid::Uuid;

use crate::control_plane::{CourseAccount, ServiceAccount, TeamMember};

/// Per-`process_offering`-pass memoization. Not `Clone`, not `Send` by
/// design: one cache belongs to one pass on one task, never shared.
#[derive(Default)]
pub struct PerCycleCache {
    offering_users: RefCell<Option<Vec<OfferingUser>>>,
    team: RefCell<HashMap<Uuid, Vec<TeamMember>>>,
    service_accounts: RefCell<HashMap<Uuid, Vec<ServiceAccount>>>,
    course_accounts: RefCell<HashMap<Uuid, Vec<CourseAccount>>>,
}

impl PerCycleCache {
    pub fn new() -> Self {
        PerCycleCache::default()
    }

    /// Returns the full, unfiltered offering-users listing, fetching it at
    /// most once per pass via `fetch` on first miss.
    pub async fn offering_users<F, Fut>(&self, fetch: F) -> crate::error::Result<Vec<OfferingUser>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<Vec<OfferingUser>>>,
    {
        if let Some(cached) = self.offering_users.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let fetched = fetch().await?;
        *self.offering_users.borrow_mut() = Some(fetched.clone());
        Ok(fetched)
    }

    /// `spec.md` §4.4/§4.6: offering users are filtered to `{ok, requested}`
    /// wherever membership decisions are made.
    pub async fn membership_eligible_offering_users<F, Fut>(
        &self,
        fetch: F,
    ) -> crate::error::Result<Vec<OfferingUser>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<Vec<OfferingUser>>>,
    {
        let all = self.offering_users(fetch).await?;
        Ok(all
            .into_iter()
            .filter(|u| {
                matches!(
                    u.state,
                    OfferingUserState::Ok | OfferingUserState::Requested
                )
            })
            .collect())
    }

    /// Drops the offering-users cache. Must only be called after a mutating
    /// write that actually changed the offering-user set; a no-op write must
    /// not invalidate (see module docs).
    pub fn invalidate_offering_users(&self) {
        *self.offering_users.borrow_mut() = None;
    }

    /// Per-resource team roster, fetched at most once per resource per pass.
    /// Keyed by resource uuid, not project uuid: the control-plane endpoint
    /// this backs (`ControlPlaneClient::get_resource_team`) is scoped to one
    /// marketplace resource.
    pub async fn team<F, Fut>(
        &self,
        resource_uuid: Uuid,
        fetch: F,
    ) -> crate::error::Result<Vec<TeamMember>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<Vec<TeamMember>>>,
    {
        if let Some(cached) = self.team.borrow().get(&resource_uuid) {
            return Ok(cached.clone());
        }
        let fetched = fetch().await?;
        self.team.borrow_mut().insert(resource_uuid, fetched.clone());
        Ok(fetched)
    }

    pub async fn service_accounts<F, Fut>(
        &self,
        project_uuid: Uuid,
        fetch: F,
    ) -> crate::error::Result<Vec<ServiceAccount>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<Vec<ServiceAccount>>>,
    {
        if let Some(cached) = self.service_accounts.borrow().get(&project_uuid) {
            return Ok(cached.clone());
        }
        let fetched = fetch().await?;
        self.service_accounts
            .borrow_mut()
            .insert(project_uuid, fetched.clone());
        Ok(fetched)
    }

    pub async fn course_accounts<F, Fut>(
        &self,
        project_uuid: Uuid,
        fetch: F,
    ) -> crate::error::Result<Vec<CourseAccount>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<Vec<CourseAccount>>>,
    {
        if let Some(cached) = self.course_accounts.borrow().get(&project_uuid) {
            return Ok(cached.clone());
        }
        let fetched = fetch().await?;
        self.course_accounts
            .borrow_mut()
            .insert(project_uuid, fetched.clone());
        Ok(fetched)
    }
}
