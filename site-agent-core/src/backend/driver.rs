//! Higher-level orchestration over a [`BackendClient`] (`spec.md` §4.1,
//! `BackendDriver`).
//!
//! Grounded on `examples/original_source/waldur_site_agent/backend/backends.py`'s
//! `BaseBackend`: `create_resource` there is assembled from
//! `_pre_create_resource` (abstract, driver-supplied), `_create_resource_in_backend`
//! (retry-on-collision name generation), `_setup_resource_limits` and
//! `post_create_resource` (optional hook). `spec.md` §9 calls for replacing
//! that override-by-subclassing pattern with a `CreateResourcePipeline` record
//! of three function fields that the base driver applies in order.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use site_agent_types::{BackendResourceInfo, Component, MarketplaceResource, Order, OfferingUser};
use uuid::Uuid;

use crate::backend::client::BackendClient;
use crate::error::{Error, Result};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Team membership and offering-user lookups assembled once per order by
/// `OrderProcessor::_fetch_user_context_for_resource` and handed to
/// `create_resource` so drivers that need it (e.g. to seed a group with the
/// whole team) don't have to fetch it themselves.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub team_usernames: HashSet<String>,
    pub offering_users_by_user_uuid: HashMap<Uuid, OfferingUser>,
}

/// Result of [`BackendDriver::evaluate_pending_order`] (`spec.md` §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDecision {
    Accept,
    Reject,
    Pending,
}

/// The three-phase breakdown `spec.md` §9 mandates in place of subclass
/// overrides. A driver supplies whichever phases it needs; phases it doesn't
/// are the identity/no-op default.
///
/// - `pre_create`: optional external side effects (provision a parent group,
///   an IAM principal) before the resource itself exists.
/// - `create_in_backend`: must be idempotent given the generated backend id
///   and must return that id. This is the phase the base driver retries
///   across collisions.
/// - `setup_limits`: convert marketplace limits via the component mapper and
///   apply them to the freshly created backend id.
///
/// On failure of any phase after `pre_create` has run, the caller is
/// responsible for invoking `delete_resource` to release what was created;
/// see [`BaseBackendDriver::create_resource`].
pub struct CreateResourcePipeline {
    pub pre_create: Arc<
        dyn Fn(MarketplaceResource, Option<UserContext>) -> BoxFuture<'static, Result<()>>
            + Send
            + Sync,
    >,
    pub create_in_backend: Arc<
        dyn Fn(String, MarketplaceResource) -> BoxFuture<'static, Result<String>> + Send + Sync,
    >,
    pub setup_limits:
        Arc<dyn Fn(String, MarketplaceResource) -> BoxFuture<'static, Result<()>> + Send + Sync>,
    pub post_create: Arc<
        dyn Fn(BackendResourceInfo, MarketplaceResource) -> BoxFuture<'static, Result<()>>
            + Send
            + Sync,
    >,
}

impl Default for CreateResourcePipeline {
    fn default() -> Self {
        CreateResourcePipeline {
            pre_create: Arc::new(|_, _| Box::pin(async { Ok(()) })),
            create_in_backend: Arc::new(|base_id, _| Box::pin(async move { Ok(base_id) })),
            setup_limits: Arc::new(|_, _| Box::pin(async { Ok(()) })),
            post_create: Arc::new(|_, _| Box::pin(async { Ok(()) })),
        }
    }
}

/// Sanitizes a candidate backend id to `[a-z0-9-]`, collapsing anything else
/// to a single `-`. Mirrors the slug cleanup `waldur_site_agent/backend/backends.py`
/// performs on `waldur_resource.slug`/`project_slug` before using it as a
/// backend id.
pub fn sanitize_backend_id(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_dash = false;
    for ch in input.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    out.trim_matches('-').to_owned()
}

/// Generates `{prefix}{sanitized_base}`, and on collision (`exists` returns
/// `true`) appends `-{n}` for `n` in `1..=9`. `spec.md` §4.1: "on collision it
/// appends a numeric suffix up to 10 times before failing with a collision
/// error" — 1 initial attempt plus 9 suffixed retries.
pub async fn generate_backend_id<F, Fut>(
    prefix: &str,
    base: &str,
    mut exists: F,
) -> Result<String>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let sanitized = sanitize_backend_id(base);
    let candidate = format!("{prefix}{sanitized}");
    if !exists(candidate.clone()).await? {
        return Ok(candidate);
    }
    for suffix in 1..=9 {
        let candidate = format!("{prefix}{sanitized}-{suffix}");
        if !exists(candidate.clone()).await? {
            return Ok(candidate);
        }
    }
    Err(Error::Collision(format!("{prefix}{sanitized}")))
}

#[async_trait]
pub trait BackendDriver: Send + Sync {
    fn backend_type(&self) -> &str;

    async fn ping(&self, raise: bool) -> Result<bool>;

    async fn diagnostics(&self) -> Result<()> {
        Ok(())
    }

    fn list_components(&self) -> &HashMap<String, Component>;

    async fn create_resource(
        &self,
        resource: &MarketplaceResource,
        resource_name_base: &str,
        user_context: Option<&UserContext>,
    ) -> Result<BackendResourceInfo>;

    async fn delete_resource(&self, backend_id: &str) -> Result<()>;

    /// Returns `None` if the resource does not exist in the backend;
    /// otherwise current users, usage (`TOTAL_ACCOUNT_USAGE` always present,
    /// zero-valued if no data), and limits (`spec.md` §4.1).
    async fn pull_resource(&self, backend_id: &str) -> Result<Option<BackendResourceInfo>>;

    async fn pull_resources(
        &self,
        backend_ids: &[String],
    ) -> Result<HashMap<String, BackendResourceInfo>> {
        let mut out = HashMap::new();
        for id in backend_ids {
            if let Some(info) = self.pull_resource(id).await? {
                out.insert(id.clone(), info);
            }
        }
        Ok(out)
    }

    async fn get_usage_report(
        &self,
        backend_ids: &[String],
    ) -> Result<HashMap<String, HashMap<String, HashMap<String, rust_decimal::Decimal>>>>;

    async fn set_resource_limits(&self, backend_id: &str, limits: &HashMap<String, i64>)
        -> Result<()>;

    /// Current backend-side per-component limits, used by
    /// `MembershipProcessor`'s "limits sync" step to detect drift against
    /// the control plane (`spec.md` §4.6 step 6).
    async fn get_resource_limits(&self, _backend_id: &str) -> Result<HashMap<String, i64>> {
        Ok(HashMap::new())
    }

    /// Current backend-side per-user, per-component limit overrides
    /// (`spec.md` §4.6 step 7).
    async fn get_resource_user_limits(
        &self,
        _backend_id: &str,
    ) -> Result<HashMap<String, HashMap<String, i64>>> {
        Ok(HashMap::new())
    }

    /// Sets (or, with an empty map, clears) one user's per-component limit
    /// overrides (`spec.md` §4.6 step 7).
    async fn set_resource_user_limits(
        &self,
        _backend_id: &str,
        _username: &str,
        _limits: &HashMap<String, i64>,
    ) -> Result<()> {
        Ok(())
    }

    /// Returns the subset of usernames actually added; partial failure is
    /// tolerated per-user (`spec.md` §4.1).
    async fn add_users_to_resource(
        &self,
        backend_id: &str,
        usernames: &HashSet<String>,
    ) -> Result<HashSet<String>>;

    async fn remove_users_from_resource(
        &self,
        backend_id: &str,
        usernames: &HashSet<String>,
    ) -> Result<Vec<String>>;

    async fn downscale_resource(&self, _backend_id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn pause_resource(&self, _backend_id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn restore_resource(&self, _backend_id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn get_resource_metadata(&self, _backend_id: &str) -> Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }

    /// May veto a pending-provider order; default is `ACCEPT` (`spec.md` §4.1).
    async fn evaluate_pending_order(&self, _order: &Order) -> Result<OrderDecision> {
        Ok(OrderDecision::Accept)
    }
}

/// Generic `BackendDriver` built from a [`BackendClient`] plus a
/// [`CreateResourcePipeline`]. Concrete drivers compose this rather than
/// reimplementing orchestration; see `waldur_site_agent/backend/backends.py`'s
/// `BaseBackend`, which every source backend subclasses for exactly this
/// reason.
pub struct BaseBackendDriver<C: BackendClient> {
    pub backend_type: String,
    pub id_prefix: String,
    pub client: C,
    pub components: HashMap<String, Component>,
    pub pipeline: CreateResourcePipeline,
}

impl<C: BackendClient> BaseBackendDriver<C> {
    pub fn new(
        backend_type: impl Into<String>,
        id_prefix: impl Into<String>,
        client: C,
        components: HashMap<String, Component>,
    ) -> Self {
        BaseBackendDriver {
            backend_type: backend_type.into(),
            id_prefix: id_prefix.into(),
            client,
            components,
            pipeline: CreateResourcePipeline::default(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: CreateResourcePipeline) -> Self {
        self.pipeline = pipeline;
        self
    }
}

#[async_trait]
impl<C: BackendClient> BackendDriver for BaseBackendDriver<C> {
    fn backend_type(&self) -> &str {
        &self.backend_type
    }

    async fn ping(&self, raise: bool) -> Result<bool> {
        match self.client.list_resources().await {
            Ok(_) => Ok(true),
            Err(err) if raise => Err(err),
            Err(_) => Ok(false),
        }
    }

    fn list_components(&self) -> &HashMap<String, Component> {
        &self.components
    }

    async fn create_resource(
        &self,
        resource: &MarketplaceResource,
        resource_name_base: &str,
        user_context: Option<&UserContext>,
    ) -> Result<BackendResourceInfo> {
        (self.pipeline.pre_create)(resource.clone(), user_context.cloned()).await?;

        let client = &self.client;
        let prefix = self.id_prefix.clone();
        let backend_id = generate_backend_id(&prefix, resource_name_base, |candidate| async move {
            Ok(client.get_resource(&candidate).await?.is_some())
        })
        .await?;

        let backend_id =
            (self.pipeline.create_in_backend)(backend_id, resource.clone()).await?;

        if let Err(err) = (self.pipeline.setup_limits)(backend_id.clone(), resource.clone()).await
        {
            // Roll back: a resource that failed limit setup shouldn't be left
            // half-provisioned (spec.md §4.1, "release any externally-created
            // resources" on phase failure).
            let _ = self.client.delete_resource(&backend_id).await;
            return Err(err);
        }

        let limits = self.client.get_resource_limits(&backend_id).await?;
        let info = BackendResourceInfo {
            backend_id: backend_id.clone(),
            limits,
            ..Default::default()
        };
        (self.pipeline.post_create)(info.clone(), resource.clone()).await?;
        Ok(info)
    }

    async fn delete_resource(&self, backend_id: &str) -> Result<()> {
        match self.client.delete_resource(backend_id).await {
            Ok(()) => Ok(()),
            Err(Error::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn pull_resource(&self, backend_id: &str) -> Result<Option<BackendResourceInfo>> {
        let mut info = match self.client.get_resource(backend_id).await? {
            Some(info) => info,
            None => return Ok(None),
        };
        info.usage
            .entry(site_agent_types::TOTAL_ACCOUNT_USAGE.to_owned())
            .or_default();
        Ok(Some(info))
    }

    async fn get_usage_report(
        &self,
        backend_ids: &[String],
    ) -> Result<HashMap<String, HashMap<String, HashMap<String, rust_decimal::Decimal>>>> {
        self.client.get_usage_report(backend_ids).await
    }

    async fn set_resource_limits(
        &self,
        backend_id: &str,
        limits: &HashMap<String, i64>,
    ) -> Result<()> {
        self.client.set_resource_limits(backend_id, limits).await
    }

    async fn get_resource_limits(&self, backend_id: &str) -> Result<HashMap<String, i64>> {
        self.client.get_resource_limits(backend_id).await
    }

    async fn get_resource_user_limits(
        &self,
        backend_id: &str,
    ) -> Result<HashMap<String, HashMap<String, i64>>> {
        self.client.get_resource_user_limits(backend_id).await
    }

    async fn set_resource_user_limits(
        &self,
        backend_id: &str,
        username: &str,
        limits: &HashMap<String, i64>,
    ) -> Result<()> {
        self.client
            .set_resource_user_limits(backend_id, username, limits)
            .await
    }

    async fn add_users_to_resource(
        &self,
        backend_id: &str,
        usernames: &HashSet<String>,
    ) -> Result<HashSet<String>> {
        let mut added = HashSet::new();
        for username in usernames {
            if username.trim().is_empty() {
                continue;
            }
            let exists = self
                .client
                .get_association(username, backend_id)
                .await?
                .is_some();
            if exists {
                added.insert(username.clone());
                continue;
            }
            match self.client.create_association(username, backend_id, None).await {
                Ok(_) => {
                    added.insert(username.clone());
                }
                Err(err) => {
                    tracing::warn!(
                        username = %username,
                        backend_id = %backend_id,
                        error = %err,
                        "unable to add user to resource"
                    );
                }
            }
        }
        Ok(added)
    }

    async fn remove_users_from_resource(
        &self,
        backend_id: &str,
        usernames: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for username in usernames {
            let exists = self
                .client
                .get_association(username, backend_id)
                .await?
                .is_some();
            if !exists {
                continue;
            }
            match self.client.delete_association(username, backend_id).await {
                Ok(()) => removed.push(username.clone()),
                Err(err) => {
                    tracing::warn!(
                        username = %username,
                        backend_id = %backend_id,
                        error = %err,
                        "unable to remove user from resource"
                    );
                }
            }
        }
        Ok(removed)
    }
}
