//! REST-backed [`ControlPlaneClient`] talking to a Waldur-compatible
//! marketplace API over `reqwest`.
//!
//! Grounded on the HTTP client shape used across the pack (a `reqwest::Client`
//! held alongside a base URL and bearer credential, e.g.
//! `examples/elisplash-paw/src-tauri/src/engine/providers/anthropic.rs`), and
//! on the endpoint set `waldur_api_client` exposes to
//! `waldur_site_agent/common/processors.py` (orders, provider resources,
//! offering users, component usages, team/service-account listings).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use site_agent_types::{MarketplaceResource, OfferingUser, Order, UsageRecord};
use uuid::Uuid;

use crate::control_plane::client::ControlPlaneClient;
use crate::control_plane::dto::{
    CourseAccount, OfferingDetails, OfferingUserFilter, OfferingUserPatch, OrderFilter,
    ResourceFilter, ServiceAccount, TeamMember,
};
use crate::error::{Error, Result};

/// Thin REST client for one offering's marketplace API.
///
/// One instance is constructed per `Offering` at supervisor startup
/// (`spec.md` §5, "an Offering exclusively owns its driver instance"; the
/// control-plane client follows the same one-per-offering ownership rule).
pub struct WaldurRestClient {
    http: Client,
    base_url: String,
    api_token: String,
}

impl WaldurRestClient {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Result<Self> {
        Self::with_user_agent(base_url, api_token, "site-agent/0.1", true)
    }

    pub fn with_user_agent(
        base_url: impl Into<String>,
        api_token: impl Into<String>,
        user_agent: &str,
        tls_verify: bool,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent.to_owned())
            .danger_accept_invalid_certs(!tls_verify)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(WaldurRestClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_token: api_token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let mut builder = self
            .http
            .request(method, self.url(path))
            .header("Authorization", format!("Token {}", self.api_token));
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(body));
        }
        if status == StatusCode::CONFLICT {
            return Err(Error::AlreadyExists(body));
        }
        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            return Err(Error::TransientBackend(format!("{status}: {body}")));
        }
        Err(Error::PermanentBackend(format!("{status}: {body}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.request::<()>(Method::GET, path, None).await?;
        Ok(response.json().await?)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        self.request(Method::POST, path, Some(body)).await?;
        Ok(())
    }

    async fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        self.request(Method::PATCH, path, Some(body)).await?;
        Ok(())
    }
}

#[async_trait]
impl ControlPlaneClient for WaldurRestClient {
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let mut path = "api/marketplace-orders/?".to_owned();
        if let Some(uuid) = filter.offering_uuid {
            path.push_str(&format!("offering_uuid={uuid}&"));
        }
        for state in &filter.states {
            path.push_str(&format!("state={state:?}&"));
        }
        self.get_json(&path).await
    }

    async fn get_order(&self, uuid: Uuid) -> Result<Order> {
        self.get_json(&format!("api/marketplace-orders/{uuid}/")).await
    }

    async fn approve_order_by_provider(&self, uuid: Uuid) -> Result<()> {
        self.post(
            &format!("api/marketplace-orders/{uuid}/approve_by_provider/"),
            &(),
        )
        .await
    }

    async fn reject_order_by_provider(&self, uuid: Uuid) -> Result<()> {
        self.post(
            &format!("api/marketplace-orders/{uuid}/reject_by_provider/"),
            &(),
        )
        .await
    }

    async fn set_order_done(&self, uuid: Uuid) -> Result<()> {
        self.post(&format!("api/marketplace-orders/{uuid}/set_state_done/"), &())
            .await
    }

    async fn set_order_erred(&self, uuid: Uuid, message: &str, traceback: &str) -> Result<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            error_message: &'a str,
            error_traceback: &'a str,
        }
        self.post(
            &format!("api/marketplace-orders/{uuid}/set_state_erred/"),
            &Body {
                error_message: message,
                error_traceback: traceback,
            },
        )
        .await
    }

    async fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<MarketplaceResource>> {
        let mut path = "api/marketplace-provider-resources/?".to_owned();
        if let Some(uuid) = filter.offering_uuid {
            path.push_str(&format!("offering_uuid={uuid}&"));
        }
        for state in &filter.states {
            path.push_str(&format!("state={state:?}&"));
        }
        self.get_json(&path).await
    }

    async fn get_resource(&self, uuid: Uuid) -> Result<MarketplaceResource> {
        self.get_json(&format!("api/marketplace-provider-resources/{uuid}/"))
            .await
    }

    async fn set_resource_backend_id(&self, uuid: Uuid, backend_id: &str) -> Result<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            backend_id: &'a str,
        }
        self.post(
            &format!("api/marketplace-provider-resources/{uuid}/set_backend_id/"),
            &Body { backend_id },
        )
        .await
    }

    async fn set_resource_backend_metadata(
        &self,
        uuid: Uuid,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        self.post(
            &format!("api/marketplace-provider-resources/{uuid}/set_backend_metadata/"),
            metadata,
        )
        .await
    }

    async fn set_resource_limits(&self, uuid: Uuid, limits: &HashMap<String, i64>) -> Result<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            limits: &'a HashMap<String, i64>,
        }
        self.post(
            &format!("api/marketplace-provider-resources/{uuid}/set_limits/"),
            &Body { limits },
        )
        .await
    }

    async fn set_resource_as_ok(&self, uuid: Uuid) -> Result<()> {
        self.post(
            &format!("api/marketplace-provider-resources/{uuid}/set_as_ok/"),
            &(),
        )
        .await
    }

    async fn set_resource_as_erred(
        &self,
        uuid: Uuid,
        message: &str,
        traceback: &str,
    ) -> Result<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            error_message: &'a str,
            error_traceback: &'a str,
        }
        self.post(
            &format!("api/marketplace-provider-resources/{uuid}/set_as_erred/"),
            &Body {
                error_message: message,
                error_traceback: traceback,
            },
        )
        .await
    }

    async fn refresh_resource_last_sync(&self, uuid: Uuid) -> Result<()> {
        self.post(
            &format!("api/marketplace-provider-resources/{uuid}/refresh_last_sync/"),
            &(),
        )
        .await
    }

    async fn get_resource_team(&self, uuid: Uuid) -> Result<Vec<TeamMember>> {
        self.get_json(&format!("api/marketplace-provider-resources/{uuid}/team/"))
            .await
    }

    async fn list_offering_users(&self, filter: &OfferingUserFilter) -> Result<Vec<OfferingUser>> {
        let mut path = "api/marketplace-offering-users/?".to_owned();
        if let Some(uuid) = filter.offering_uuid {
            path.push_str(&format!("offering_uuid={uuid}&"));
        }
        if let Some(username) = &filter.username {
            path.push_str(&format!("username={username}&"));
        }
        if let Some(uuid) = filter.user_uuid {
            path.push_str(&format!("user_uuid={uuid}&"));
        }
        if let Some(restrict) = filter.restrict_member_access {
            path.push_str(&format!("restrict_member_access={restrict}&"));
        }
        self.get_json(&path).await
    }

    async fn patch_offering_user(&self, uuid: Uuid, patch: &OfferingUserPatch) -> Result<()> {
        self.patch(&format!("api/marketplace-offering-users/{uuid}/"), patch)
            .await
    }

    async fn set_offering_user_creating(&self, uuid: Uuid) -> Result<()> {
        self.post(
            &format!("api/marketplace-offering-users/{uuid}/begin_creating/"),
            &(),
        )
        .await
    }

    async fn set_offering_user_ok(&self, uuid: Uuid, username: &str) -> Result<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            username: &'a str,
        }
        self.post(
            &format!("api/marketplace-offering-users/{uuid}/set_ok/"),
            &Body { username },
        )
        .await
    }

    async fn set_offering_user_pending_account_linking(
        &self,
        uuid: Uuid,
        comment: &str,
        comment_url: Option<&str>,
    ) -> Result<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            comment: &'a str,
            comment_url: Option<&'a str>,
        }
        self.post(
            &format!("api/marketplace-offering-users/{uuid}/set_pending_account_linking/"),
            &Body {
                comment,
                comment_url,
            },
        )
        .await
    }

    async fn set_offering_user_pending_additional_validation(
        &self,
        uuid: Uuid,
        comment: &str,
        comment_url: Option<&str>,
    ) -> Result<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            comment: &'a str,
            comment_url: Option<&'a str>,
        }
        self.post(
            &format!(
                "api/marketplace-offering-users/{uuid}/set_pending_additional_validation/"
            ),
            &Body {
                comment,
                comment_url,
            },
        )
        .await
    }

    async fn list_component_usages(
        &self,
        resource_uuid: Uuid,
        period: NaiveDate,
    ) -> Result<Vec<UsageRecord>> {
        self.get_json(&format!(
            "api/marketplace-component-usages/?resource_uuid={resource_uuid}&date_after={period}"
        ))
        .await
    }

    async fn set_usage(&self, records: &[UsageRecord]) -> Result<()> {
        self.post("api/marketplace-component-usages/set_usage/", records)
            .await
    }

    /// Per-user usage is posted against the *total-usage record's own uuid*,
    /// not the resource's — mirrors `marketplace_component_usages_set_user_usage`,
    /// which is keyed by `component_usage.uuid` from the resource-total
    /// listing. We re-resolve that uuid here rather than threading it through
    /// `UsageRecord`, since the record is a pure value type shared with
    /// `set_usage`.
    async fn set_user_usage(&self, record: &UsageRecord) -> Result<()> {
        let username = record.username.as_deref().ok_or_else(|| {
            Error::PermanentBackend("set_user_usage called with no username".to_owned())
        })?;
        let existing = self
            .list_component_usages(record.resource_uuid, record.billing_period)
            .await?;
        let Some(total_record) = existing
            .iter()
            .find(|r| r.component == record.component && r.username.is_none())
        else {
            return Err(Error::NotFound(format!(
                "no total-usage record for component {} to attach user usage to",
                record.component
            )));
        };
        let component_usage_uuid = total_record.uuid.ok_or_else(|| {
            Error::PermanentBackend(
                "component usage listing did not return a record uuid".to_owned(),
            )
        })?;

        #[derive(Serialize)]
        struct Body<'a> {
            username: &'a str,
            usage: String,
        }
        self.post(
            &format!("api/marketplace-component-usages/{component_usage_uuid}/set_user_usage/"),
            &Body {
                username,
                usage: record.amount.to_string(),
            },
        )
        .await
    }

    async fn list_user_usages(
        &self,
        resource_uuid: Uuid,
        period: NaiveDate,
    ) -> Result<Vec<UsageRecord>> {
        self.get_json(&format!(
            "api/component-user-usage-limits/?resource_uuid={resource_uuid}&date_after={period}"
        ))
        .await
    }

    async fn list_user_component_limits(
        &self,
        resource_uuid: Uuid,
        username: &str,
    ) -> Result<HashMap<String, i64>> {
        #[derive(serde::Deserialize)]
        struct ComponentUserUsageLimit {
            component_type: String,
            limit: f64,
        }
        let limits: Vec<ComponentUserUsageLimit> = self
            .get_json(&format!(
                "api/component-user-usage-limits/?resource_uuid={resource_uuid}&username={username}"
            ))
            .await?;
        Ok(limits
            .into_iter()
            .map(|l| (l.component_type, l.limit as i64))
            .collect())
    }

    async fn list_service_accounts(&self, project_uuid: Uuid) -> Result<Vec<ServiceAccount>> {
        self.get_json(&format!(
            "api/marketplace-service-providers/project-service-accounts/?project_uuid={project_uuid}"
        ))
        .await
    }

    async fn list_course_accounts(&self, project_uuid: Uuid) -> Result<Vec<CourseAccount>> {
        self.get_json(&format!(
            "api/marketplace-service-providers/course-accounts/?project_uuid={project_uuid}"
        ))
        .await
    }

    async fn get_offering_details(&self, uuid: Uuid) -> Result<OfferingDetails> {
        self.get_json(&format!("api/marketplace-provider-offerings/{uuid}/"))
            .await
    }
}
