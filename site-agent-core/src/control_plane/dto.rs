//! Supporting types for [`super::ControlPlaneClient`] that aren't part of
//! the shared domain model in `site-agent-types` because they're purely
//! artifacts of the control-plane wire surface (team rosters, service/course
//! accounts, offering metadata).
//!
//! Grounded on `examples/original_source/tests/test_processor_caching.py`'s
//! `ProjectUser`/`ProjectServiceAccount`/`CourseAccount` fixtures and
//! `waldur_site_agent/common/processors.py`'s `_get_waldur_resource_team`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use site_agent_types::Component;
use uuid::Uuid;

/// One member of a project's team, as returned by the resource team-list
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub user_uuid: Uuid,
    pub username: String,
    pub full_name: String,
}

/// A service account provisioned for a project, independent of any
/// individual team member (`spec.md` §6, "Service / course accounts").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub uuid: Uuid,
    pub project_uuid: Uuid,
    pub username: String,
}

/// A course-scoped account, distinct from a service account in that it
/// additionally carries the enrollment window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseAccount {
    pub uuid: Uuid,
    pub project_uuid: Uuid,
    pub user_uuid: Uuid,
    pub username: String,
    pub start_date: Option<chrono::NaiveDate>,
    pub end_date: Option<chrono::NaiveDate>,
}

/// Offering metadata retrieved to resolve component schema and plugin
/// options (`spec.md` §6, "Offering details").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferingDetails {
    pub uuid: Uuid,
    pub name: String,
    pub components: HashMap<String, Component>,

    /// Raw plugin options bag; the core only reads
    /// `account_name_generation_policy` out of it (`spec.md` §4.1 naming
    /// rules) but passes the rest through untouched.
    #[serde(default)]
    pub plugin_options: HashMap<String, serde_json::Value>,
}

impl OfferingDetails {
    /// Whether the offering requests project-slug-based resource naming
    /// rather than resource-slug-based naming.
    pub fn uses_project_slug_naming(&self) -> bool {
        self.plugin_options
            .get("account_name_generation_policy")
            .and_then(|v| v.as_str())
            == Some("project_slug")
    }
}

/// Patchable fields on an `OfferingUser`, used by
/// `ControlPlaneClient::patch_offering_user`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfferingUserPatch {
    pub username: Option<String>,
    pub comment: Option<String>,
    pub comment_url: Option<String>,
}

/// A single filed offering-users listing filter (`spec.md` §6: "filter by
/// offering, username, user-uuid, restriction flag").
#[derive(Debug, Clone, Default)]
pub struct OfferingUserFilter {
    pub offering_uuid: Option<Uuid>,
    pub username: Option<String>,
    pub user_uuid: Option<Uuid>,
    pub restrict_member_access: Option<bool>,
}

/// A single filed resources listing filter (`spec.md` §6: "filter by
/// offering + state, projection of fields").
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub offering_uuid: Option<Uuid>,
    pub states: Vec<site_agent_types::ResourceState>,
}

/// A single filed orders listing filter (`spec.md` §6: "filter by offering +
/// state").
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub offering_uuid: Option<Uuid>,
    pub states: Vec<site_agent_types::OrderState>,
}

/// Timestamped marker of the last successful reconciliation pass touching a
/// resource, used by `refresh_resource_last_sync`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LastSync(pub DateTime<Utc>);
