//! Low-level, per-protocol capability set (`spec.md` §4.1, `BackendClient`).
//!
//! Grounded on `examples/original_source/waldur_site_agent/backends/base.py`'s
//! `BaseClient`/`UnknownClient` pair: every method is optional in spirit —
//! a driver that doesn't need a capability is served by [`UnknownClient`],
//! which returns the same safe defaults the Python `UnknownClient` does,
//! rather than forcing every concrete driver to implement every method.

use std::collections::HashMap;

use async_trait::async_trait;
use site_agent_types::BackendResourceInfo;

use crate::error::Result;

/// One backend-reported association between a user and a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub username: String,
    pub backend_id: String,
}

/// Low-level, per-protocol capability set that concrete backend drivers
/// compose `BackendDriver` orchestration logic out of. All methods are
/// idempotent no-ops on their "nothing to do" edge (`spec.md` §5,
/// Idempotency): creating an existing resource, deleting a missing one,
/// and adding an existing association must all succeed quietly.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn list_resources(&self) -> Result<Vec<BackendResourceInfo>> {
        Ok(Vec::new())
    }

    async fn get_resource(&self, _id: &str) -> Result<Option<BackendResourceInfo>> {
        Ok(None)
    }

    async fn create_resource(
        &self,
        name: &str,
        _description: &str,
        _organization: &str,
        _parent: Option<&str>,
    ) -> Result<String> {
        Ok(name.to_owned())
    }

    async fn delete_resource(&self, id: &str) -> Result<()> {
        let _ = id;
        Ok(())
    }

    async fn set_resource_limits(
        &self,
        _id: &str,
        _limits: &HashMap<String, i64>,
    ) -> Result<()> {
        Ok(())
    }

    async fn get_resource_limits(&self, _id: &str) -> Result<HashMap<String, i64>> {
        Ok(HashMap::new())
    }

    async fn get_resource_user_limits(
        &self,
        _id: &str,
    ) -> Result<HashMap<String, HashMap<String, i64>>> {
        Ok(HashMap::new())
    }

    async fn set_resource_user_limits(
        &self,
        _id: &str,
        _username: &str,
        _limits: &HashMap<String, i64>,
    ) -> Result<()> {
        Ok(())
    }

    async fn get_association(
        &self,
        _username: &str,
        _id: &str,
    ) -> Result<Option<Association>> {
        Ok(None)
    }

    async fn create_association(
        &self,
        username: &str,
        id: &str,
        _default_resource: Option<&str>,
    ) -> Result<Association> {
        Ok(Association {
            username: username.to_owned(),
            backend_id: id.to_owned(),
        })
    }

    async fn delete_association(&self, _username: &str, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn get_usage_report(
        &self,
        _ids: &[String],
    ) -> Result<HashMap<String, HashMap<String, HashMap<String, rust_decimal::Decimal>>>> {
        Ok(HashMap::new())
    }

    async fn list_resource_users(&self, _id: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Null implementation of [`BackendClient`], for drivers that don't speak
/// to a real backend protocol (e.g. reporting-only offerings, or the core's
/// own tests). Mirrors `UnknownClient` in
/// `waldur_site_agent/backends/base.py` exactly: every method returns the
/// trait's own safe default.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownClient;

#[async_trait]
impl BackendClient for UnknownClient {}
