//! `ReportProcessor`: pulls backend usage and submits it to the control
//! plane (`spec.md` §4.7).
//!
//! Grounded on `examples/original_source/waldur_site_agent/common/processors.py`'s
//! `OfferingReportProcessor` — `_process_resource_with_retries` (10
//! attempts, 5 s fixed delay), `_check_usage_anomaly` (multiple existing
//! records ⇒ anomaly; strictly-lower new value ⇒ anomaly),
//! `_submit_total_usage_for_resource`, `_submit_user_usage_for_resource`.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use site_agent_types::{ResourceState, UsageRecord};
use uuid::Uuid;

use crate::backend::{mapper, BackendDriver};
use crate::billing;
use crate::cache::PerCycleCache;
use crate::control_plane::{ControlPlaneClient, ResourceFilter};
use crate::error::{Error, Result};

const REPORT_RETRY_ATTEMPTS: u32 = 10;
const REPORT_RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct ReportProcessor {
    pub offering: site_agent_types::Offering,
    pub control: Arc<dyn ControlPlaneClient>,
    pub driver: Arc<dyn BackendDriver>,
}

impl ReportProcessor {
    pub fn new(
        offering: site_agent_types::Offering,
        control: Arc<dyn ControlPlaneClient>,
        driver: Arc<dyn BackendDriver>,
    ) -> Self {
        ReportProcessor {
            offering,
            control,
            driver,
        }
    }

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
            if let Err(err) = self.process_resource_with_retries(&resource, &cache).await {
                tracing::error!(resource_uuid = %resource.uuid, error = %err, "usage report failed for resource");
                let _ = self
                    .control
                    .set_resource_as_erred(resource.uuid, &err.to_string(), "")
                    .await;
            }
        }
        Ok(())
    }

    /// `spec.md` §4.7 step 6: retry the whole per-resource pipeline on
    /// transient errors; anomaly rejection is never retried.
    async fn process_resource_with_retries(
        &self,
        resource: &site_agent_types::MarketplaceResource,
        cache: &PerCycleCache,
    ) -> Result<()> {
        let mut last_err = None;
        for attempt in 0..REPORT_RETRY_ATTEMPTS {
            match self.process_resource(resource, cache).await {
                Ok(()) => return Ok(()),
                Err(err @ Error::UsageAnomaly { .. }) => return Err(err),
                Err(err) if attempt + 1 < REPORT_RETRY_ATTEMPTS => {
                    tracing::warn!(backend_id = %resource.backend_id, attempt, error = %err, "retrying usage report");
                    last_err = Some(err);
                    tokio::time::sleep(REPORT_RETRY_DELAY).await;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            Error::TransientBackend(format!(
                "exhausted retries reporting usage for {}",
                resource.backend_id
            ))
        }))
    }

    async fn process_resource(
        &self,
        resource: &site_agent_types::MarketplaceResource,
        cache: &PerCycleCache,
    ) -> Result<()> {
        let info = match self.driver.pull_resource(&resource.backend_id).await? {
            Some(info) => info,
            None => {
                let _ = self
                    .control
                    .set_resource_as_erred(resource.uuid, "resource missing in backend", "")
                    .await;
                return Ok(());
            }
        };

        let period = billing::current_period(&self.offering);
        let total_usage = mapper::convert_usage_to_control(&self.offering, &info.total_usage());
        self.submit_total_usage(resource.uuid, period, &total_usage).await?;

        if info.per_user_usage().next().is_none() {
            return Ok(());
        }

        // `spec.md` §4.7 step 5: resolve the backend username to an
        // `OfferingUser` via the per-cycle cache before submitting; a
        // username with no corresponding mapping is logged and skipped
        // rather than submitted as an orphaned record.
        let offering_users = cache
            .offering_users(|| self.control.list_offering_users(&Default::default()))
            .await?;
        let offering_user_by_username: std::collections::HashMap<&str, &site_agent_types::OfferingUser> =
            offering_users.iter().map(|u| (u.username.as_str(), u)).collect();

        for (username, usage) in info.per_user_usage() {
            if !offering_user_by_username.contains_key(username.as_str()) {
                tracing::warn!(username = %username, "no offering user mapping for backend username, skipping usage submission");
                continue;
            }
            let control_usage = mapper::convert_usage_to_control(&self.offering, usage);
            if let Err(err) = self
                .submit_user_usage(resource.uuid, username, period, &control_usage)
                .await
            {
                tracing::warn!(username = %username, error = %err, "skipping per-user usage submission");
            }
        }
        Ok(())
    }

    /// `spec.md` §4.7 steps 2-4: anomaly guard, then one batched write.
    async fn submit_total_usage(
        &self,
        resource_uuid: Uuid,
        period: chrono::NaiveDate,
        total_usage: &std::collections::HashMap<String, Decimal>,
    ) -> Result<()> {
        let existing = self.control.list_component_usages(resource_uuid, period).await?;

        let mut records = Vec::new();
        for (component, amount) in total_usage {
            let matching: Vec<_> = existing
                .iter()
                .filter(|r| &r.component == component && r.username.is_none())
                .collect();

            if matching.len() > 1 {
                return Err(Error::UsageAnomaly {
                    component: component.clone(),
                    new: amount.to_string(),
                    existing: format!("{} conflicting records", matching.len()),
                });
            }
            if let Some(existing_record) = matching.first() {
                if *amount < existing_record.amount {
                    return Err(Error::UsageAnomaly {
                        component: component.clone(),
                        new: amount.to_string(),
                        existing: existing_record.amount.to_string(),
                    });
                }
            }
            records.push(UsageRecord {
                uuid: None,
                resource_uuid,
                component: component.clone(),
                billing_period: period,
                amount: *amount,
                username: None,
            });
        }

        if records.is_empty() {
            return Ok(());
        }
        self.control.set_usage(&records).await
    }

    /// `spec.md` §4.7 step 5.
    async fn submit_user_usage(
        &self,
        resource_uuid: Uuid,
        username: &str,
        period: chrono::NaiveDate,
        usage: &std::collections::HashMap<String, Decimal>,
    ) -> Result<()> {
        for (component, amount) in usage {
            let record = UsageRecord {
                uuid: None,
                resource_uuid,
                component: component.clone(),
                billing_period: period,
                amount: *amount,
                username: Some(username.to_owned()),
            };
            self.control.set_user_usage(&record).await?;
        }
        Ok(())
    }
}
