//! Configuration document for one agent process (`spec.md` §6,
//! "Configuration surface"). Loading (file discovery, env var overlays,
//! CLI flag wiring) is out of scope per `spec.md` §1; this module only
//! defines and parses the typed document the rest of the core consumes.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use site_agent_types::Component;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Dispatch mode for one offering's reconciliation lanes (`spec.md` §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    Polling,
    EventDriven,
}

impl Default for DispatchMode {
    fn default() -> Self {
        DispatchMode::Polling
    }
}

/// Configuration for a single declared offering. Maps one control-plane
/// offering UUID to one backend driver instance and its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferingConfig {
    pub name: String,
    pub uuid: Uuid,
    pub api_url: String,
    pub api_token: String,
    pub backend_type: String,

    #[serde(default)]
    pub backend_settings: HashMap<String, String>,

    /// `backend_components` in `spec.md` §6: per-component unit factors and
    /// backend-side remapping, keyed by component name.
    #[serde(default)]
    pub backend_components: HashMap<String, Component>,

    pub messaging_topic: Option<String>,

    #[serde(default)]
    pub timezone: String,

    #[serde(default)]
    pub dispatch_mode: DispatchMode,
}

impl OfferingConfig {
    pub fn into_offering(self) -> site_agent_types::Offering {
        site_agent_types::Offering {
            name: self.name,
            uuid: self.uuid,
            api_url: self.api_url,
            api_token: self.api_token,
            backend_type: self.backend_type,
            backend_settings: self.backend_settings,
            components: self.backend_components,
            messaging_topic: self.messaging_topic,
            timezone: self.timezone,
        }
    }
}

/// Per-lane polling periods (`spec.md` §4.8 defaults: orders 5 min,
/// membership 5 min, reports 30 min).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingPeriods {
    #[serde(default = "default_order_period_secs")]
    pub orders_secs: u64,
    #[serde(default = "default_membership_period_secs")]
    pub membership_secs: u64,
    #[serde(default = "default_report_period_secs")]
    pub reports_secs: u64,
    /// Coarser periodic safety sweep for event-driven offerings.
    #[serde(default = "default_safety_sweep_secs")]
    pub safety_sweep_secs: u64,
}

fn default_order_period_secs() -> u64 {
    5 * 60
}
fn default_membership_period_secs() -> u64 {
    5 * 60
}
fn default_report_period_secs() -> u64 {
    30 * 60
}
fn default_safety_sweep_secs() -> u64 {
    60 * 60
}

impl Default for PollingPeriods {
    fn default() -> Self {
        PollingPeriods {
            orders_secs: default_order_period_secs(),
            membership_secs: default_membership_period_secs(),
            reports_secs: default_report_period_secs(),
            safety_sweep_secs: default_safety_sweep_secs(),
        }
    }
}

impl PollingPeriods {
    pub fn orders(&self) -> Duration {
        Duration::from_secs(self.orders_secs)
    }
    pub fn membership(&self) -> Duration {
        Duration::from_secs(self.membership_secs)
    }
    pub fn reports(&self) -> Duration {
        Duration::from_secs(self.reports_secs)
    }
    pub fn safety_sweep(&self) -> Duration {
        Duration::from_secs(self.safety_sweep_secs)
    }
}

/// Top-level agent configuration document (`spec.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub offerings: Vec<OfferingConfig>,

    #[serde(default)]
    pub polling_periods: PollingPeriods,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_true")]
    pub tls_verify: bool,
}

fn default_user_agent() -> String {
    "site-agent/0.1".to_owned()
}

fn default_true() -> bool {
    true
}

impl AgentConfig {
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AgentConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.offerings.is_empty() {
            return Err(Error::Configuration(
                "agent configuration declares no offerings".to_owned(),
            ));
        }
        for offering in &self.offerings {
            if !offering.timezone.is_empty() {
                offering
                    .timezone
                    .parse::<chrono_tz::Tz>()
                    .map_err(|_| Error::InvalidTimezone(offering.timezone.clone()))?;
            }
        }
        Ok(())
    }
}
