use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a [`Component`] is charged as a hard limit or as metered usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountingType {
    Limit,
    Usage,
}

/// One target alias a source [`Component`] expands into on the backend side,
/// per `spec.md` §4.3's remapping mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRemapTarget {
    /// Name of the backend-side component the source value is expanded into.
    pub target_component: String,

    /// Multiplier applied when converting from the control-plane unit to
    /// `target_component`'s backend unit.
    pub factor: i64,
}

/// A chargeable dimension declared by an [`Offering`] (CPU-minutes, storage
/// bytes, nodeHours, ...). See `spec.md` §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub accounting_type: AccountingType,

    /// Multiplier from the control-plane unit to the backend unit, used in
    /// passthrough mode. Ignored when `remap_targets` is non-empty.
    pub unit_factor: i64,

    pub label: String,
    pub measured_unit: String,

    /// Backend-specific remapping: when non-empty, one control-plane value
    /// expands into one value per target, each scaled by its own factor.
    #[serde(default)]
    pub remap_targets: Vec<ComponentRemapTarget>,
}

impl Component {
    pub fn is_remapped(&self) -> bool {
        !self.remap_targets.is_empty()
    }
}

/// Immutable configuration record binding one control-plane offering UUID to
/// one backend driver instance and its parameters. Constructed once at
/// supervisor startup and destroyed at shutdown; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offering {
    pub name: String,
    pub uuid: Uuid,
    pub api_url: String,
    pub api_token: String,

    /// Identifies which concrete [`crate`]-external `BackendDriver` to
    /// construct for this offering (e.g. `"slurm"`, `"mup"`, `"unknown"`).
    pub backend_type: String,

    /// Driver-specific settings, passed through verbatim (endpoints,
    /// prefixes, credentials beyond `api_token`, ...).
    pub backend_settings: HashMap<String, String>,

    /// Components this offering charges, keyed by name. Invariant (spec.md
    /// §3): every component referenced in a limit or report must appear here.
    pub components: HashMap<String, Component>,

    /// Optional event-bus topic for event-driven dispatch (`spec.md` §4.8).
    pub messaging_topic: Option<String>,

    /// IANA timezone name used to compute billing-period boundaries for
    /// usage reporting (`spec.md` §4.7). Empty string means UTC.
    pub timezone: String,
}

impl Offering {
    /// Looks up a declared component by name, matching the invariant in
    /// `spec.md` §3 that every component touched by limits/reports must be
    /// declared on the offering.
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.get(name)
    }
}
