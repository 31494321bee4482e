//! Configuration types
//!
//! Mirrors the JSON layout:
//!
//! ```json
//! {
//!   "settings": { "max_settle_rounds": 64, "default_tolerance_ms": 5000 },
//!   "groups": [{ "name": "sg-web", "model": "two_n" }],
//!   "units": [{ "name": "su-1", "group": "sg-web", "node": "node-1", "rank": 1 }],
//!   "instances": [{ "name": "si-http", "group": "sg-web", "rank": 1 }],
//!   "dependencies": [{ "sponsor": "si-db", "dependent": "si-http" }]
//! }
//! ```

use crate::model::{EscalationLimits, RedundancyModel, SgLimits};
use serde::{Deserialize, Serialize};

/// Engine tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Upper bound on settle passes per event before the controller gives
    /// up converging and logs the group as still busy.
    pub max_settle_rounds: u32,
    /// Tolerance used by dependency edges that do not set one.
    pub default_tolerance_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_settle_rounds: 64,
            default_tolerance_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub model: RedundancyModel,
    /// Defaults to the model's usual limits.
    #[serde(default)]
    pub limits: Option<SgLimits>,
    #[serde(default)]
    pub escalation: EscalationLimits,
    /// Return roles to better-ranked units when they come back.
    #[serde(default)]
    pub auto_adjust: bool,
}

impl GroupConfig {
    pub fn new(name: impl Into<String>, model: RedundancyModel) -> Self {
        Self {
            name: name.into(),
            model,
            limits: None,
            escalation: EscalationLimits::default(),
            auto_adjust: false,
        }
    }

    pub fn effective_limits(&self) -> SgLimits {
        self.limits.unwrap_or_else(|| SgLimits::for_model(self.model))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConfig {
    pub name: String,
    pub group: String,
    pub node: String,
    #[serde(default)]
    pub rank: u32,
}

impl UnitConfig {
    pub fn new(
        name: impl Into<String>,
        group: impl Into<String>,
        node: impl Into<String>,
        rank: u32,
    ) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            node: node.into(),
            rank,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    pub group: String,
    #[serde(default)]
    pub rank: u32,
    /// Defaults to 1.
    #[serde(default)]
    pub pref_active: Option<u32>,
    /// Defaults to 1 where the group's model has a standby role, else 0.
    #[serde(default)]
    pub pref_standby: Option<u32>,
}

impl InstanceConfig {
    pub fn new(name: impl Into<String>, group: impl Into<String>, rank: u32) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            rank,
            pref_active: None,
            pref_standby: None,
        }
    }

    pub fn with_preferred(mut self, active: u32, standby: u32) -> Self {
        self.pref_active = Some(active);
        self.pref_standby = Some(standby);
        self
    }

    /// Preferred (active, standby) assignment counts under `model`.
    pub fn preferred(&self, model: RedundancyModel) -> (u32, u32) {
        let standby = if model.has_standby_role() { 1 } else { 0 };
        (
            self.pref_active.unwrap_or(1),
            self.pref_standby.unwrap_or(standby),
        )
    }
}

/// Edge "`dependent` depends on `sponsor`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyConfig {
    pub sponsor: String,
    pub dependent: String,
    /// Falls back to [`Settings::default_tolerance_ms`].
    #[serde(default)]
    pub tolerance_ms: Option<u64>,
}

/// Whole cluster configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub settings: Settings,
    pub groups: Vec<GroupConfig>,
    pub units: Vec<UnitConfig>,
    pub instances: Vec<InstanceConfig>,
    pub dependencies: Vec<DependencyConfig>,
}
