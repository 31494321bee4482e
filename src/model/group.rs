//! Service group entity

use super::ids::{SiId, SuId};
use super::states::{AdminState, RedundancyModel};
use crate::fsm::SgFsm;
use serde::{Deserialize, Serialize};

/// Preferred counts and per-unit limits of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SgLimits {
    /// N: preferred number of units carrying active assignments.
    pub pref_active_sus: u32,
    /// M: preferred number of units carrying standby assignments.
    pub pref_standby_sus: u32,
    /// Preferred number of in-service units, 0 = all units.
    pub pref_inservice_sus: u32,
    /// Maximum active assignments per unit, 0 = unlimited.
    pub max_active_sis_per_su: u32,
    /// Maximum standby assignments per unit, 0 = unlimited.
    pub max_standby_sis_per_su: u32,
}

impl SgLimits {
    /// Defaults that suit the given model.
    pub fn for_model(model: RedundancyModel) -> Self {
        let (active, standby) = match model {
            RedundancyModel::TwoN => (1, 1),
            RedundancyModel::NPlusM => (2, 1),
            RedundancyModel::NWay => (0, 0),
            RedundancyModel::NWayActive => (0, 0),
            RedundancyModel::NoRedundancy => (0, 0),
        };
        Self {
            pref_active_sus: active,
            pref_standby_sus: standby,
            pref_inservice_sus: 0,
            max_active_sis_per_su: 0,
            max_standby_sis_per_su: 0,
        }
    }
}

/// Fault escalation limits of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationLimits {
    pub comp_restart_max: u32,
    pub comp_restart_probation_ms: u64,
    pub su_restart_max: u32,
    pub su_restart_probation_ms: u64,
}

impl Default for EscalationLimits {
    fn default() -> Self {
        Self {
            comp_restart_max: 3,
            comp_restart_probation_ms: 60_000,
            su_restart_max: 2,
            su_restart_probation_ms: 120_000,
        }
    }
}

/// An instance moving its active role from one unit to a less loaded one.
/// The new active is confirmed before the old one is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiTransfer {
    pub si: SiId,
    pub from: SuId,
    pub to: SuId,
}

/// A set of units jointly implementing one redundancy model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceGroup {
    pub name: String,
    /// Bound at creation, never changed.
    pub model: RedundancyModel,
    pub limits: SgLimits,
    pub escalation: EscalationLimits,
    pub admin_state: AdminState,
    pub fsm: SgFsm,
    /// Member units ordered by rank.
    pub units: Vec<SuId>,
    /// Member instances ordered by rank.
    pub instances: Vec<SiId>,
    /// All member units share one rank.
    pub equal_ranked_su: bool,
    /// Cursor for round-robin placement among equally ranked units.
    pub last_selected: Option<SuId>,
    /// Move roles back to better-ranked units once the group is stable.
    #[serde(default)]
    pub auto_adjust: bool,
    /// Redistribution in progress.
    #[serde(default)]
    pub transfer: Option<SiTransfer>,
}

impl ServiceGroup {
    pub fn new(name: impl Into<String>, model: RedundancyModel, limits: SgLimits) -> Self {
        Self {
            name: name.into(),
            model,
            limits,
            escalation: EscalationLimits::default(),
            admin_state: AdminState::Unlocked,
            fsm: SgFsm::new(),
            units: Vec::new(),
            instances: Vec::new(),
            equal_ranked_su: false,
            last_selected: None,
            auto_adjust: false,
            transfer: None,
        }
    }

    pub fn with_escalation(mut self, escalation: EscalationLimits) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_auto_adjust(mut self, auto_adjust: bool) -> Self {
        self.auto_adjust = auto_adjust;
        self
    }

    /// Extra active record allowed while `si` is being moved.
    pub fn transfer_allowance(&self, si: SiId) -> u32 {
        match self.transfer {
            Some(transfer) if transfer.si == si => 1,
            _ => 0,
        }
    }
}
