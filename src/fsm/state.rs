//! Group state machine data
//!
//! The state, operation list and pending instance-level operation of one
//! service group. Stored inside the group entity and mutated only through
//! the journaled model API.

use crate::model::{SiId, SuId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Group state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SgFsmState {
    Stable,
    Realigning,
    UnitOperation,
    InstanceOperation,
    AdminOperation,
}

impl SgFsmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SgFsmState::Stable => "STABLE",
            SgFsmState::Realigning => "REALIGNING",
            SgFsmState::UnitOperation => "UNIT_OPERATION",
            SgFsmState::InstanceOperation => "INSTANCE_OPERATION",
            SgFsmState::AdminOperation => "ADMIN_OPERATION",
        }
    }

    pub fn is_stable(&self) -> bool {
        matches!(self, SgFsmState::Stable)
    }
}

impl fmt::Display for SgFsmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-group state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SgFsm {
    pub state: SgFsmState,
    /// Units with outstanding assignment work, in insertion order.
    pub oper_list: Vec<SuId>,
    /// Instance targeted by the running instance-level operation.
    pub admin_si: Option<SiId>,
}

impl Default for SgFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl SgFsm {
    pub fn new() -> Self {
        Self {
            state: SgFsmState::Stable,
            oper_list: Vec::new(),
            admin_si: None,
        }
    }

    pub fn is_stable(&self) -> bool {
        self.state.is_stable()
    }

    pub fn in_oper_list(&self, su: SuId) -> bool {
        self.oper_list.contains(&su)
    }

    /// Stable with work outstanding.
    pub fn is_inconsistent(&self) -> bool {
        self.is_stable() && (!self.oper_list.is_empty() || self.admin_si.is_some())
    }
}
