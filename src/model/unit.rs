//! Service unit entity

use super::ids::{SgId, SusiId};
use super::states::{AdminState, OperState, PresenceState, ReadinessState};
use serde::{Deserialize, Serialize};

/// Escalation tier currently applied to a unit's faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    /// Component restart.
    #[default]
    Component,
    /// Unit restart.
    Unit,
    /// Unit failover, then node-level recovery.
    Failover,
}

/// Restart counters kept per unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EscalationCounters {
    pub level: EscalationLevel,
    pub comp_restarts: u32,
    pub su_restarts: u32,
}

/// A deployable hosting entity that instances are assigned to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceUnit {
    pub name: String,
    /// Owning group, lookup only.
    pub sg: SgId,
    /// Node hosting the unit.
    pub node: String,
    pub rank: u32,
    pub admin_state: AdminState,
    pub oper_state: OperState,
    pub presence: PresenceState,
    /// Shared assignment records, in creation order.
    pub assignments: Vec<SusiId>,
    pub escalation: EscalationCounters,
    /// Last message id accepted from this unit's agent.
    pub rcv_msg_id: u64,
    /// Last sequence number sent toward this unit's agent.
    pub snd_msg_id: u64,
    /// A resync request is outstanding on this channel.
    pub resync_pending: bool,
}

impl ServiceUnit {
    pub fn new(name: impl Into<String>, sg: SgId, node: impl Into<String>, rank: u32) -> Self {
        Self {
            name: name.into(),
            sg,
            node: node.into(),
            rank,
            admin_state: AdminState::Unlocked,
            oper_state: OperState::Enabled,
            presence: PresenceState::Uninstantiated,
            assignments: Vec::new(),
            escalation: EscalationCounters::default(),
            rcv_msg_id: 0,
            snd_msg_id: 0,
            resync_pending: false,
        }
    }

    pub fn readiness(&self) -> ReadinessState {
        ReadinessState::derive(self.admin_state, self.oper_state, self.presence)
    }

    pub fn is_in_service(&self) -> bool {
        self.readiness() == ReadinessState::InService
    }
}
