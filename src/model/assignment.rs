//! Assignment record shared by a unit and an instance

use super::ids::{SiId, SuId, SusiId};
use super::instance::RemovalMode;
use super::states::{HaState, SusiState};
use serde::{Deserialize, Serialize};

/// Step executed once the record's in-flight change is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUp {
    None,
    /// Take the record down (quiesce first if still active).
    Remove(RemovalMode),
    /// Record was quiesced because its unit failed: promote the peer and
    /// remove this record.
    Failover { peer: Option<SusiId> },
    /// Record was quiesced for a swap: promote the peer, then come back as
    /// standby.
    Swap { peer: SusiId },
    /// Record was promoted by a swap: demote the original active to standby.
    SwapBack { peer: SusiId },
}

/// SU-SI relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub su: SuId,
    pub si: SiId,
    /// Requested HA state (confirmed when `state` is `Assigned`).
    pub ha_state: HaState,
    pub state: SusiState,
    /// HA state last confirmed by the node, `None` until the first reply.
    pub confirmed_ha: Option<HaState>,
    pub follow_up: FollowUp,
    /// Waiting for the peer record of a swap to finish.
    pub awaiting_peer: bool,
}

impl Assignment {
    pub fn new(su: SuId, si: SiId, ha_state: HaState) -> Self {
        Self {
            su,
            si,
            ha_state,
            state: SusiState::Unassigned,
            confirmed_ha: None,
            follow_up: FollowUp::None,
            awaiting_peer: false,
        }
    }

    /// Scheduled to disappear once in-flight work completes.
    pub fn is_leaving(&self) -> bool {
        self.state == SusiState::Removing
            || matches!(self.follow_up, FollowUp::Remove(_) | FollowUp::Failover { .. })
    }

    /// Keeps its unit in the operation list.
    pub fn is_busy(&self) -> bool {
        self.state.in_flight() || self.awaiting_peer
    }

    /// Confirmed and idle in the given role.
    pub fn is_settled_as(&self, ha: HaState) -> bool {
        self.state == SusiState::Assigned
            && self.ha_state == ha
            && !self.is_leaving()
            && !self.awaiting_peer
    }
}

/// Identity triple carried on commands so replies can be matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRef {
    pub susi: SusiId,
    pub su: SuId,
    pub si: SiId,
}
