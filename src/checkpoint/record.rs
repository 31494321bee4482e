//! Checkpoint records
//!
//! One record per entity-model mutation. The active controller applies a
//! record to its own model and publishes it; a standby applies the same
//! record and ends up in the same state.

use crate::fsm::SgFsmState;
use crate::model::{
    AdminState, Assignment, EntityId, EscalationCounters, EscalationLimits, FollowUp, HaState,
    OperState, PresenceState, RemovalMode, ServiceGroup, ServiceInstance, ServiceUnit, SgId,
    SgLimits, SiAssignmentState, SiDepState, SiId, SiTransfer, SuId, SusiId, SusiState,
};
use serde::{Deserialize, Serialize};

use super::errors::{CheckpointError, CheckpointResult};

/// Full entity carried by a creation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityRecord {
    Group { id: SgId, group: ServiceGroup },
    Unit { id: SuId, unit: ServiceUnit },
    Instance { id: SiId, instance: ServiceInstance },
    Assignment { id: SusiId, assignment: Assignment },
}

impl EntityRecord {
    pub fn id(&self) -> EntityId {
        match self {
            EntityRecord::Group { id, .. } => EntityId::Group(*id),
            EntityRecord::Unit { id, .. } => EntityId::Unit(*id),
            EntityRecord::Instance { id, .. } => EntityId::Instance(*id),
            EntityRecord::Assignment { id, .. } => EntityId::Assignment(*id),
        }
    }
}

/// Single-field change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum FieldUpdate {
    GroupAdminState { sg: SgId, state: AdminState },
    GroupLimits { sg: SgId, limits: SgLimits },
    GroupEscalation { sg: SgId, escalation: EscalationLimits },
    GroupFsmState { sg: SgId, state: SgFsmState },
    GroupOperListAdd { sg: SgId, su: SuId },
    GroupOperListRemove { sg: SgId, su: SuId },
    GroupAdminSi { sg: SgId, si: Option<SiId> },
    GroupLastSelected { sg: SgId, su: Option<SuId> },
    GroupAutoAdjust { sg: SgId, enabled: bool },
    GroupTransfer { sg: SgId, transfer: Option<SiTransfer> },

    UnitAdminState { su: SuId, state: AdminState },
    UnitOperState { su: SuId, state: OperState },
    UnitPresence { su: SuId, state: PresenceState },
    UnitEscalation { su: SuId, counters: EscalationCounters },
    UnitRcvMsgId { su: SuId, id: u64 },
    UnitSndMsgId { su: SuId, id: u64 },
    UnitResyncPending { su: SuId, pending: bool },

    InstanceAdminState { si: SiId, state: AdminState },
    InstanceAssignmentState { si: SiId, state: SiAssignmentState },
    InstanceDepState { si: SiId, state: SiDepState },
    InstancePreferred { si: SiId, active: u32, standby: u32 },
    InstancePendingUnassign { si: SiId, mode: Option<RemovalMode> },
    InstanceAlarmSent { si: SiId, sent: bool },
    DependencyAdded { sponsor: SiId, dependent: SiId, tolerance_ms: u64 },
    DependencyRemoved { sponsor: SiId, dependent: SiId },

    AssignmentHaState { susi: SusiId, ha: HaState },
    AssignmentState { susi: SusiId, state: SusiState },
    AssignmentConfirmed { susi: SusiId, ha: Option<HaState> },
    AssignmentFollowUp { susi: SusiId, follow_up: FollowUp },
    AssignmentAwaitingPeer { susi: SusiId, awaiting: bool },
}

impl FieldUpdate {
    /// Entity the update applies to.
    pub fn target(&self) -> EntityId {
        use FieldUpdate::*;
        match self {
            GroupAdminState { sg, .. }
            | GroupLimits { sg, .. }
            | GroupEscalation { sg, .. }
            | GroupFsmState { sg, .. }
            | GroupOperListAdd { sg, .. }
            | GroupOperListRemove { sg, .. }
            | GroupAdminSi { sg, .. }
            | GroupLastSelected { sg, .. }
            | GroupAutoAdjust { sg, .. }
            | GroupTransfer { sg, .. } => EntityId::Group(*sg),
            UnitAdminState { su, .. }
            | UnitOperState { su, .. }
            | UnitPresence { su, .. }
            | UnitEscalation { su, .. }
            | UnitRcvMsgId { su, .. }
            | UnitSndMsgId { su, .. }
            | UnitResyncPending { su, .. } => EntityId::Unit(*su),
            InstanceAdminState { si, .. }
            | InstanceAssignmentState { si, .. }
            | InstanceDepState { si, .. }
            | InstancePreferred { si, .. }
            | InstancePendingUnassign { si, .. }
            | InstanceAlarmSent { si, .. } => EntityId::Instance(*si),
            DependencyAdded { sponsor, .. } | DependencyRemoved { sponsor, .. } => {
                EntityId::Instance(*sponsor)
            }
            AssignmentHaState { susi, .. }
            | AssignmentState { susi, .. }
            | AssignmentConfirmed { susi, .. }
            | AssignmentFollowUp { susi, .. }
            | AssignmentAwaitingPeer { susi, .. } => EntityId::Assignment(*susi),
        }
    }
}

/// A journaled mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CheckpointRecord {
    Create { entity: EntityRecord },
    Delete { id: EntityId },
    Update { update: FieldUpdate },
}

impl CheckpointRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            CheckpointRecord::Create { .. } => "create",
            CheckpointRecord::Delete { .. } => "delete",
            CheckpointRecord::Update { .. } => "update",
        }
    }
}

/// A record with its position in the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEnvelope {
    /// Strictly increasing, starting at 1.
    pub seq: u64,
    pub record: CheckpointRecord,
}

impl CheckpointEnvelope {
    pub fn to_json(&self) -> CheckpointResult<String> {
        serde_json::to_string(self).map_err(|e| CheckpointError::Encode(e.to_string()))
    }

    pub fn from_json(line: &str) -> CheckpointResult<Self> {
        serde_json::from_str(line).map_err(|e| CheckpointError::Decode(e.to_string()))
    }
}
