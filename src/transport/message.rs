//! Inbound messages from node agents

use crate::model::{HaState, PresenceState, SuId, SusiId};
use serde::{Deserialize, Serialize};

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    /// Unit presence changed.
    Presence { state: PresenceState },
    /// Outcome of an assign or modify (`ha` set) or a remove (`ha` empty).
    AssignmentReply {
        susi: SusiId,
        ha: Option<HaState>,
        accepted: bool,
    },
    /// A component of the unit failed.
    ComponentFailed { component: String },
    /// The unit as a whole failed.
    UnitFailed,
    /// Outcome of an instantiate, terminate or restart command.
    AdminReply { success: bool },
}

/// Message tagged with its unit and per-unit id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMessage {
    pub su: SuId,
    pub msg_id: u64,
    pub body: MessageBody,
}

impl NodeMessage {
    pub fn new(su: SuId, msg_id: u64, body: MessageBody) -> Self {
        Self { su, msg_id, body }
    }

    pub fn presence(su: SuId, msg_id: u64, state: PresenceState) -> Self {
        Self::new(su, msg_id, MessageBody::Presence { state })
    }

    pub fn assigned(su: SuId, msg_id: u64, susi: SusiId, ha: HaState) -> Self {
        Self::new(
            su,
            msg_id,
            MessageBody::AssignmentReply {
                susi,
                ha: Some(ha),
                accepted: true,
            },
        )
    }

    pub fn removed(su: SuId, msg_id: u64, susi: SusiId) -> Self {
        Self::new(
            su,
            msg_id,
            MessageBody::AssignmentReply {
                susi,
                ha: None,
                accepted: true,
            },
        )
    }

    pub fn rejected(su: SuId, msg_id: u64, susi: SusiId, ha: Option<HaState>) -> Self {
        Self::new(
            su,
            msg_id,
            MessageBody::AssignmentReply {
                susi,
                ha,
                accepted: false,
            },
        )
    }

    pub fn kind(&self) -> &'static str {
        match self.body {
            MessageBody::Presence { .. } => "presence",
            MessageBody::AssignmentReply { .. } => "assignment_reply",
            MessageBody::ComponentFailed { .. } => "component_failed",
            MessageBody::UnitFailed => "unit_failed",
            MessageBody::AdminReply { .. } => "admin_reply",
        }
    }
}
