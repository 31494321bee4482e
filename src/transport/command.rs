//! Outbound commands toward node agents
//!
//! Every command carries the per-unit sequence number of its channel. The
//! number is stored on the unit and journaled, so a promoted standby keeps
//! counting where the old active stopped.

use crate::checkpoint::FieldUpdate;
use crate::model::{AssignmentRef, EntityModel, HaState, ModelResult, SuId};
use crate::observability::Event;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Command for one unit's node agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Assign an instance with the given HA state.
    Assign { record: AssignmentRef, ha: HaState },
    /// Change the HA state of an existing assignment.
    Modify { record: AssignmentRef, ha: HaState },
    /// Remove an assignment.
    Remove { record: AssignmentRef },
    Instantiate,
    Terminate,
    RestartUnit,
    RestartComponent { component: String },
    /// Ask the agent to resend everything after `from`.
    Resync { from: u64 },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Assign { .. } => "assign",
            Command::Modify { .. } => "modify",
            Command::Remove { .. } => "remove",
            Command::Instantiate => "instantiate",
            Command::Terminate => "terminate",
            Command::RestartUnit => "restart_unit",
            Command::RestartComponent { .. } => "restart_component",
            Command::Resync { .. } => "resync",
        }
    }

    /// Assignment record the command refers to.
    pub fn record(&self) -> Option<AssignmentRef> {
        match self {
            Command::Assign { record, .. }
            | Command::Modify { record, .. }
            | Command::Remove { record } => Some(*record),
            _ => None,
        }
    }
}

/// A command addressed to a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outbound {
    pub su: SuId,
    pub unit: String,
    pub node: String,
    /// Strictly increasing per unit, starting at 1.
    pub seq: u64,
    pub command: Command,
}

/// Ordered queue of commands produced while handling events.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    queue: Vec<Outbound>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp a command with the unit's next sequence number and queue it.
    pub fn send(
        &mut self,
        model: &mut EntityModel,
        su: SuId,
        command: Command,
    ) -> ModelResult<u64> {
        let unit = model.unit(su)?;
        let seq = unit.snd_msg_id + 1;
        let outbound = Outbound {
            su,
            unit: unit.name.clone(),
            node: unit.node.clone(),
            seq,
            command,
        };
        model.update(FieldUpdate::UnitSndMsgId { su, id: seq })?;
        debug!(
            event = Event::CommandSent.as_str(),
            unit = %outbound.unit,
            seq,
            command = outbound.command.name(),
            "command queued"
        );
        self.queue.push(outbound);
        Ok(seq)
    }

    pub fn drain(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.queue)
    }

    pub fn pending(&self) -> &[Outbound] {
        &self.queue
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
