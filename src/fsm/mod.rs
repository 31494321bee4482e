//! Service group state machine
//!
//! Serializes assignment work against one group.
//!
//! # Rules
//!
//! - Non-fault operations start only from `STABLE`
//! - Faults and dependency-driven unassignments merge into whatever is
//!   running; a stable group moves to the operation's state, a busy group
//!   keeps its state
//! - Adding a unit to the operation list of a stable group moves it to the
//!   state of the operation being dispatched
//! - A unit leaves the operation list once none of its records is busy
//! - `STABLE` is entered only with an empty operation list and no pending
//!   instance-level work

mod state;

pub use state::{SgFsm, SgFsmState};

use crate::checkpoint::FieldUpdate;
use crate::controller::Ctx;
use crate::model::{AdminState, ModelResult, ServiceGroup, SgId, SuId};
use crate::observability::Event;
use tracing::{debug, info};

/// Kind of operation dispatched against a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Realign,
    InstanceAssign,
    UnitFault,
    UnitAdmin,
    InstanceAdmin,
    Swap,
    GroupAdmin,
    /// Unassignment or reassignment driven by a sponsor.
    Dependency,
}

impl OperationKind {
    /// State a stable group enters when this operation adds work.
    pub fn target(self) -> SgFsmState {
        match self {
            OperationKind::Realign | OperationKind::InstanceAssign | OperationKind::Dependency => {
                SgFsmState::Realigning
            }
            OperationKind::UnitFault | OperationKind::UnitAdmin => SgFsmState::UnitOperation,
            OperationKind::InstanceAdmin | OperationKind::Swap => SgFsmState::InstanceOperation,
            OperationKind::GroupAdmin => SgFsmState::AdminOperation,
        }
    }

    /// Merged into a running operation instead of waiting for `STABLE`.
    pub fn merges(self) -> bool {
        matches!(self, OperationKind::UnitFault | OperationKind::Dependency)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Realign => "realign",
            OperationKind::InstanceAssign => "si_assign",
            OperationKind::UnitFault => "su_fault",
            OperationKind::UnitAdmin => "su_admin",
            OperationKind::InstanceAdmin => "si_admin",
            OperationKind::Swap => "si_swap",
            OperationKind::GroupAdmin => "sg_admin",
            OperationKind::Dependency => "dependency",
        }
    }
}

/// Whether the group accepts an operation of this kind right now.
pub fn admits(group: &ServiceGroup, kind: OperationKind) -> bool {
    kind.merges() || group.fsm.is_stable()
}

pub fn set_state(ctx: &mut Ctx, sg: SgId, state: SgFsmState) -> ModelResult<()> {
    let from = ctx.model.group(sg)?.fsm.state;
    if ctx.model.update(FieldUpdate::GroupFsmState { sg, state })? {
        info!(
            event = Event::FsmTransition.as_str(),
            group = %ctx.model.group(sg)?.name,
            from = from.as_str(),
            to = state.as_str(),
            "group state changed"
        );
    }
    Ok(())
}

fn leave_stable(ctx: &mut Ctx, sg: SgId) -> ModelResult<()> {
    if ctx.model.group(sg)?.fsm.is_stable() {
        let target = ctx
            .current_op
            .map(OperationKind::target)
            .unwrap_or(SgFsmState::Realigning);
        set_state(ctx, sg, target)?;
    }
    Ok(())
}

/// Put a unit on the operation list.
pub fn add_unit(ctx: &mut Ctx, sg: SgId, su: SuId) -> ModelResult<()> {
    ctx.model.update(FieldUpdate::GroupOperListAdd { sg, su })?;
    leave_stable(ctx, sg)
}

/// Take a unit off the operation list if none of its records is busy.
pub fn release_unit(ctx: &mut Ctx, su: SuId) -> ModelResult<bool> {
    let sg = ctx.model.unit(su)?.sg;
    let busy = ctx.model.unit_records(su).iter().any(|(_, r)| r.is_busy());
    if busy {
        return Ok(false);
    }
    let removed = ctx.model.update(FieldUpdate::GroupOperListRemove { sg, su })?;
    if removed {
        debug!(group = %sg, unit = %su, "unit left operation list");
    }
    Ok(removed)
}

/// Dispatch an operation against a group.
///
/// The operation returns whether it changed anything. A stable group that
/// ends up with pending instance-level work enters the operation's state
/// even when no unit was added to its operation list.
pub fn run<F>(ctx: &mut Ctx, sg: SgId, kind: OperationKind, op: F) -> ModelResult<bool>
where
    F: FnOnce(&mut Ctx) -> ModelResult<bool>,
{
    let previous = ctx.current_op.replace(kind);
    let result = op(ctx);
    ctx.current_op = previous;
    let changed = result?;

    if ctx.model.group(sg)?.fsm.is_stable() && has_pending_work(ctx, sg)? {
        set_state(ctx, sg, kind.target())?;
    }
    Ok(changed)
}

fn has_pending_work(ctx: &Ctx, sg: SgId) -> ModelResult<bool> {
    let group = ctx.model.group(sg)?;
    if !group.fsm.oper_list.is_empty() || group.fsm.admin_si.is_some() {
        return Ok(true);
    }
    for si in &group.instances {
        if ctx.model.instance(*si)?.pending_unassign.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Return a group to `STABLE` if all its work is done.
///
/// Returns true when the group transitioned.
pub fn try_stabilize(ctx: &mut Ctx, sg: SgId) -> ModelResult<bool> {
    let group = ctx.model.group(sg)?;
    if group.fsm.is_stable() || !group.fsm.oper_list.is_empty() {
        return Ok(false);
    }
    for si in &group.instances {
        if ctx.model.instance(*si)?.pending_unassign.is_some() {
            return Ok(false);
        }
    }
    ctx.model.update(FieldUpdate::GroupAdminSi { sg, si: None })?;
    finalize_admin(ctx, sg)?;
    set_state(ctx, sg, SgFsmState::Stable)?;
    info!(
        event = Event::GroupStable.as_str(),
        group = %ctx.model.group(sg)?.name,
        "group stable"
    );
    Ok(true)
}

/// Complete shutdowns whose entities have drained.
pub fn finalize_admin(ctx: &mut Ctx, sg: SgId) -> ModelResult<()> {
    let group = ctx.model.group(sg)?;
    let instances = group.instances.clone();
    let units = group.units.clone();
    let group_shutting_down = group.admin_state == AdminState::ShuttingDown;

    let mut group_drained = true;
    for si in instances {
        let instance = ctx.model.instance(si)?;
        let drained = instance.assignments.is_empty();
        group_drained &= drained;
        if drained && instance.admin_state == AdminState::ShuttingDown {
            ctx.model.update(FieldUpdate::InstanceAdminState {
                si,
                state: AdminState::Locked,
            })?;
        }
    }
    for su in units {
        let unit = ctx.model.unit(su)?;
        if unit.admin_state == AdminState::ShuttingDown && unit.assignments.is_empty() {
            ctx.model.update(FieldUpdate::UnitAdminState {
                su,
                state: AdminState::Locked,
            })?;
        }
    }
    if group_shutting_down && group_drained {
        ctx.model.update(FieldUpdate::GroupAdminState {
            sg,
            state: AdminState::Locked,
        })?;
    }
    Ok(())
}
