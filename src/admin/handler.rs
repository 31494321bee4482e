//! Administrative request dispatch
//!
//! The owning group must be stable, otherwise the request is rejected with
//! `RejectedInUse` before anything else is checked. The target's admin
//! state is recorded first and the group operation dispatched after, so a
//! realign triggered on the way already sees the new state.

use super::{AdminOp, AdminRequest, AdminResponse, AdminTarget};
use crate::checkpoint::FieldUpdate;
use crate::controller::Ctx;
use crate::fsm::{self, OperationKind};
use crate::model::{
    AdminState, ModelError, ModelResult, PresenceState, RemovalMode, SgId, SiId, SuId,
};
use crate::observability::Event;
use crate::redundancy;
use crate::transport::Command;
use tracing::{info, warn};

/// Apply a request. Returns the immediate response and the owning group.
///
/// `Accepted` means the operation was started; whether it already
/// finished is decided by the caller once the event has settled.
pub fn dispatch(ctx: &mut Ctx, request: &AdminRequest) -> ModelResult<(AdminResponse, SgId)> {
    ctx.metrics.increment_admin_requests();
    let sg = owning_group(ctx, &request.target)?;

    let response = if !ctx.model.group(sg)?.fsm.is_stable() {
        AdminResponse::RejectedInUse
    } else {
        match &request.target {
            AdminTarget::Group(_) => group_op(ctx, sg, request.op)?,
            AdminTarget::Unit(name) => {
                let su = ctx.model.unit_id(name)?;
                unit_op(ctx, sg, su, request.op)?
            }
            AdminTarget::Instance(name) => {
                let si = ctx.model.instance_id(name)?;
                instance_op(ctx, sg, si, request.op)?
            }
        }
    };

    if response.is_rejected() {
        ctx.metrics.increment_admin_rejections();
        warn!(
            event = Event::AdminRejected.as_str(),
            invocation = request.invocation,
            target = request.target.kind(),
            name = request.target.name(),
            op = request.op.as_str(),
            response = response.as_str(),
            "admin request rejected"
        );
    } else {
        info!(
            event = Event::AdminAccepted.as_str(),
            invocation = request.invocation,
            target = request.target.kind(),
            name = request.target.name(),
            op = request.op.as_str(),
            "admin request accepted"
        );
    }
    Ok((response, sg))
}

fn owning_group(ctx: &Ctx, target: &AdminTarget) -> ModelResult<SgId> {
    match target {
        AdminTarget::Group(name) => ctx.model.group_id(name),
        AdminTarget::Unit(name) => Ok(ctx.model.unit(ctx.model.unit_id(name)?)?.sg),
        AdminTarget::Instance(name) => Ok(ctx.model.instance(ctx.model.instance_id(name)?)?.sg),
    }
}

fn removal_mode(op: AdminOp) -> RemovalMode {
    if op == AdminOp::Shutdown {
        RemovalMode::Shutdown
    } else {
        RemovalMode::Lock
    }
}

fn down_state(op: AdminOp) -> AdminState {
    if op == AdminOp::Shutdown {
        AdminState::ShuttingDown
    } else {
        AdminState::Locked
    }
}

/// Lock is allowed from unlocked and from shutting-down; shutdown only
/// from unlocked.
fn may_go_down(current: AdminState, op: AdminOp) -> bool {
    match op {
        AdminOp::Lock => matches!(current, AdminState::Unlocked | AdminState::ShuttingDown),
        AdminOp::Shutdown => current == AdminState::Unlocked,
        _ => false,
    }
}

fn send(ctx: &mut Ctx, su: SuId, command: Command) -> ModelResult<()> {
    ctx.outbox.send(&mut ctx.model, su, command)?;
    ctx.metrics.increment_commands();
    Ok(())
}

fn restart_unit(ctx: &mut Ctx, su: SuId) -> ModelResult<()> {
    ctx.model.update(FieldUpdate::UnitPresence {
        su,
        state: PresenceState::Restarting,
    })?;
    send(ctx, su, Command::RestartUnit)
}

fn group_op(ctx: &mut Ctx, sg: SgId, op: AdminOp) -> ModelResult<AdminResponse> {
    let strategy = redundancy::for_group(ctx, sg)?;
    let current = ctx.model.group(sg)?.admin_state;
    match op {
        AdminOp::Lock | AdminOp::Shutdown => {
            if !may_go_down(current, op) {
                return Ok(AdminResponse::RejectedInvalidState);
            }
            ctx.model.update(FieldUpdate::GroupAdminState {
                sg,
                state: down_state(op),
            })?;
            let mode = removal_mode(op);
            fsm::run(ctx, sg, OperationKind::GroupAdmin, |ctx| {
                strategy.sg_admin_down(ctx, sg, mode)
            })?;
        }
        AdminOp::Unlock => {
            if current != AdminState::Locked {
                return Ok(AdminResponse::RejectedInvalidState);
            }
            ctx.model.update(FieldUpdate::GroupAdminState {
                sg,
                state: AdminState::Unlocked,
            })?;
            fsm::run(ctx, sg, OperationKind::GroupAdmin, |ctx| {
                strategy.realign(ctx, sg)
            })?;
        }
        AdminOp::Restart => {
            if current != AdminState::Unlocked {
                return Ok(AdminResponse::RejectedInvalidState);
            }
            let units: Vec<SuId> = ctx.model.group(sg)?.units.clone();
            for su in units {
                if ctx.model.unit(su)?.is_in_service() {
                    restart_unit(ctx, su)?;
                }
            }
        }
        AdminOp::Swap | AdminOp::LockInstantiation | AdminOp::UnlockInstantiation => {
            return Ok(AdminResponse::RejectedInvalidState);
        }
    }
    Ok(AdminResponse::Accepted)
}

fn unit_op(ctx: &mut Ctx, sg: SgId, su: SuId, op: AdminOp) -> ModelResult<AdminResponse> {
    let strategy = redundancy::for_group(ctx, sg)?;
    let unit = ctx.model.unit(su)?;
    let current = unit.admin_state;
    let holds_records = !unit.assignments.is_empty();
    match op {
        AdminOp::Lock | AdminOp::Shutdown => {
            if !may_go_down(current, op) {
                return Ok(AdminResponse::RejectedInvalidState);
            }
            ctx.model.update(FieldUpdate::UnitAdminState {
                su,
                state: down_state(op),
            })?;
            let mode = removal_mode(op);
            fsm::run(ctx, sg, OperationKind::UnitAdmin, |ctx| {
                strategy.su_admin_down(ctx, sg, su, mode)
            })?;
        }
        AdminOp::Unlock => {
            if current != AdminState::Locked {
                return Ok(AdminResponse::RejectedInvalidState);
            }
            ctx.model.update(FieldUpdate::UnitAdminState {
                su,
                state: AdminState::Unlocked,
            })?;
            if ctx.model.unit(su)?.is_in_service() {
                fsm::run(ctx, sg, OperationKind::UnitAdmin, |ctx| {
                    strategy.su_insvc(ctx, sg, su)
                })?;
            }
        }
        AdminOp::Restart => {
            if current != AdminState::Unlocked || !ctx.model.unit(su)?.is_in_service() {
                return Ok(AdminResponse::RejectedInvalidState);
            }
            restart_unit(ctx, su)?;
        }
        AdminOp::LockInstantiation => {
            if current != AdminState::Locked || holds_records {
                return Ok(AdminResponse::RejectedInvalidState);
            }
            ctx.model.update(FieldUpdate::UnitAdminState {
                su,
                state: AdminState::LockedInstantiation,
            })?;
            ctx.model.update(FieldUpdate::UnitPresence {
                su,
                state: PresenceState::Terminating,
            })?;
            send(ctx, su, Command::Terminate)?;
        }
        AdminOp::UnlockInstantiation => {
            if current != AdminState::LockedInstantiation {
                return Ok(AdminResponse::RejectedInvalidState);
            }
            ctx.model.update(FieldUpdate::UnitAdminState {
                su,
                state: AdminState::Locked,
            })?;
            ctx.model.update(FieldUpdate::UnitPresence {
                su,
                state: PresenceState::Instantiating,
            })?;
            send(ctx, su, Command::Instantiate)?;
        }
        AdminOp::Swap => return Ok(AdminResponse::RejectedInvalidState),
    }
    Ok(AdminResponse::Accepted)
}

fn instance_op(ctx: &mut Ctx, sg: SgId, si: SiId, op: AdminOp) -> ModelResult<AdminResponse> {
    let strategy = redundancy::for_group(ctx, sg)?;
    let current = ctx.model.instance(si)?.admin_state;
    match op {
        AdminOp::Lock | AdminOp::Shutdown => {
            if !may_go_down(current, op) {
                return Ok(AdminResponse::RejectedInvalidState);
            }
            ctx.model.update(FieldUpdate::InstanceAdminState {
                si,
                state: down_state(op),
            })?;
            let mode = removal_mode(op);
            fsm::run(ctx, sg, OperationKind::InstanceAdmin, |ctx| {
                strategy.si_admin_down(ctx, sg, si, mode)
            })?;
        }
        AdminOp::Unlock => {
            if current != AdminState::Locked {
                return Ok(AdminResponse::RejectedInvalidState);
            }
            ctx.model.update(FieldUpdate::InstanceAdminState {
                si,
                state: AdminState::Unlocked,
            })?;
            fsm::run(ctx, sg, OperationKind::InstanceAssign, |ctx| {
                strategy.si_assign(ctx, sg, si)
            })?;
        }
        AdminOp::Swap => {
            if current != AdminState::Unlocked {
                return Ok(AdminResponse::RejectedInvalidState);
            }
            let swapped = fsm::run(ctx, sg, OperationKind::Swap, |ctx| {
                strategy.si_swap(ctx, sg, si)
            });
            match swapped {
                Ok(true) => {}
                Ok(false) | Err(ModelError::InvalidState(_)) => {
                    return Ok(AdminResponse::RejectedInvalidState);
                }
                Err(err) => return Err(err),
            }
        }
        AdminOp::Restart | AdminOp::LockInstantiation | AdminOp::UnlockInstantiation => {
            return Ok(AdminResponse::RejectedInvalidState);
        }
    }
    Ok(AdminResponse::Accepted)
}
