//! Dependency state transitions
//!
//! ```text
//! NO_DEPENDENCY ──edge added──▶ ASSIGNED | SPONSOR_UNASSIGNED
//! ASSIGNED ──sponsor failing over──▶ FAILOVER_IN_PROGRESS
//! ASSIGNED | FAILOVER_IN_PROGRESS ──sponsor lost──▶ TOL_TIMER_RUNNING
//! TOL_TIMER_RUNNING ──expiry, group stable──▶ UNASSIGNING_DUE_TO_DEP
//! TOL_TIMER_RUNNING ──expiry, group busy──▶ READY_TO_UNASSIGN
//! READY_TO_UNASSIGN ──group stable──▶ UNASSIGNING_DUE_TO_DEP
//! UNASSIGNING_DUE_TO_DEP ──drained──▶ READY_TO_ASSIGN | ASSIGNED
//! READY_TO_ASSIGN | SPONSOR_UNASSIGNED ──sponsors assigned──▶ ASSIGNED
//! ```

use crate::checkpoint::FieldUpdate;
use crate::controller::Ctx;
use crate::fsm::{self, OperationKind};
use crate::model::{ModelResult, RemovalMode, SgId, SiAssignmentState, SiDepState, SiId};
use crate::observability::Event;
use crate::redundancy::{self, actions};
use crate::timer::{deadline_after, TimerKey};
use tracing::{debug, info};

fn set_dep_state(ctx: &mut Ctx, si: SiId, state: SiDepState) -> ModelResult<bool> {
    let from = ctx.model.instance(si)?.dep_state;
    let changed = ctx.model.update(FieldUpdate::InstanceDepState { si, state })?;
    if changed {
        info!(
            event = Event::DependencyState.as_str(),
            instance = %ctx.model.instance(si)?.name,
            from = from.as_str(),
            to = state.as_str(),
            "dependency state changed"
        );
    }
    Ok(changed)
}

fn has_records(ctx: &Ctx, si: SiId) -> ModelResult<bool> {
    Ok(!ctx.model.instance(si)?.assignments.is_empty())
}

/// Sponsor states as seen by dependents; a sponsor waiting to be removed
/// already counts as being removed.
fn sponsor_states(ctx: &Ctx, si: SiId) -> ModelResult<Vec<(SiId, SiAssignmentState)>> {
    let sponsors = ctx.model.instance(si)?.sponsors.clone();
    sponsors
        .into_iter()
        .map(|s| {
            let sponsor = ctx.model.instance(s)?;
            let state = if sponsor.pending_unassign.is_some() {
                SiAssignmentState::BeingRemoved
            } else {
                sponsor.assignment_state
            };
            Ok((s, state))
        })
        .collect()
}

fn stop_tolerance_timers(ctx: &mut Ctx, dependent: SiId) -> ModelResult<()> {
    let sponsors = ctx.model.instance(dependent)?.sponsors.clone();
    for sponsor in sponsors {
        ctx.timers.stop(&TimerKey::Tolerance { dependent, sponsor });
    }
    Ok(())
}

fn assign_dependent(ctx: &mut Ctx, si: SiId) -> ModelResult<bool> {
    if has_records(ctx, si)? {
        return Ok(false);
    }
    let sg = ctx.model.instance(si)?.sg;
    let strategy = redundancy::for_group(ctx, sg)?;
    fsm::run(ctx, sg, OperationKind::Dependency, |ctx| {
        strategy.si_assign(ctx, sg, si)
    })
}

/// Recompute a dependent's state from its sponsors' assignment states.
pub fn evaluate_dependent(ctx: &mut Ctx, si: SiId) -> ModelResult<()> {
    let current = ctx.model.instance(si)?.dep_state;
    let sponsors = sponsor_states(ctx, si)?;

    if sponsors.is_empty() {
        stop_tolerance_timers(ctx, si)?;
        if matches!(
            current,
            SiDepState::UnassigningDueToDep | SiDepState::ReadyToUnassign
        ) {
            return Ok(());
        }
        set_dep_state(ctx, si, SiDepState::NoDependency)?;
        assign_dependent(ctx, si)?;
        return Ok(());
    }

    if matches!(
        current,
        SiDepState::UnassigningDueToDep | SiDepState::ReadyToUnassign
    ) {
        return Ok(());
    }

    let all_assigned = sponsors
        .iter()
        .all(|(_, state)| *state == SiAssignmentState::Assigned);
    if all_assigned {
        stop_tolerance_timers(ctx, si)?;
        set_dep_state(ctx, si, SiDepState::Assigned)?;
        assign_dependent(ctx, si)?;
        return Ok(());
    }

    if !has_records(ctx, si)? {
        if matches!(current, SiDepState::ReadyToAssign) {
            return Ok(());
        }
        stop_tolerance_timers(ctx, si)?;
        set_dep_state(ctx, si, SiDepState::SponsorUnassigned)?;
        return Ok(());
    }

    let lost: Vec<SiId> = sponsors
        .iter()
        .filter(|(_, state)| {
            matches!(
                state,
                SiAssignmentState::Unassigned | SiAssignmentState::BeingRemoved
            )
        })
        .map(|(s, _)| *s)
        .collect();
    if lost.is_empty() {
        if current != SiDepState::TolTimerRunning {
            set_dep_state(ctx, si, SiDepState::FailoverInProgress)?;
        }
        return Ok(());
    }

    set_dep_state(ctx, si, SiDepState::TolTimerRunning)?;
    for sponsor in lost {
        start_tolerance(ctx, sponsor, si)?;
    }
    Ok(())
}

fn start_tolerance(ctx: &mut Ctx, sponsor: SiId, dependent: SiId) -> ModelResult<()> {
    let key = TimerKey::Tolerance { dependent, sponsor };
    if ctx.timers.is_armed(&key) {
        return Ok(());
    }
    let tolerance_ms = ctx
        .model
        .instance(sponsor)?
        .tolerance_for(dependent)
        .unwrap_or(ctx.settings.default_tolerance_ms);
    if tolerance_ms == 0 {
        return on_tolerance_expired(ctx, dependent, sponsor);
    }
    ctx.timers.start(key, deadline_after(ctx.now, tolerance_ms));
    info!(
        event = Event::ToleranceStarted.as_str(),
        dependent = %ctx.model.instance(dependent)?.name,
        sponsor = %ctx.model.instance(sponsor)?.name,
        tolerance_ms,
        "tolerance timer started"
    );
    Ok(())
}

/// A dependent's grace period ran out.
///
/// A no-op unless the dependent is still waiting on the timer, so a late
/// or repeated expiry changes nothing.
pub fn on_tolerance_expired(ctx: &mut Ctx, dependent: SiId, sponsor: SiId) -> ModelResult<()> {
    let Ok(instance) = ctx.model.instance(dependent) else {
        return Ok(());
    };
    if instance.dep_state != SiDepState::TolTimerRunning {
        debug!(instance = %instance.name, "stale tolerance expiry");
        return Ok(());
    }
    info!(
        event = Event::ToleranceExpired.as_str(),
        dependent = %instance.name,
        sponsor = %sponsor,
        "tolerance expired"
    );
    stop_tolerance_timers(ctx, dependent)?;
    let sg = ctx.model.instance(dependent)?.sg;
    if ctx.model.group(sg)?.fsm.is_stable() {
        unassign_dependent(ctx, dependent)?;
    } else {
        set_dep_state(ctx, dependent, SiDepState::ReadyToUnassign)?;
    }
    Ok(())
}

fn unassign_dependent(ctx: &mut Ctx, si: SiId) -> ModelResult<bool> {
    set_dep_state(ctx, si, SiDepState::UnassigningDueToDep)?;
    let sg = ctx.model.instance(si)?.sg;
    let changed = fsm::run(ctx, sg, OperationKind::Dependency, |ctx| {
        actions::retire_instance(ctx, si, RemovalMode::Lock)
    })?;
    if !has_records(ctx, si)? {
        on_drained(ctx, si)?;
    }
    Ok(changed)
}

/// Unassign the dependents of a stable group that were waiting for it.
pub fn process_ready_to_unassign(ctx: &mut Ctx, sg: SgId) -> ModelResult<bool> {
    if !ctx.model.group(sg)?.fsm.is_stable() {
        return Ok(false);
    }
    let waiting: Vec<SiId> = ctx
        .model
        .group(sg)?
        .instances
        .iter()
        .copied()
        .filter(|si| {
            ctx.model
                .instance(*si)
                .map_or(false, |i| i.dep_state == SiDepState::ReadyToUnassign)
        })
        .collect();
    let mut changed = false;
    for si in waiting {
        changed |= unassign_dependent(ctx, si)?;
    }
    Ok(changed)
}

/// An instance lost its last record.
fn on_drained(ctx: &mut Ctx, si: SiId) -> ModelResult<()> {
    if ctx.model.instance(si)?.dep_state != SiDepState::UnassigningDueToDep {
        return Ok(());
    }
    let sponsors = sponsor_states(ctx, si)?;
    let restored = !sponsors.is_empty()
        && sponsors
            .iter()
            .all(|(_, state)| *state == SiAssignmentState::Assigned);
    if sponsors.is_empty() {
        set_dep_state(ctx, si, SiDepState::NoDependency)?;
        assign_dependent(ctx, si)?;
    } else if restored {
        set_dep_state(ctx, si, SiDepState::Assigned)?;
        assign_dependent(ctx, si)?;
    } else {
        set_dep_state(ctx, si, SiDepState::ReadyToAssign)?;
    }
    Ok(())
}

/// React to an instance whose assignment state changed.
///
/// Its dependents are re-evaluated; if it drained, its own dependency
/// state advances and sponsors waiting for it continue their removal.
pub fn on_instance_changed(ctx: &mut Ctx, si: SiId) -> ModelResult<()> {
    let Ok(instance) = ctx.model.instance(si) else {
        return Ok(());
    };
    let dependents: Vec<SiId> = instance.dependents.iter().map(|d| d.si).collect();
    let sponsors = instance.sponsors.clone();
    let drained = instance.assignments.is_empty();

    for dependent in dependents {
        evaluate_dependent(ctx, dependent)?;
    }
    if drained {
        on_drained(ctx, si)?;
        for sponsor in sponsors {
            continue_pending(ctx, sponsor)?;
        }
    }
    Ok(())
}

/// Retire a sponsor whose removal was waiting for its dependents.
fn continue_pending(ctx: &mut Ctx, si: SiId) -> ModelResult<bool> {
    let instance = ctx.model.instance(si)?;
    let Some(mode) = instance.pending_unassign else {
        return Ok(false);
    };
    let dependents: Vec<SiId> = instance.dependents.iter().map(|d| d.si).collect();
    for dependent in dependents {
        if has_records(ctx, dependent)? {
            return Ok(false);
        }
    }
    ctx.model
        .update(FieldUpdate::InstancePendingUnassign { si, mode: None })?;
    debug!(instance = %ctx.model.instance(si)?.name, "dependents drained, removing sponsor");
    let sg = ctx.model.instance(si)?.sg;
    fsm::run(ctx, sg, OperationKind::InstanceAdmin, |ctx| {
        actions::retire_instance(ctx, si, mode)
    })
}

/// Administrative removal of an instance, dependents first.
///
/// Dependents holding records are unassigned (recursively, their own
/// dependents before them) and the instance waits with a pending marker
/// until they have drained.
pub fn begin_admin_unassign(ctx: &mut Ctx, si: SiId, mode: RemovalMode) -> ModelResult<bool> {
    let dependents: Vec<SiId> = ctx
        .model
        .instance(si)?
        .dependents
        .iter()
        .map(|d| d.si)
        .collect();
    let mut changed = false;
    let mut waiting = false;
    for dependent in dependents {
        if !has_records(ctx, dependent)? {
            continue;
        }
        set_dep_state(ctx, dependent, SiDepState::UnassigningDueToDep)?;
        stop_tolerance_timers(ctx, dependent)?;
        changed |= begin_admin_unassign(ctx, dependent, RemovalMode::Lock)?;
        waiting |= has_records(ctx, dependent)?;
    }
    if waiting {
        changed |= ctx.model.update(FieldUpdate::InstancePendingUnassign {
            si,
            mode: Some(mode),
        })?;
    } else {
        changed |= actions::retire_instance(ctx, si, mode)?;
    }
    Ok(changed)
}

/// Bring a dependent up to date after one of its edges changed.
pub fn on_edge_changed(ctx: &mut Ctx, sponsor: SiId, dependent: SiId) -> ModelResult<()> {
    ctx.timers.stop(&TimerKey::Tolerance { dependent, sponsor });
    evaluate_dependent(ctx, dependent)
}

/// Re-arm tolerance timers after a takeover. Timers are not checkpointed,
/// the deadlines restart from the takeover instant.
pub fn rearm_timers(ctx: &mut Ctx) -> ModelResult<()> {
    let waiting: Vec<SiId> = ctx
        .model
        .instances()
        .filter(|(_, i)| i.dep_state == SiDepState::TolTimerRunning)
        .map(|(id, _)| id)
        .collect();
    for dependent in waiting {
        for (sponsor, state) in sponsor_states(ctx, dependent)? {
            if state != SiAssignmentState::Assigned {
                start_tolerance(ctx, sponsor, dependent)?;
            }
        }
    }
    Ok(())
}
