//! Record-level actions shared by every redundancy model
//!
//! Each action journals the record change, queues the command for the
//! unit's agent, puts the unit on the group's operation list and refreshes
//! the instance's assignment state.

use super::placement::{has_active_room, is_promotable, placement_failed, InstanceRecords};
use super::Redundancy;
use crate::checkpoint::FieldUpdate;
use crate::controller::Ctx;
use crate::fsm;
use crate::model::{
    AdminState, AssignmentRef, FollowUp, HaState, ModelResult, RemovalMode, SiDepState, SiId,
    SuId, SusiId, SusiState,
};
use crate::observability::Event;
use crate::transport::Command;
use tracing::{debug, info};

fn reference(ctx: &Ctx, susi: SusiId) -> ModelResult<AssignmentRef> {
    let record = ctx.model.assignment(susi)?;
    Ok(AssignmentRef {
        susi,
        su: record.su,
        si: record.si,
    })
}

fn send(ctx: &mut Ctx, su: SuId, command: Command) -> ModelResult<()> {
    ctx.outbox.send(&mut ctx.model, su, command)?;
    ctx.metrics.increment_commands();
    Ok(())
}

fn names(ctx: &Ctx, su: SuId, si: SiId) -> ModelResult<(String, String)> {
    Ok((
        ctx.model.unit(su)?.name.clone(),
        ctx.model.instance(si)?.name.clone(),
    ))
}

/// Create a record and send the assign command.
pub fn assign(ctx: &mut Ctx, su: SuId, si: SiId, ha: HaState) -> ModelResult<SusiId> {
    let susi = ctx.model.create_assignment(su, si, ha)?;
    let sg = ctx.model.unit(su)?.sg;
    let record = AssignmentRef { susi, su, si };
    send(ctx, su, Command::Assign { record, ha })?;
    fsm::add_unit(ctx, sg, su)?;
    ctx.model.refresh_assignment_state(si)?;

    let (unit, instance) = names(ctx, su, si)?;
    info!(
        event = Event::AssignmentCreated.as_str(),
        unit = %unit,
        instance = %instance,
        role = ha.as_str(),
        "assignment sent"
    );
    Ok(susi)
}

/// Move a record to a new HA state, running `follow_up` once confirmed.
pub fn modify(ctx: &mut Ctx, susi: SusiId, ha: HaState, follow_up: FollowUp) -> ModelResult<()> {
    let record = reference(ctx, susi)?;
    let sg = ctx.model.unit(record.su)?.sg;
    ctx.model.update(FieldUpdate::AssignmentHaState { susi, ha })?;
    ctx.model.update(FieldUpdate::AssignmentState {
        susi,
        state: SusiState::Assigning,
    })?;
    ctx.model
        .update(FieldUpdate::AssignmentFollowUp { susi, follow_up })?;
    send(ctx, record.su, Command::Modify { record, ha })?;
    fsm::add_unit(ctx, sg, record.su)?;
    ctx.model.refresh_assignment_state(record.si)?;

    let (unit, instance) = names(ctx, record.su, record.si)?;
    info!(
        event = Event::AssignmentModified.as_str(),
        unit = %unit,
        instance = %instance,
        role = ha.as_str(),
        "ha state change sent"
    );
    Ok(())
}

/// Send the remove command for a record.
pub fn remove(ctx: &mut Ctx, susi: SusiId) -> ModelResult<()> {
    let record = reference(ctx, susi)?;
    let sg = ctx.model.unit(record.su)?.sg;
    ctx.model.update(FieldUpdate::AssignmentState {
        susi,
        state: SusiState::Removing,
    })?;
    ctx.model.update(FieldUpdate::AssignmentFollowUp {
        susi,
        follow_up: FollowUp::None,
    })?;
    ctx.model.update(FieldUpdate::AssignmentAwaitingPeer {
        susi,
        awaiting: false,
    })?;
    send(ctx, record.su, Command::Remove { record })?;
    fsm::add_unit(ctx, sg, record.su)?;
    ctx.model.refresh_assignment_state(record.si)?;

    let (unit, instance) = names(ctx, record.su, record.si)?;
    info!(
        event = Event::AssignmentRemoved.as_str(),
        unit = %unit,
        instance = %instance,
        "remove sent"
    );
    Ok(())
}

/// Drop a record without a round trip to its unit.
///
/// Used when the unit is gone. Partners waiting on this record are
/// unblocked: a swap that lost its promoted side puts the original active
/// back in service.
pub fn discard(ctx: &mut Ctx, susi: SusiId) -> ModelResult<()> {
    let record = ctx.model.assignment(susi)?.clone();
    let partners: Vec<(SusiId, FollowUp)> = ctx
        .model
        .instance_records(record.si)
        .into_iter()
        .filter(|(id, _)| *id != susi)
        .map(|(id, r)| (id, r.follow_up))
        .collect();
    for (id, follow_up) in partners {
        match follow_up {
            FollowUp::Failover { peer: Some(peer) } if peer == susi => {
                ctx.model.update(FieldUpdate::AssignmentFollowUp {
                    susi: id,
                    follow_up: FollowUp::Failover { peer: None },
                })?;
            }
            FollowUp::SwapBack { peer } if peer == susi => {
                ctx.model.update(FieldUpdate::AssignmentFollowUp {
                    susi: id,
                    follow_up: FollowUp::None,
                })?;
            }
            _ => {}
        }
    }

    let (unit, instance) = names(ctx, record.su, record.si)?;
    ctx.model.delete_assignment(susi)?;
    debug!(
        event = Event::AssignmentDiscarded.as_str(),
        unit = %unit,
        instance = %instance,
        "record discarded"
    );

    if let FollowUp::SwapBack { peer } = record.follow_up {
        reinstate(ctx, peer)?;
    }
    fsm::release_unit(ctx, record.su)?;
    ctx.model.refresh_assignment_state(record.si)?;
    Ok(())
}

/// Return a quiesced swap origin to active service.
fn reinstate(ctx: &mut Ctx, susi: SusiId) -> ModelResult<()> {
    let Ok(record) = ctx.model.assignment(susi).cloned() else {
        return Ok(());
    };
    if !record.awaiting_peer {
        return Ok(());
    }
    ctx.model.update(FieldUpdate::AssignmentAwaitingPeer {
        susi,
        awaiting: false,
    })?;
    let in_service = ctx.model.unit(record.su)?.is_in_service();
    if in_service && !record.state.in_flight() {
        modify(ctx, susi, HaState::Active, FollowUp::None)?;
    } else {
        fsm::release_unit(ctx, record.su)?;
    }
    Ok(())
}

/// Take a record down.
///
/// An active record is quiesced first. A record with a reply outstanding
/// is marked and taken down once the reply arrives. Returns false when the
/// record was already leaving.
pub fn retire(ctx: &mut Ctx, susi: SusiId, mode: RemovalMode) -> ModelResult<bool> {
    let record = ctx.model.assignment(susi)?.clone();
    if record.is_leaving() {
        return Ok(false);
    }
    if record.state.in_flight() {
        ctx.model.update(FieldUpdate::AssignmentFollowUp {
            susi,
            follow_up: FollowUp::Remove(mode),
        })?;
        ctx.model.refresh_assignment_state(record.si)?;
        return Ok(true);
    }
    if record.ha_state == HaState::Active {
        modify(ctx, susi, mode.quiesce_target(), FollowUp::Remove(mode))?;
    } else {
        remove(ctx, susi)?;
    }
    Ok(true)
}

/// Take down every record of an instance.
pub fn retire_instance(ctx: &mut Ctx, si: SiId, mode: RemovalMode) -> ModelResult<bool> {
    let records: Vec<SusiId> = ctx
        .model
        .instance_records(si)
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    let mut changed = false;
    for susi in records {
        changed |= retire(ctx, susi, mode)?;
    }
    Ok(changed)
}

/// Whether losing the active of this instance should promote a standby.
pub fn serviceable(ctx: &Ctx, si: SiId) -> ModelResult<bool> {
    let instance = ctx.model.instance(si)?;
    let group = ctx.model.group(instance.sg)?;
    Ok(group.admin_state == AdminState::Unlocked
        && instance.admin_state == AdminState::Unlocked
        && instance.pending_unassign.is_none()
        && instance.dep_state != SiDepState::UnassigningDueToDep)
}

/// Standby to promote when the active record on `failed` goes away.
pub fn peer_for<R: Redundancy + ?Sized>(
    ctx: &Ctx,
    strategy: &R,
    si: SiId,
    failed: SuId,
) -> ModelResult<Option<SusiId>> {
    if !serviceable(ctx, si)? {
        return Ok(None);
    }
    strategy.select_peer(ctx, si, failed)
}

/// Make a settled standby the active of its instance. A standby whose
/// unit is already at its active limit stays a standby.
pub fn promote<R: Redundancy + ?Sized>(
    ctx: &mut Ctx,
    strategy: &R,
    susi: SusiId,
) -> ModelResult<bool> {
    let record = ctx.model.assignment(susi)?.clone();
    if !is_promotable(&ctx.model, &record) || !has_active_room(&ctx.model, record.su) {
        return Ok(false);
    }
    modify(ctx, susi, HaState::Active, FollowUp::None)?;
    ctx.metrics.increment_failovers();
    let (unit, instance) = names(ctx, record.su, record.si)?;
    info!(
        event = Event::Failover.as_str(),
        unit = %unit,
        instance = %instance,
        "standby promoted"
    );
    strategy.on_promoted(ctx, susi)?;
    Ok(true)
}

/// Fault handling for a unit whose records can still be reached.
///
/// Active records are quiesced and their peer promoted once the quiesce
/// is confirmed; standbys are removed. Records with a reply outstanding
/// get the same treatment when the reply arrives.
pub fn fault_unit<R: Redundancy + ?Sized>(
    ctx: &mut Ctx,
    strategy: &R,
    su: SuId,
) -> ModelResult<bool> {
    let records: Vec<SusiId> = ctx.model.unit_records(su).into_iter().map(|(id, _)| id).collect();
    let mut changed = false;
    for susi in records {
        let Ok(record) = ctx.model.assignment(susi).cloned() else {
            continue;
        };
        if record.is_leaving() {
            continue;
        }
        let active_role = record.ha_state.is_active_role();
        let peer = if active_role {
            peer_for(ctx, strategy, record.si, su)?
        } else {
            None
        };

        if record.state.in_flight() {
            let follow_up = if active_role {
                FollowUp::Failover { peer }
            } else {
                FollowUp::Remove(RemovalMode::Lock)
            };
            ctx.model
                .update(FieldUpdate::AssignmentFollowUp { susi, follow_up })?;
            ctx.model.refresh_assignment_state(record.si)?;
        } else if matches!(record.ha_state, HaState::Active | HaState::Quiescing) {
            modify(ctx, susi, HaState::Quiesced, FollowUp::Failover { peer })?;
        } else {
            if record.ha_state == HaState::Quiesced {
                if let Some(peer) = peer {
                    promote(ctx, strategy, peer)?;
                }
            }
            remove(ctx, susi)?;
        }
        changed = true;
    }
    Ok(changed)
}

/// Switch a unit's work away before it is locked or shut down.
pub fn switch_over_unit<R: Redundancy + ?Sized>(
    ctx: &mut Ctx,
    strategy: &R,
    su: SuId,
    mode: RemovalMode,
) -> ModelResult<bool> {
    let records: Vec<SusiId> = ctx.model.unit_records(su).into_iter().map(|(id, _)| id).collect();
    let mut changed = false;
    for susi in records {
        let Ok(record) = ctx.model.assignment(susi).cloned() else {
            continue;
        };
        if record.is_leaving() {
            continue;
        }
        if record.ha_state == HaState::Active {
            let peer = peer_for(ctx, strategy, record.si, su)?;
            let follow_up = FollowUp::Failover { peer };
            if record.state.in_flight() {
                ctx.model
                    .update(FieldUpdate::AssignmentFollowUp { susi, follow_up })?;
                ctx.model.refresh_assignment_state(record.si)?;
            } else {
                modify(ctx, susi, mode.quiesce_target(), follow_up)?;
            }
            changed = true;
        } else {
            changed |= retire(ctx, susi, RemovalMode::Lock)?;
        }
    }
    Ok(changed)
}

/// Drop every record of a unit that can no longer be reached and promote
/// standbys for the instances that lost their active.
pub fn lose_unit<R: Redundancy + ?Sized>(
    ctx: &mut Ctx,
    strategy: &R,
    su: SuId,
) -> ModelResult<bool> {
    let records: Vec<SusiId> = ctx.model.unit_records(su).into_iter().map(|(id, _)| id).collect();
    let changed = !records.is_empty();
    for susi in records {
        let Ok(record) = ctx.model.assignment(susi).cloned() else {
            continue;
        };
        let serving = record.ha_state.is_active_role()
            && record.state != SusiState::Removing
            && !matches!(record.follow_up, FollowUp::Remove(_));
        let peer = if serving {
            match record.follow_up {
                FollowUp::Failover { peer: Some(peer) } => Some(peer),
                _ => peer_for(ctx, strategy, record.si, su)?,
            }
        } else {
            None
        };
        discard(ctx, susi)?;
        let remaining = InstanceRecords::collect(&ctx.model, record.si);
        if !serving || remaining.has_active() {
            continue;
        }
        let promoted = match peer {
            Some(peer) => promote(ctx, strategy, peer)?,
            None => false,
        };
        // Standbys that cannot take over are left for the next realign.
        if !promoted && !remaining.standby.is_empty() && serviceable(ctx, record.si)? {
            placement_failed(ctx, record.si, HaState::Active)?;
        }
    }
    Ok(changed)
}
