//! Assignment replies from node agents
//!
//! A reply is matched against the record it names. It must come from the
//! record's unit and answer the change currently in flight; anything else
//! is stale and dropped.

use super::actions::{self, discard, modify, promote, retire};
use super::placement::is_promotable;
use super::{for_group, Redundancy};
use crate::checkpoint::FieldUpdate;
use crate::controller::Ctx;
use crate::fsm::{self, OperationKind};
use crate::model::{
    Assignment, FollowUp, HaState, ModelResult, OperState, PresenceState, SuId, SusiId,
    SusiState,
};
use crate::observability::Event;
use tracing::{debug, info, warn};

/// What happened to a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Applied,
    Ignored,
}

fn ignored(ctx: &Ctx, su: SuId, susi: SusiId, reason: &str) -> ReplyOutcome {
    ctx.metrics.increment_replies_ignored();
    debug!(
        event = Event::ReplyIgnored.as_str(),
        unit = %su,
        record = %susi,
        reason,
        "reply ignored"
    );
    ReplyOutcome::Ignored
}

/// Whether `ha` answers the change currently in flight on `record`.
pub fn matches_in_flight(record: &Assignment, ha: Option<HaState>) -> bool {
    match record.state {
        SusiState::Assigning => ha == Some(record.ha_state),
        SusiState::Removing => ha.is_none(),
        SusiState::Unassigned | SusiState::Assigned => false,
    }
}

/// Process an assign, modify or remove reply.
pub fn on_reply(
    ctx: &mut Ctx,
    su: SuId,
    susi: SusiId,
    ha: Option<HaState>,
    accepted: bool,
) -> ModelResult<ReplyOutcome> {
    let Ok(record) = ctx.model.assignment(susi).cloned() else {
        return Ok(ignored(ctx, su, susi, "unknown record"));
    };
    if record.su != su {
        return Ok(ignored(ctx, su, susi, "wrong unit"));
    }
    if !matches_in_flight(&record, ha) {
        return Ok(ignored(ctx, su, susi, "stale"));
    }

    let sg = ctx.model.unit(su)?.sg;
    let strategy = for_group(ctx, sg)?;
    if accepted {
        info!(
            event = Event::ReplyAccepted.as_str(),
            unit = %ctx.model.unit(su)?.name,
            record = %susi,
            role = ha.map_or("REMOVED", |h| h.as_str()),
            "reply accepted"
        );
        match record.state {
            SusiState::Assigning => confirm(ctx, strategy, susi, &record)?,
            _ => {
                ctx.model.delete_assignment(susi)?;
            }
        }
    } else {
        warn!(
            event = Event::ReplyRejected.as_str(),
            unit = %ctx.model.unit(su)?.name,
            record = %susi,
            "reply rejected"
        );
        match record.state {
            SusiState::Assigning => reject_assign(ctx, strategy, susi, &record)?,
            _ => reject_remove(ctx, strategy, su)?,
        }
    }

    fsm::release_unit(ctx, su)?;
    if ctx.model.instance(record.si).is_ok() {
        ctx.model.refresh_assignment_state(record.si)?;
    }
    Ok(ReplyOutcome::Applied)
}

fn confirm(
    ctx: &mut Ctx,
    strategy: &dyn Redundancy,
    susi: SusiId,
    record: &Assignment,
) -> ModelResult<()> {
    ctx.model.update(FieldUpdate::AssignmentState {
        susi,
        state: SusiState::Assigned,
    })?;
    ctx.model.update(FieldUpdate::AssignmentConfirmed {
        susi,
        ha: Some(record.ha_state),
    })?;
    ctx.model.update(FieldUpdate::AssignmentFollowUp {
        susi,
        follow_up: FollowUp::None,
    })?;

    match record.follow_up {
        FollowUp::None => {}
        FollowUp::Remove(mode) => {
            retire(ctx, susi, mode)?;
        }
        FollowUp::Failover { peer } => {
            if let Some(peer) = peer {
                if actions::serviceable(ctx, record.si)? {
                    promote(ctx, strategy, peer)?;
                }
            }
            actions::remove(ctx, susi)?;
        }
        FollowUp::Swap { peer } => {
            let ready = ctx
                .model
                .assignment(peer)
                .map_or(false, |p| is_promotable(&ctx.model, p));
            if ready {
                ctx.model.update(FieldUpdate::AssignmentAwaitingPeer {
                    susi,
                    awaiting: true,
                })?;
                modify(ctx, peer, HaState::Active, FollowUp::SwapBack { peer: susi })?;
                info!(
                    event = Event::Swap.as_str(),
                    instance = %ctx.model.instance(record.si)?.name,
                    "swap promoting standby"
                );
            } else {
                modify(ctx, susi, HaState::Active, FollowUp::None)?;
            }
        }
        FollowUp::SwapBack { peer } => {
            if let Ok(origin) = ctx.model.assignment(peer).cloned() {
                ctx.model.update(FieldUpdate::AssignmentAwaitingPeer {
                    susi: peer,
                    awaiting: false,
                })?;
                let reachable = ctx.model.unit(origin.su)?.is_in_service();
                if origin.state == SusiState::Assigned && reachable {
                    modify(ctx, peer, HaState::Standby, FollowUp::None)?;
                } else if origin.state == SusiState::Assigned {
                    actions::remove(ctx, peer)?;
                }
                fsm::release_unit(ctx, origin.su)?;
            }
        }
    }
    Ok(())
}

fn reject_assign(
    ctx: &mut Ctx,
    strategy: &dyn Redundancy,
    susi: SusiId,
    record: &Assignment,
) -> ModelResult<()> {
    let su = record.su;
    match record.confirmed_ha {
        None => discard(ctx, susi)?,
        Some(confirmed) => {
            ctx.model.update(FieldUpdate::AssignmentHaState {
                susi,
                ha: confirmed,
            })?;
            ctx.model.update(FieldUpdate::AssignmentState {
                susi,
                state: SusiState::Assigned,
            })?;
            ctx.model.update(FieldUpdate::AssignmentFollowUp {
                susi,
                follow_up: FollowUp::None,
            })?;
        }
    }
    // A unit that keeps refusing while already failed is treated as lost.
    let repeated = ctx.model.unit(su)?.oper_state == OperState::Disabled;
    disable(ctx, su)?;
    let sg = ctx.model.unit(su)?.sg;
    fsm::run(ctx, sg, OperationKind::UnitFault, |ctx| {
        if repeated {
            strategy.node_fail(ctx, sg, su)
        } else {
            strategy.su_fault(ctx, sg, su)
        }
    })?;
    Ok(())
}

fn reject_remove(ctx: &mut Ctx, strategy: &dyn Redundancy, su: SuId) -> ModelResult<()> {
    ctx.model.update(FieldUpdate::UnitPresence {
        su,
        state: PresenceState::TerminationFailed,
    })?;
    disable(ctx, su)?;
    let sg = ctx.model.unit(su)?.sg;
    fsm::run(ctx, sg, OperationKind::UnitFault, |ctx| {
        strategy.node_fail(ctx, sg, su)
    })?;
    Ok(())
}

fn disable(ctx: &mut Ctx, su: SuId) -> ModelResult<()> {
    ctx.model.update(FieldUpdate::UnitOperState {
        su,
        state: OperState::Disabled,
    })?;
    Ok(())
}
