//! Redundancy-model strategies
//!
//! Each group is bound to one strategy by its redundancy model. The shared
//! operations live on the [`Redundancy`] trait; most have a default built
//! from the record-level actions, and the models override the pieces where
//! their placement rules differ.
//!
//! | Model | Distribution |
//! |-------|--------------|
//! | 2N | one active unit, one standby unit, every instance on both |
//! | N+M | active units with disjoint instance sets, standby units |
//! | N-Way | one active plus preferred standbys per instance, mixed roles |
//! | N-Way-Active | preferred number of actives per instance, no standby |
//! | No-Redundancy | one instance per unit, no failover |

pub mod actions;
mod n_plus_m;
mod no_red;
mod nway;
mod nway_active;
pub mod placement;
pub mod reply;
mod two_n;

pub use n_plus_m::NPlusM;
pub use no_red::NoRedundancy;
pub use nway::NWay;
pub use nway_active::NWayActive;
pub use reply::{on_reply, ReplyOutcome};
pub use two_n::TwoN;

use crate::checkpoint::FieldUpdate;
use crate::controller::Ctx;
use crate::dependency;
use crate::model::{
    AdminState, EntityModel, FollowUp, HaState, ModelError, ModelResult, RedundancyModel,
    RemovalMode, SgId, SiId, SuId, SusiId,
};
use crate::observability::Event;
use placement::{by_unit_rank, InstanceRecords, UnitRoles};
use tracing::info;

/// Assignment operations of one redundancy model.
pub trait Redundancy: Send + Sync {
    fn model(&self) -> RedundancyModel;

    /// Apply the deltas that bring one assignable instance toward the
    /// model's target distribution. Returns whether anything was sent.
    fn align_instance(&self, ctx: &mut Ctx, sg: SgId, si: SiId) -> ModelResult<bool>;

    /// Align every assignable instance of the group, in rank order.
    fn realign(&self, ctx: &mut Ctx, sg: SgId) -> ModelResult<bool> {
        if ctx.model.group(sg)?.admin_state != AdminState::Unlocked {
            return Ok(false);
        }
        let instances = ctx.model.group(sg)?.instances.clone();
        let mut changed = false;
        for si in instances {
            if assignable(&ctx.model, si)? {
                changed |= self.align_instance(ctx, sg, si)?;
            }
        }
        Ok(changed)
    }

    /// Place one instance.
    fn si_assign(&self, ctx: &mut Ctx, sg: SgId, si: SiId) -> ModelResult<bool> {
        if !assignable(&ctx.model, si)? {
            return Ok(false);
        }
        self.align_instance(ctx, sg, si)
    }

    /// Take an instance down, dependents first.
    fn si_admin_down(
        &self,
        ctx: &mut Ctx,
        sg: SgId,
        si: SiId,
        mode: RemovalMode,
    ) -> ModelResult<bool> {
        ctx.model
            .update(FieldUpdate::GroupAdminSi { sg, si: Some(si) })?;
        dependency::begin_admin_unassign(ctx, si, mode)
    }

    /// Take every instance of the group down.
    fn sg_admin_down(&self, ctx: &mut Ctx, sg: SgId, mode: RemovalMode) -> ModelResult<bool> {
        let instances = ctx.model.group(sg)?.instances.clone();
        let mut changed = false;
        for si in instances {
            changed |= dependency::begin_admin_unassign(ctx, si, mode)?;
        }
        Ok(changed)
    }

    /// Switch a unit's work to peers before it is locked or shut down.
    fn su_admin_down(
        &self,
        ctx: &mut Ctx,
        _sg: SgId,
        su: SuId,
        mode: RemovalMode,
    ) -> ModelResult<bool> {
        actions::switch_over_unit(ctx, self, su, mode)
    }

    /// A unit failed but can still be reached.
    fn su_fault(&self, ctx: &mut Ctx, _sg: SgId, su: SuId) -> ModelResult<bool> {
        actions::fault_unit(ctx, self, su)
    }

    /// A unit is gone; its records are dropped locally. Dropping alone
    /// leaves a group stable, so replacements are placed right away.
    fn node_fail(&self, ctx: &mut Ctx, sg: SgId, su: SuId) -> ModelResult<bool> {
        let changed = actions::lose_unit(ctx, self, su)?;
        if ctx.model.group(sg)?.fsm.is_stable() {
            return Ok(self.realign(ctx, sg)? || changed);
        }
        Ok(changed)
    }

    /// A unit became in service.
    fn su_insvc(&self, ctx: &mut Ctx, sg: SgId, _su: SuId) -> ModelResult<bool> {
        if ctx.model.group(sg)?.fsm.is_stable() {
            self.realign(ctx, sg)
        } else {
            Ok(false)
        }
    }

    /// Exchange the active and standby roles of an instance.
    fn si_swap(&self, _ctx: &mut Ctx, _sg: SgId, si: SiId) -> ModelResult<bool> {
        Err(ModelError::invalid_state(format!(
            "{} has no standby role to swap {}",
            self.model().as_str(),
            si
        )))
    }

    /// Confirmed standby to promote when `failed` loses its active record.
    fn select_peer(&self, ctx: &Ctx, si: SiId, failed: SuId) -> ModelResult<Option<SusiId>> {
        let sg = ctx.model.instance(si)?.sg;
        let mut candidates: Vec<SusiId> = InstanceRecords::collect(&ctx.model, si)
            .settled_standby
            .into_iter()
            .filter(|id| ctx.model.assignment(*id).map_or(false, |r| r.su != failed))
            .collect();
        by_unit_rank(&ctx.model, sg, &mut candidates);
        Ok(candidates.first().copied())
    }

    /// Called after a standby record was told to become active.
    fn on_promoted(&self, _ctx: &mut Ctx, _susi: SusiId) -> ModelResult<()> {
        Ok(())
    }

    /// Improve the distribution of a stable group once nothing else is
    /// moving. Returns whether anything was sent.
    fn rebalance(&self, _ctx: &mut Ctx, _sg: SgId) -> ModelResult<bool> {
        Ok(false)
    }
}

static TWO_N: TwoN = TwoN;
static N_PLUS_M: NPlusM = NPlusM;
static N_WAY: NWay = NWay;
static N_WAY_ACTIVE: NWayActive = NWayActive;
static NO_RED: NoRedundancy = NoRedundancy;

/// Strategy of a redundancy model.
pub fn strategy(model: RedundancyModel) -> &'static dyn Redundancy {
    match model {
        RedundancyModel::TwoN => &TWO_N,
        RedundancyModel::NPlusM => &N_PLUS_M,
        RedundancyModel::NWay => &N_WAY,
        RedundancyModel::NWayActive => &N_WAY_ACTIVE,
        RedundancyModel::NoRedundancy => &NO_RED,
    }
}

/// Strategy bound to a group.
pub fn for_group(ctx: &Ctx, sg: SgId) -> ModelResult<&'static dyn Redundancy> {
    Ok(strategy(ctx.model.group(sg)?.model))
}

/// Whether an instance may receive new assignments.
pub fn assignable(model: &EntityModel, si: SiId) -> ModelResult<bool> {
    let instance = model.instance(si)?;
    let group = model.group(instance.sg)?;
    Ok(group.admin_state == AdminState::Unlocked
        && instance.admin_state == AdminState::Unlocked
        && instance.pending_unassign.is_none()
        && instance.dep_state.permits_assignment())
}

/// Swap one instance: quiesce its active, promote its best standby, then
/// demote the old active to standby.
pub(crate) fn swap_instance<R: Redundancy + ?Sized>(
    ctx: &mut Ctx,
    strategy: &R,
    si: SiId,
) -> ModelResult<bool> {
    let records = InstanceRecords::collect(&ctx.model, si);
    let active = records
        .active
        .iter()
        .copied()
        .find(|id| {
            ctx.model
                .assignment(*id)
                .map_or(false, |r| r.is_settled_as(HaState::Active))
        })
        .ok_or_else(|| ModelError::invalid_state(format!("{} has no settled active", si)))?;
    let active_su = ctx.model.assignment(active)?.su;
    let peer = strategy
        .select_peer(ctx, si, active_su)?
        .ok_or_else(|| ModelError::invalid_state(format!("{} has no standby assignment", si)))?;
    actions::modify(ctx, active, HaState::Quiesced, FollowUp::Swap { peer })?;
    Ok(true)
}

/// Swap the whole unit pair behind an instance: every instance active on
/// its active unit moves to the unit holding its best standby.
pub(crate) fn swap_active_unit<R: Redundancy + ?Sized>(
    ctx: &mut Ctx,
    strategy: &R,
    si: SiId,
) -> ModelResult<bool> {
    let active = ctx
        .model
        .instance_records(si)
        .into_iter()
        .find(|(_, r)| r.is_settled_as(HaState::Active))
        .map(|(_, r)| r.su)
        .ok_or_else(|| ModelError::invalid_state(format!("{} has no settled active", si)))?;
    let peer = strategy
        .select_peer(ctx, si, active)?
        .ok_or_else(|| ModelError::invalid_state(format!("{} has no standby assignment", si)))?;
    let standby = ctx.model.assignment(peer)?.su;
    swap_unit_pair(ctx, active, standby)
}

/// Swap every instance active on `active_su` whose standby lives on
/// `standby_su`.
pub(crate) fn swap_unit_pair(
    ctx: &mut Ctx,
    active_su: SuId,
    standby_su: SuId,
) -> ModelResult<bool> {
    let mut changed = false;
    let records: Vec<(SusiId, SiId)> = ctx
        .model
        .unit_records(active_su)
        .into_iter()
        .filter(|(_, r)| r.is_settled_as(HaState::Active))
        .map(|(id, r)| (id, r.si))
        .collect();
    for (active, si) in records {
        let peer = ctx.model.find_assignment(standby_su, si).filter(|id| {
            ctx.model
                .assignment(*id)
                .map_or(false, |r| placement::is_promotable(&ctx.model, r))
        });
        if let Some(peer) = peer {
            actions::modify(ctx, active, HaState::Quiesced, FollowUp::Swap { peer })?;
            changed = true;
        }
    }
    Ok(changed)
}

/// Position of a unit in its group's rank order.
pub(crate) fn rank_position(model: &EntityModel, sg: SgId, su: SuId) -> usize {
    model
        .group(sg)
        .ok()
        .and_then(|g| g.units.iter().position(|u| *u == su))
        .unwrap_or(usize::MAX)
}

/// Hand the active role back to a better-ranked standby unit of an
/// auto-adjusting group. Only a standby unit backing nothing but that one
/// active unit is exchanged, so unit roles never mix.
pub(crate) fn adjust_unit_roles(ctx: &mut Ctx, sg: SgId) -> ModelResult<bool> {
    let group = ctx.model.group(sg)?;
    if !group.auto_adjust || group.admin_state != AdminState::Unlocked {
        return Ok(false);
    }
    let roles = UnitRoles::collect(&ctx.model, sg)?;
    for &standby in &roles.standby {
        if !ctx.model.unit(standby)?.is_in_service() {
            continue;
        }
        let mut backed: Vec<SuId> = Vec::new();
        for (_, record) in ctx.model.unit_records(standby) {
            for (_, peer) in ctx.model.instance_records(record.si) {
                if peer.ha_state == HaState::Active && !backed.contains(&peer.su) {
                    backed.push(peer.su);
                }
            }
        }
        let &[active] = backed.as_slice() else {
            continue;
        };
        if rank_position(&ctx.model, sg, standby) >= rank_position(&ctx.model, sg, active) {
            continue;
        }
        if swap_unit_pair(ctx, active, standby)? {
            info!(
                event = Event::GroupAdjust.as_str(),
                group = %ctx.model.group(sg)?.name,
                from = %ctx.model.unit(active)?.name,
                to = %ctx.model.unit(standby)?.name,
                "returning active role to better-ranked unit"
            );
            return Ok(true);
        }
    }
    Ok(false)
}

/// Trim records beyond the preferred count, highest unit rank first.
pub(crate) fn trim_excess(
    ctx: &mut Ctx,
    sg: SgId,
    mut records: Vec<SusiId>,
    keep: usize,
) -> ModelResult<bool> {
    if records.len() <= keep {
        return Ok(false);
    }
    by_unit_rank(&ctx.model, sg, &mut records);
    let mut changed = false;
    for susi in records.into_iter().skip(keep) {
        changed |= actions::retire(ctx, susi, RemovalMode::Lock)?;
    }
    Ok(changed)
}
