//! N+M: active units carrying disjoint instance sets, backed by standby
//! units. A unit never holds a standby while it is active for another
//! instance.

use super::placement::{
    choose, first_by_rank, in_service_units, is_promotable, placement_failed, InstanceRecords,
    UnitRoles,
};
use super::{actions, adjust_unit_roles, swap_active_unit, trim_excess, Redundancy};
use crate::controller::Ctx;
use crate::model::{
    HaState, ModelResult, RedundancyModel, RemovalMode, SgId, SiId, SuId, SusiId,
};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct NPlusM;

impl NPlusM {
    /// Units eligible for `ha`: existing holders of the role, plus spare
    /// units while the group is below its preferred count for the role.
    /// The best-ranked spares are kept for the active role.
    fn candidates(
        &self,
        ctx: &Ctx,
        sg: SgId,
        roles: &UnitRoles,
        ha: HaState,
    ) -> ModelResult<Vec<SuId>> {
        let limits = ctx.model.group(sg)?.limits;
        let in_service = in_service_units(&ctx.model, sg)?;
        let spares: Vec<SuId> = in_service
            .iter()
            .copied()
            .filter(|su| !roles.has_role(*su))
            .collect();
        let (holders, preferred, reserved) = if ha == HaState::Standby {
            let reserved = (limits.pref_active_sus as usize).saturating_sub(roles.active.len());
            (&roles.standby, limits.pref_standby_sus, reserved)
        } else {
            (&roles.active, limits.pref_active_sus, 0)
        };
        let mut candidates: Vec<SuId> = in_service
            .into_iter()
            .filter(|su| holders.contains(su))
            .collect();
        if (holders.len() as u32) < preferred {
            candidates.extend(spares.into_iter().skip(reserved));
        }
        Ok(candidates)
    }

    fn place(&self, ctx: &mut Ctx, sg: SgId, si: SiId, ha: HaState) -> ModelResult<bool> {
        let roles = UnitRoles::collect(&ctx.model, sg)?;
        let taken = InstanceRecords::collect(&ctx.model, si).units;
        let candidates: Vec<SuId> = self
            .candidates(ctx, sg, &roles, ha)?
            .into_iter()
            .filter(|su| !taken.contains(su))
            .collect();
        match choose(ctx, sg, &candidates, ha)? {
            Some(su) => {
                actions::assign(ctx, su, si, ha)?;
                Ok(true)
            }
            None => {
                placement_failed(ctx, si, ha)?;
                Ok(false)
            }
        }
    }
}

impl Redundancy for NPlusM {
    fn model(&self) -> RedundancyModel {
        RedundancyModel::NPlusM
    }

    fn align_instance(&self, ctx: &mut Ctx, sg: SgId, si: SiId) -> ModelResult<bool> {
        let mut changed = false;
        let records = InstanceRecords::collect(&ctx.model, si);
        if records.active.is_empty() {
            match first_by_rank(&ctx.model, sg, &records.settled_standby) {
                Some(peer) => changed |= actions::promote(ctx, self, peer)?,
                None => {
                    if !self.place(ctx, sg, si, HaState::Active)? {
                        return Ok(changed);
                    }
                    changed = true;
                }
            }
        }

        let records = InstanceRecords::collect(&ctx.model, si);
        changed |= trim_excess(ctx, sg, records.staying_active.clone(), 1)?;
        changed |= trim_excess(ctx, sg, records.staying_standby.clone(), 1)?;

        let wants_standby = ctx.model.instance(si)?.pref_standby_assignments > 0;
        if wants_standby && records.staying_standby.is_empty() {
            changed |= self.place(ctx, sg, si, HaState::Standby)?;
        }
        Ok(changed)
    }

    /// A promoted unit is now active: it drops standbys it holds for
    /// instances that are served elsewhere.
    fn on_promoted(&self, ctx: &mut Ctx, susi: SusiId) -> ModelResult<()> {
        let su = ctx.model.assignment(susi)?.su;
        let shed: Vec<SusiId> = ctx
            .model
            .unit_records(su)
            .into_iter()
            .filter(|(id, r)| *id != susi && is_promotable(&ctx.model, r))
            .filter(|(_, r)| {
                ctx.model
                    .instance_records(r.si)
                    .iter()
                    .any(|(_, other)| other.su != su && other.is_settled_as(HaState::Active))
            })
            .map(|(id, _)| id)
            .collect();
        for id in shed {
            debug!(unit = %su, record = %id, "promoted unit sheds standby");
            actions::retire(ctx, id, RemovalMode::Lock)?;
        }
        Ok(())
    }

    /// Swap the instance's active unit with the unit holding its standby.
    fn si_swap(&self, ctx: &mut Ctx, _sg: SgId, si: SiId) -> ModelResult<bool> {
        swap_active_unit(ctx, self, si)
    }

    fn rebalance(&self, ctx: &mut Ctx, sg: SgId) -> ModelResult<bool> {
        adjust_unit_roles(ctx, sg)
    }
}
