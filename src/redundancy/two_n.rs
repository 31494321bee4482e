//! 2N: one active unit and one standby unit; every instance of the group is
//! assigned to both.

use super::placement::{
    choose, first_by_rank, in_service_units, placement_failed, InstanceRecords, UnitRoles,
};
use super::{actions, adjust_unit_roles, swap_active_unit, trim_excess, Redundancy};
use crate::controller::Ctx;
use crate::model::{HaState, ModelResult, RedundancyModel, SgId, SiId, SuId};

#[derive(Debug, Clone, Copy, Default)]
pub struct TwoN;

fn usable(ctx: &Ctx, su: Option<SuId>) -> Option<SuId> {
    su.filter(|su| ctx.model.unit(*su).map_or(false, |u| u.is_in_service()))
}

impl TwoN {
    /// Unit that should hold the role, existing role holder first.
    fn target(
        &self,
        ctx: &mut Ctx,
        sg: SgId,
        holder: Option<SuId>,
        excluded: &[SuId],
        ha: HaState,
    ) -> ModelResult<Option<SuId>> {
        if let Some(su) = usable(ctx, holder) {
            return Ok(Some(su));
        }
        let candidates: Vec<SuId> = in_service_units(&ctx.model, sg)?
            .into_iter()
            .filter(|su| !excluded.contains(su))
            .collect();
        choose(ctx, sg, &candidates, ha)
    }
}

impl Redundancy for TwoN {
    fn model(&self) -> RedundancyModel {
        RedundancyModel::TwoN
    }

    fn align_instance(&self, ctx: &mut Ctx, sg: SgId, si: SiId) -> ModelResult<bool> {
        let mut changed = false;
        let roles = UnitRoles::collect(&ctx.model, sg)?;
        let records = InstanceRecords::collect(&ctx.model, si);

        if records.active.is_empty() {
            if let Some(peer) = first_by_rank(&ctx.model, sg, &records.settled_standby) {
                changed |= actions::promote(ctx, self, peer)?;
            } else {
                let excluded: Vec<SuId> = roles.standby.clone();
                let current = roles.active.first().copied();
                match self.target(ctx, sg, current, &excluded, HaState::Active)? {
                    Some(su) if !records.on_unit(su) => {
                        actions::assign(ctx, su, si, HaState::Active)?;
                        changed = true;
                    }
                    Some(_) => {}
                    None => {
                        placement_failed(ctx, si, HaState::Active)?;
                        return Ok(changed);
                    }
                }
            }
        }

        let records = InstanceRecords::collect(&ctx.model, si);
        changed |= trim_excess(ctx, sg, records.staying_active.clone(), 1)?;
        changed |= trim_excess(ctx, sg, records.staying_standby.clone(), 1)?;

        let wants_standby = ctx.model.instance(si)?.pref_standby_assignments > 0;
        if wants_standby && records.staying_standby.is_empty() {
            let roles = UnitRoles::collect(&ctx.model, sg)?;
            let holder = roles.standby.first().copied();
            match self.target(ctx, sg, holder, &roles.active, HaState::Standby)? {
                Some(su) if !records.on_unit(su) => {
                    actions::assign(ctx, su, si, HaState::Standby)?;
                    changed = true;
                }
                Some(_) => {}
                None => placement_failed(ctx, si, HaState::Standby)?,
            }
        }
        Ok(changed)
    }

    /// Swap the whole active unit with the standby unit.
    fn si_swap(&self, ctx: &mut Ctx, _sg: SgId, si: SiId) -> ModelResult<bool> {
        swap_active_unit(ctx, self, si)
    }

    fn rebalance(&self, ctx: &mut Ctx, sg: SgId) -> ModelResult<bool> {
        adjust_unit_roles(ctx, sg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::FieldUpdate;
    use crate::config::Settings;
    use crate::model::{
        EntityModel, PresenceState, ServiceGroup, ServiceInstance, ServiceUnit, SgLimits,
    };
    use chrono::Utc;

    fn setup() -> (Ctx, SgId, SuId, SuId) {
        let mut model = EntityModel::new();
        let sg = model
            .create_group(ServiceGroup::new(
                "sg",
                RedundancyModel::TwoN,
                SgLimits::for_model(RedundancyModel::TwoN),
            ))
            .unwrap();
        let mut units = Vec::new();
        for (name, rank) in [("su-1", 1), ("su-2", 2)] {
            let su = model.create_unit(ServiceUnit::new(name, sg, "n", rank)).unwrap();
            model
                .update(FieldUpdate::UnitPresence {
                    su,
                    state: PresenceState::Instantiated,
                })
                .unwrap();
            units.push(su);
        }
        (
            Ctx::new(model, Settings::default(), Utc::now()),
            sg,
            units[0],
            units[1],
        )
    }

    #[test]
    fn test_instances_co_located_by_role() {
        let (mut ctx, sg, first, second) = setup();
        let a = ctx.model.create_instance(ServiceInstance::new("a", sg, 1)).unwrap();
        let b = ctx.model.create_instance(ServiceInstance::new("b", sg, 2)).unwrap();

        assert!(TwoN.realign(&mut ctx, sg).unwrap());
        for si in [a, b] {
            let roles: Vec<(SuId, HaState)> = ctx
                .model
                .instance_records(si)
                .iter()
                .map(|(_, r)| (r.su, r.ha_state))
                .collect();
            assert_eq!(roles, vec![(first, HaState::Active), (second, HaState::Standby)]);
        }
        assert_eq!(ctx.outbox.len(), 4);
    }

    #[test]
    fn test_single_unit_leaves_standby_unplaced() {
        let (mut ctx, sg, first, second) = setup();
        ctx.model
            .update(FieldUpdate::UnitPresence {
                su: second,
                state: PresenceState::Uninstantiated,
            })
            .unwrap();
        let si = ctx.model.create_instance(ServiceInstance::new("a", sg, 1)).unwrap();

        TwoN.realign(&mut ctx, sg).unwrap();
        let records = ctx.model.instance_records(si);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1.su, first);
        assert_eq!(ctx.metrics.placement_failures(), 1);
    }
}
