//! N-Way: one active plus preferred standbys per instance; a unit may hold
//! actives for some instances and standbys for others.

use super::placement::{
    choose, first_by_rank, in_service_units, placement_failed, InstanceRecords,
};
use super::{actions, assignable, rank_position, swap_instance, trim_excess, Redundancy};
use crate::controller::Ctx;
use crate::model::{AdminState, HaState, ModelResult, RedundancyModel, SgId, SiId, SuId};
use crate::observability::Event;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct NWay;

impl NWay {
    fn place(&self, ctx: &mut Ctx, sg: SgId, si: SiId, ha: HaState) -> ModelResult<bool> {
        let taken = InstanceRecords::collect(&ctx.model, si).units;
        let candidates: Vec<SuId> = in_service_units(&ctx.model, sg)?
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

impl Redundancy for NWay {
    fn model(&self) -> RedundancyModel {
        RedundancyModel::NWay
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
        changed |= trim_excess(ctx, sg, records.staying_active, 1)?;

        let want = ctx.model.instance(si)?.pref_standby_assignments as usize;
        let have = records.staying_standby.len();
        if have > want {
            changed |= trim_excess(ctx, sg, records.staying_standby, want)?;
        }
        for _ in have..want {
            if !self.place(ctx, sg, si, HaState::Standby)? {
                break;
            }
            changed = true;
        }
        Ok(changed)
    }

    fn si_swap(&self, ctx: &mut Ctx, _sg: SgId, si: SiId) -> ModelResult<bool> {
        swap_instance(ctx, self, si)
    }

    /// With auto-adjust, swap the first instance whose best standby sits on
    /// a better-ranked unit than its active.
    fn rebalance(&self, ctx: &mut Ctx, sg: SgId) -> ModelResult<bool> {
        let group = ctx.model.group(sg)?;
        if !group.auto_adjust || group.admin_state != AdminState::Unlocked {
            return Ok(false);
        }
        for si in group.instances.clone() {
            if !assignable(&ctx.model, si)? {
                continue;
            }
            let active = ctx
                .model
                .instance_records(si)
                .into_iter()
                .find(|(_, r)| r.is_settled_as(HaState::Active))
                .map(|(_, r)| r.su);
            let Some(active) = active else {
                continue;
            };
            let Some(peer) = self.select_peer(ctx, si, active)? else {
                continue;
            };
            let standby = ctx.model.assignment(peer)?.su;
            if rank_position(&ctx.model, sg, standby) < rank_position(&ctx.model, sg, active) {
                info!(
                    event = Event::GroupAdjust.as_str(),
                    instance = %ctx.model.instance(si)?.name,
                    from = %ctx.model.unit(active)?.name,
                    to = %ctx.model.unit(standby)?.name,
                    "returning active role to better-ranked unit"
                );
                return swap_instance(ctx, self, si);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::FieldUpdate;
    use crate::config::Settings;
    use crate::model::{
        EntityModel, PresenceState, ServiceGroup, ServiceInstance, ServiceUnit, SgLimits,
        SusiState,
    };
    use chrono::Utc;

    fn setup() -> (Ctx, SgId, Vec<SuId>, SiId) {
        let mut model = EntityModel::new();
        let sg = model
            .create_group(ServiceGroup::new(
                "sg",
                RedundancyModel::NWay,
                SgLimits::for_model(RedundancyModel::NWay),
            ))
            .unwrap();
        let mut units = Vec::new();
        for i in 0..3 {
            let su = model
                .create_unit(ServiceUnit::new(format!("su-{}", i), sg, "n", i + 1))
                .unwrap();
            model
                .update(FieldUpdate::UnitPresence {
                    su,
                    state: PresenceState::Instantiated,
                })
                .unwrap();
            units.push(su);
        }
        let si = model
            .create_instance(ServiceInstance::new("si", sg, 1).with_preferred(1, 2))
            .unwrap();
        (Ctx::new(model, Settings::default(), Utc::now()), sg, units, si)
    }

    #[test]
    fn test_active_plus_preferred_standbys() {
        let (mut ctx, sg, units, si) = setup();
        assert!(NWay.align_instance(&mut ctx, sg, si).unwrap());

        let records = ctx.model.instance_records(si);
        let roles: Vec<(SuId, HaState)> = records.iter().map(|(_, r)| (r.su, r.ha_state)).collect();
        assert_eq!(
            roles,
            vec![
                (units[0], HaState::Active),
                (units[1], HaState::Standby),
                (units[2], HaState::Standby),
            ]
        );
    }

    #[test]
    fn test_promotes_settled_standby_when_active_missing() {
        let (mut ctx, sg, units, si) = setup();
        let standby = ctx
            .model
            .create_assignment(units[1], si, HaState::Standby)
            .unwrap();
        ctx.model
            .update(FieldUpdate::AssignmentState {
                susi: standby,
                state: SusiState::Assigned,
            })
            .unwrap();
        ctx.model
            .update(FieldUpdate::AssignmentConfirmed {
                susi: standby,
                ha: Some(HaState::Standby),
            })
            .unwrap();

        NWay.align_instance(&mut ctx, sg, si).unwrap();
        let promoted = ctx.model.assignment(standby).unwrap();
        assert_eq!(promoted.ha_state, HaState::Active);
        assert_eq!(promoted.state, SusiState::Assigning);
        assert_eq!(ctx.metrics.snapshot().failovers, 1);
    }

    #[test]
    fn test_swap_without_standby_rejected() {
        let (mut ctx, sg, _, si) = setup();
        assert!(NWay.si_swap(&mut ctx, sg, si).is_err());
    }
}
