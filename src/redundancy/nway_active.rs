//! N-Way-Active: every instance active on its preferred number of units

use super::placement::{
    choose, has_capacity, in_service_units, load, placement_failed, InstanceRecords,
};
use super::{actions, assignable, trim_excess, Redundancy};
use crate::checkpoint::FieldUpdate;
use crate::controller::Ctx;
use crate::model::{
    AdminState, HaState, ModelResult, RedundancyModel, RemovalMode, SgId, SiId, SiTransfer,
    SusiId, SuId,
};
use crate::observability::Event;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct NWayActive;

impl NWayActive {
    /// Actives an instance should hold, counting the extra one of a
    /// transfer that has already been placed.
    fn wanted(
        &self,
        ctx: &Ctx,
        sg: SgId,
        si: SiId,
        records: &InstanceRecords,
    ) -> ModelResult<usize> {
        let preferred = ctx.model.instance(si)?.pref_active_assignments as usize;
        let moving = match ctx.model.group(sg)?.transfer {
            Some(transfer) if transfer.si == si && records.on_unit(transfer.to) => 1,
            _ => 0,
        };
        Ok(preferred + moving)
    }

    /// Second half of a transfer: once the new active is confirmed the old
    /// one is taken down. A transfer that lost either side is dropped.
    fn finish_transfer(&self, ctx: &mut Ctx, sg: SgId, transfer: SiTransfer) -> ModelResult<bool> {
        let settled = |su| {
            ctx.model
                .find_assignment(su, transfer.si)
                .and_then(|id| ctx.model.assignment(id).ok().map(|r| (id, r.clone())))
                .filter(|(_, r)| r.is_settled_as(HaState::Active))
        };
        let to = settled(transfer.to);
        let from = settled(transfer.from);
        ctx.model.update(FieldUpdate::GroupTransfer { sg, transfer: None })?;
        match (to, from) {
            (Some(_), Some((old, _))) => {
                info!(
                    event = Event::InstanceTransfer.as_str(),
                    instance = %ctx.model.instance(transfer.si)?.name,
                    from = %ctx.model.unit(transfer.from)?.name,
                    to = %ctx.model.unit(transfer.to)?.name,
                    "transfer complete, retiring old active"
                );
                actions::retire(ctx, old, RemovalMode::Lock)
            }
            _ => Ok(true),
        }
    }

    /// First half of a transfer: when active loads of the in-service units
    /// differ by more than one, the best-ranked instance on the busiest unit
    /// gets an extra active on the idlest one.
    fn start_transfer(&self, ctx: &mut Ctx, sg: SgId) -> ModelResult<bool> {
        let mut loads: Vec<(SuId, u32)> = in_service_units(&ctx.model, sg)?
            .into_iter()
            .map(|su| (su, load(&ctx.model, su).active))
            .collect();
        loads.sort_by_key(|(_, active)| *active);
        let (Some(&(idle, low)), Some(&(busy, high))) = (loads.first(), loads.last()) else {
            return Ok(false);
        };
        if high <= low + 1 {
            return Ok(false);
        }
        let group = ctx.model.group(sg)?;
        if !has_capacity(group, load(&ctx.model, idle), HaState::Active) {
            return Ok(false);
        }
        for si in group.instances.clone() {
            if !assignable(&ctx.model, si)? || ctx.model.find_assignment(idle, si).is_some() {
                continue;
            }
            let on_busy = ctx
                .model
                .find_assignment(busy, si)
                .and_then(|id| ctx.model.assignment(id).ok())
                .map_or(false, |r| r.is_settled_as(HaState::Active));
            if !on_busy {
                continue;
            }
            let transfer = SiTransfer {
                si,
                from: busy,
                to: idle,
            };
            ctx.model.update(FieldUpdate::GroupTransfer {
                sg,
                transfer: Some(transfer),
            })?;
            info!(
                event = Event::GroupAdjust.as_str(),
                instance = %ctx.model.instance(si)?.name,
                from = %ctx.model.unit(busy)?.name,
                to = %ctx.model.unit(idle)?.name,
                "redistributing instance"
            );
            actions::assign(ctx, idle, si, HaState::Active)?;
            return Ok(true);
        }
        Ok(false)
    }
}

impl Redundancy for NWayActive {
    fn model(&self) -> RedundancyModel {
        RedundancyModel::NWayActive
    }

    fn align_instance(&self, ctx: &mut Ctx, sg: SgId, si: SiId) -> ModelResult<bool> {
        let records = InstanceRecords::collect(&ctx.model, si);
        let want = self.wanted(ctx, sg, si, &records)?;
        let have = records.staying_active.len();
        if have >= want {
            return trim_excess(ctx, sg, records.staying_active, want);
        }

        let mut taken = records.units;
        let mut changed = false;
        for _ in have..want {
            let candidates: Vec<SuId> = in_service_units(&ctx.model, sg)?
                .into_iter()
                .filter(|su| !taken.contains(su))
                .collect();
            match choose(ctx, sg, &candidates, HaState::Active)? {
                Some(su) => {
                    actions::assign(ctx, su, si, HaState::Active)?;
                    taken.push(su);
                    changed = true;
                }
                None => {
                    placement_failed(ctx, si, HaState::Active)?;
                    break;
                }
            }
        }
        Ok(changed)
    }

    /// Nothing to promote: the remaining actives keep serving and realign
    /// replaces the lost one.
    fn select_peer(&self, _ctx: &Ctx, _si: SiId, _failed: SuId) -> ModelResult<Option<SusiId>> {
        Ok(None)
    }

    /// Spread actives evenly over equally ranked units, one instance at a
    /// time.
    fn rebalance(&self, ctx: &mut Ctx, sg: SgId) -> ModelResult<bool> {
        let group = ctx.model.group(sg)?;
        if let Some(transfer) = group.transfer {
            return self.finish_transfer(ctx, sg, transfer);
        }
        if !group.equal_ranked_su || group.admin_state != AdminState::Unlocked {
            return Ok(false);
        }
        self.start_transfer(ctx, sg)
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

    fn setup(units: usize) -> (Ctx, SgId, Vec<SuId>) {
        let mut model = EntityModel::new();
        let sg = model
            .create_group(ServiceGroup::new(
                "sg",
                RedundancyModel::NWayActive,
                SgLimits::for_model(RedundancyModel::NWayActive),
            ))
            .unwrap();
        let mut ids = Vec::new();
        for i in 0..units {
            let su = model
                .create_unit(ServiceUnit::new(format!("su-{}", i), sg, "n", i as u32 + 1))
                .unwrap();
            model
                .update(FieldUpdate::UnitPresence {
                    su,
                    state: PresenceState::Instantiated,
                })
                .unwrap();
            ids.push(su);
        }
        (Ctx::new(model, Settings::default(), Utc::now()), sg, ids)
    }

    #[test]
    fn test_places_preferred_actives_on_distinct_units() {
        let (mut ctx, sg, units) = setup(3);
        let si = ctx
            .model
            .create_instance(ServiceInstance::new("si", sg, 1).with_preferred(2, 0))
            .unwrap();

        assert!(NWayActive.align_instance(&mut ctx, sg, si).unwrap());
        let holders: Vec<SuId> = ctx
            .model
            .instance_records(si)
            .iter()
            .map(|(_, r)| r.su)
            .collect();
        assert_eq!(holders, vec![units[0], units[1]]);
        assert_eq!(ctx.outbox.len(), 2);

        assert!(!NWayActive.align_instance(&mut ctx, sg, si).unwrap());
    }

    #[test]
    fn test_shortfall_counts_placement_failure() {
        let (mut ctx, sg, _) = setup(1);
        let si = ctx
            .model
            .create_instance(ServiceInstance::new("si", sg, 1).with_preferred(2, 0))
            .unwrap();

        assert!(NWayActive.align_instance(&mut ctx, sg, si).unwrap());
        assert_eq!(ctx.model.instance(si).unwrap().assignments.len(), 1);
        assert_eq!(ctx.metrics.placement_failures(), 1);
    }
}
