//! No-Redundancy: one instance per unit, no standby

use super::placement::{choose, in_service_units, load, placement_failed};
use super::{actions, Redundancy};
use crate::controller::Ctx;
use crate::model::{HaState, ModelResult, RedundancyModel, SgId, SiId, SuId, SusiId};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoRedundancy;

impl Redundancy for NoRedundancy {
    fn model(&self) -> RedundancyModel {
        RedundancyModel::NoRedundancy
    }

    fn align_instance(&self, ctx: &mut Ctx, sg: SgId, si: SiId) -> ModelResult<bool> {
        if !ctx.model.instance(si)?.assignments.is_empty() {
            return Ok(false);
        }
        let candidates: Vec<SuId> = in_service_units(&ctx.model, sg)?
            .into_iter()
            .filter(|su| load(&ctx.model, *su).total() == 0)
            .collect();
        match choose(ctx, sg, &candidates, HaState::Active)? {
            Some(su) => {
                actions::assign(ctx, su, si, HaState::Active)?;
                Ok(true)
            }
            None => {
                placement_failed(ctx, si, HaState::Active)?;
                Ok(false)
            }
        }
    }

    fn select_peer(&self, _ctx: &Ctx, _si: SiId, _failed: SuId) -> ModelResult<Option<SusiId>> {
        Ok(None)
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

    #[test]
    fn test_one_instance_per_unit() {
        let mut model = EntityModel::new();
        let sg = model
            .create_group(ServiceGroup::new(
                "sg",
                RedundancyModel::NoRedundancy,
                SgLimits::for_model(RedundancyModel::NoRedundancy),
            ))
            .unwrap();
        let su = model.create_unit(ServiceUnit::new("su", sg, "n", 1)).unwrap();
        model
            .update(FieldUpdate::UnitPresence {
                su,
                state: PresenceState::Instantiated,
            })
            .unwrap();
        let first = model.create_instance(ServiceInstance::new("a", sg, 1)).unwrap();
        let second = model.create_instance(ServiceInstance::new("b", sg, 2)).unwrap();
        let mut ctx = Ctx::new(model, Settings::default(), Utc::now());

        assert!(NoRedundancy.align_instance(&mut ctx, sg, first).unwrap());
        assert!(!NoRedundancy.align_instance(&mut ctx, sg, second).unwrap());
        assert!(ctx.model.instance(second).unwrap().assignments.is_empty());
        assert_eq!(ctx.metrics.placement_failures(), 1);
    }

    #[test]
    fn test_swap_rejected() {
        let mut model = EntityModel::new();
        let sg = model
            .create_group(ServiceGroup::new(
                "sg",
                RedundancyModel::NoRedundancy,
                SgLimits::for_model(RedundancyModel::NoRedundancy),
            ))
            .unwrap();
        let si = model.create_instance(ServiceInstance::new("a", sg, 1)).unwrap();
        let mut ctx = Ctx::new(model, Settings::default(), Utc::now());
        assert!(NoRedundancy.si_swap(&mut ctx, sg, si).is_err());
    }
}
