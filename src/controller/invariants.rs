//! Model invariants checked after every event
//!
//! A violation means the model is corrupt. The controller logs it and
//! aborts rather than replicate the corruption to its standby.

use crate::model::{
    EntityModel, HaState, RedundancyModel, SiAssignmentState, SiDepState, SusiState,
};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invariant violated: {0}")]
pub struct InvariantViolation(pub String);

fn violation(message: String) -> Result<(), InvariantViolation> {
    Err(InvariantViolation(message))
}

/// Check every invariant of the model.
pub fn verify(model: &EntityModel) -> Result<(), InvariantViolation> {
    verify_groups(model)?;
    verify_records(model)?;
    verify_instances(model)?;
    Ok(())
}

fn verify_groups(model: &EntityModel) -> Result<(), InvariantViolation> {
    for (_, group) in model.groups() {
        if group.fsm.is_stable() && !group.fsm.oper_list.is_empty() {
            return violation(format!(
                "group {} is STABLE with {} units on its operation list",
                group.name,
                group.fsm.oper_list.len()
            ));
        }
        if group.fsm.is_stable() && group.fsm.admin_si.is_some() {
            return violation(format!(
                "group {} is STABLE with an instance operation pending",
                group.name
            ));
        }
    }
    Ok(())
}

fn verify_records(model: &EntityModel) -> Result<(), InvariantViolation> {
    let mut pairs = BTreeSet::new();
    for (id, record) in model.assignments() {
        if !pairs.insert((record.su, record.si)) {
            return violation(format!("duplicate assignment {}/{}", record.su, record.si));
        }
        let Ok(unit) = model.unit(record.su) else {
            return violation(format!("assignment {} references missing unit", id));
        };
        let Ok(instance) = model.instance(record.si) else {
            return violation(format!("assignment {} references missing instance", id));
        };
        if !unit.assignments.contains(&id) || !instance.assignments.contains(&id) {
            return violation(format!("assignment {} is not linked from its owners", id));
        }
        if unit.sg != instance.sg {
            return violation(format!("assignment {} crosses groups", id));
        }
    }
    for (su, unit) in model.units() {
        for id in &unit.assignments {
            if model.assignment(*id).map_or(true, |r| r.su != su) {
                return violation(format!("unit {} lists foreign assignment {}", unit.name, id));
            }
        }
    }
    for (si, instance) in model.instances() {
        for id in &instance.assignments {
            if model.assignment(*id).map_or(true, |r| r.si != si) {
                return violation(format!(
                    "instance {} lists foreign assignment {}",
                    instance.name, id
                ));
            }
        }
    }
    Ok(())
}

fn verify_instances(model: &EntityModel) -> Result<(), InvariantViolation> {
    for (si, instance) in model.instances() {
        let Ok(group) = model.group(instance.sg) else {
            return violation(format!("instance {} has no group", instance.name));
        };
        let records = model.instance_records(si);
        let holding = |ha: HaState| {
            records
                .iter()
                .filter(|(_, r)| r.ha_state == ha && r.state != SusiState::Removing)
                .count() as u32
        };

        let max_active = match group.model {
            RedundancyModel::NWayActive => {
                instance.pref_active_assignments.max(1) + group.transfer_allowance(si)
            }
            _ => 1,
        };
        let actives = holding(HaState::Active);
        if actives > max_active {
            return violation(format!(
                "instance {} has {} active assignments, at most {} allowed",
                instance.name, actives, max_active
            ));
        }

        let max_standby = match group.model {
            RedundancyModel::TwoN | RedundancyModel::NPlusM => 1,
            RedundancyModel::NWay => instance.pref_standby_assignments,
            RedundancyModel::NWayActive | RedundancyModel::NoRedundancy => 0,
        };
        let standbys = holding(HaState::Standby);
        if standbys > max_standby {
            return violation(format!(
                "instance {} has {} standby assignments, at most {} allowed",
                instance.name, standbys, max_standby
            ));
        }

        if instance.dep_state == SiDepState::Assigned {
            for sponsor in &instance.sponsors {
                let assigned = model
                    .instance(*sponsor)
                    .map_or(false, |s| s.assignment_state == SiAssignmentState::Assigned);
                if !assigned {
                    return violation(format!(
                        "instance {} is dependency-assigned while sponsor {} is not assigned",
                        instance.name, sponsor
                    ));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::FieldUpdate;
    use crate::fsm::SgFsmState;
    use crate::model::{PresenceState, ServiceGroup, ServiceInstance, ServiceUnit, SgLimits};

    fn model() -> EntityModel {
        let mut model = EntityModel::new();
        let sg = model
            .create_group(ServiceGroup::new(
                "sg",
                RedundancyModel::TwoN,
                SgLimits::for_model(RedundancyModel::TwoN),
            ))
            .unwrap();
        for (name, rank) in [("a", 1), ("b", 2)] {
            let su = model.create_unit(ServiceUnit::new(name, sg, "n", rank)).unwrap();
            model
                .update(FieldUpdate::UnitPresence {
                    su,
                    state: PresenceState::Instantiated,
                })
                .unwrap();
        }
        model.create_instance(ServiceInstance::new("si", sg, 1)).unwrap();
        model
    }

    #[test]
    fn test_consistent_model_passes() {
        let mut model = model();
        let a = model.unit_id("a").unwrap();
        let b = model.unit_id("b").unwrap();
        let si = model.instance_id("si").unwrap();
        model.create_assignment(a, si, HaState::Active).unwrap();
        model.create_assignment(b, si, HaState::Standby).unwrap();
        assert!(verify(&model).is_ok());
    }

    #[test]
    fn test_two_actives_violate() {
        let mut model = model();
        let a = model.unit_id("a").unwrap();
        let b = model.unit_id("b").unwrap();
        let si = model.instance_id("si").unwrap();
        model.create_assignment(a, si, HaState::Active).unwrap();
        model.create_assignment(b, si, HaState::Active).unwrap();
        let err = verify(&model).unwrap_err();
        assert!(err.0.contains("2 active"));
    }

    #[test]
    fn test_stable_with_busy_unit_violates() {
        let mut model = model();
        let sg = model.group_id("sg").unwrap();
        let a = model.unit_id("a").unwrap();
        model
            .update(FieldUpdate::GroupOperListAdd { sg, su: a })
            .unwrap();
        model
            .update(FieldUpdate::GroupFsmState {
                sg,
                state: SgFsmState::Stable,
            })
            .unwrap();
        assert!(verify(&model).is_err());
    }
}
