//! Dependency graph queries

use crate::model::{EntityModel, SiId};

/// Whether adding "`dependent` depends on `sponsor`" would close a cycle.
///
/// Walks the sponsor chain upward from `sponsor`; reaching `dependent`
/// means `sponsor` already depends on it.
pub fn would_cycle(model: &EntityModel, sponsor: SiId, dependent: SiId) -> bool {
    let mut stack = vec![sponsor];
    let mut seen: Vec<SiId> = Vec::new();
    while let Some(si) = stack.pop() {
        if si == dependent {
            return true;
        }
        if seen.contains(&si) {
            continue;
        }
        seen.push(si);
        if let Ok(instance) = model.instance(si) {
            stack.extend(instance.sponsors.iter().copied());
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RedundancyModel, ServiceGroup, ServiceInstance, SgLimits};

    fn chain() -> (EntityModel, SiId, SiId, SiId) {
        let mut model = EntityModel::new();
        let sg = model
            .create_group(ServiceGroup::new(
                "sg",
                RedundancyModel::NWay,
                SgLimits::for_model(RedundancyModel::NWay),
            ))
            .unwrap();
        let a = model.create_instance(ServiceInstance::new("a", sg, 1)).unwrap();
        let b = model.create_instance(ServiceInstance::new("b", sg, 2)).unwrap();
        let c = model.create_instance(ServiceInstance::new("c", sg, 3)).unwrap();
        // c depends on b, b depends on a
        model.add_dependency(a, b, 0).unwrap();
        model.add_dependency(b, c, 0).unwrap();
        (model, a, b, c)
    }

    #[test]
    fn test_cycle_detection() {
        let (model, a, b, c) = chain();
        assert!(would_cycle(&model, c, a));
        assert!(would_cycle(&model, b, a));
        assert!(would_cycle(&model, a, a));
        assert!(!would_cycle(&model, a, c));
    }
}
