//! Configuration validation
//!
//! Validation runs on the whole document before any of it reaches the
//! entity model:
//! - names are unique per entity kind and every reference resolves
//! - preferred counts fit the group's member units and its model
//! - escalation limits are non-zero
//! - dependency edges are acyclic, without self or duplicate edges

use std::collections::{BTreeMap, BTreeSet};

use super::errors::{ConfigError, ConfigResult};
use super::types::{ClusterConfig, GroupConfig, InstanceConfig};
use crate::model::RedundancyModel;

impl ClusterConfig {
    /// Check the document. Nothing is applied here.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.settings.max_settle_rounds == 0 {
            return Err(ConfigError::invalid("max_settle_rounds must be non-zero"));
        }

        let groups = unique(self.groups.iter().map(|g| g.name.as_str()), "group")?;
        unique(self.units.iter().map(|u| u.name.as_str()), "unit")?;
        let instances = unique(self.instances.iter().map(|i| i.name.as_str()), "instance")?;

        for unit in &self.units {
            if !groups.contains(unit.group.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "unit {} references unknown group {}",
                    unit.name, unit.group
                )));
            }
        }
        for instance in &self.instances {
            if !groups.contains(instance.group.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "instance {} references unknown group {}",
                    instance.name, instance.group
                )));
            }
        }

        for group in &self.groups {
            let units = self.units.iter().filter(|u| u.group == group.name).count() as u32;
            let members: Vec<&InstanceConfig> = self
                .instances
                .iter()
                .filter(|i| i.group == group.name)
                .collect();
            validate_group(group, units, &members)?;
        }

        validate_dependencies(self, &instances)
    }
}

fn unique<'a>(
    names: impl Iterator<Item = &'a str>,
    kind: &str,
) -> ConfigResult<BTreeSet<&'a str>> {
    let mut seen = BTreeSet::new();
    for name in names {
        if name.is_empty() {
            return Err(ConfigError::invalid(format!("{} with empty name", kind)));
        }
        if !seen.insert(name) {
            return Err(ConfigError::invalid(format!("duplicate {} name {}", kind, name)));
        }
    }
    Ok(seen)
}

/// Validate one group against its member units and instances.
pub fn validate_group(
    group: &GroupConfig,
    units: u32,
    instances: &[&InstanceConfig],
) -> ConfigResult<()> {
    let limits = group.effective_limits();
    let name = &group.name;

    match group.model {
        RedundancyModel::TwoN => {
            if limits.pref_active_sus != 1 || limits.pref_standby_sus != 1 {
                return Err(ConfigError::invalid(format!(
                    "group {}: 2N needs exactly one active and one standby unit",
                    name
                )));
            }
        }
        RedundancyModel::NPlusM => {
            if limits.pref_active_sus == 0 {
                return Err(ConfigError::invalid(format!(
                    "group {}: N+M needs at least one active unit",
                    name
                )));
            }
        }
        RedundancyModel::NWay | RedundancyModel::NWayActive | RedundancyModel::NoRedundancy => {
            if limits.pref_standby_sus != 0 && group.model != RedundancyModel::NWay {
                return Err(ConfigError::invalid(format!(
                    "group {}: {} has no standby units",
                    name, group.model
                )));
            }
        }
    }
    if limits.pref_inservice_sus > units {
        return Err(ConfigError::invalid(format!(
            "group {}: {} in-service units preferred, {} configured",
            name, limits.pref_inservice_sus, units
        )));
    }
    if limits.pref_active_sus + limits.pref_standby_sus > units {
        return Err(ConfigError::invalid(format!(
            "group {}: {} active + {} standby units preferred, {} configured",
            name, limits.pref_active_sus, limits.pref_standby_sus, units
        )));
    }

    for instance in instances {
        let (active, standby) = instance.preferred(group.model);
        let fits = match group.model {
            RedundancyModel::TwoN => active == 1 && standby <= 1,
            RedundancyModel::NPlusM => active == 1 && standby <= 1,
            RedundancyModel::NWay => active == 1 && standby + 1 <= units,
            RedundancyModel::NWayActive => standby == 0 && active >= 1 && active <= units,
            RedundancyModel::NoRedundancy => active == 1 && standby == 0,
        };
        if !fits {
            return Err(ConfigError::invalid(format!(
                "instance {}: {} active / {} standby assignments not possible \
                 under {} with {} units",
                instance.name, active, standby, group.model, units
            )));
        }
    }
    if group.model == RedundancyModel::NoRedundancy && instances.len() as u32 > units {
        return Err(ConfigError::invalid(format!(
            "group {}: {} instances but only {} units",
            name,
            instances.len(),
            units
        )));
    }

    let escalation = &group.escalation;
    if escalation.comp_restart_max == 0
        || escalation.su_restart_max == 0
        || escalation.comp_restart_probation_ms == 0
        || escalation.su_restart_probation_ms == 0
    {
        return Err(ConfigError::invalid(format!(
            "group {}: restart maxima and probation periods must be non-zero",
            name
        )));
    }
    Ok(())
}

fn validate_dependencies(config: &ClusterConfig, instances: &BTreeSet<&str>) -> ConfigResult<()> {
    // sponsor -> dependents
    let mut edges: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for dep in &config.dependencies {
        for name in [&dep.sponsor, &dep.dependent] {
            if !instances.contains(name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "dependency references unknown instance {}",
                    name
                )));
            }
        }
        if dep.sponsor == dep.dependent {
            return Err(ConfigError::invalid(format!(
                "instance {} depends on itself",
                dep.sponsor
            )));
        }
        if !edges
            .entry(dep.sponsor.as_str())
            .or_default()
            .insert(dep.dependent.as_str())
        {
            return Err(ConfigError::invalid(format!(
                "duplicate dependency {} -> {}",
                dep.dependent, dep.sponsor
            )));
        }
    }

    // Iterative DFS with colouring.
    let mut done: BTreeSet<&str> = BTreeSet::new();
    for &start in edges.keys() {
        if done.contains(start) {
            continue;
        }
        let mut on_path: BTreeSet<&str> = BTreeSet::new();
        let mut stack: Vec<(&str, Vec<&str>)> = Vec::new();
        on_path.insert(start);
        stack.push((start, successors(&edges, start)));
        while let Some((node, pending)) = stack.last_mut() {
            let node = *node;
            match pending.pop() {
                Some(next) => {
                    if on_path.contains(next) {
                        return Err(ConfigError::invalid(format!(
                            "dependency cycle through {}",
                            next
                        )));
                    }
                    if !done.contains(next) {
                        on_path.insert(next);
                        stack.push((next, successors(&edges, next)));
                    }
                }
                None => {
                    on_path.remove(node);
                    done.insert(node);
                    stack.pop();
                }
            }
        }
    }
    Ok(())
}

fn successors<'a>(edges: &BTreeMap<&'a str, BTreeSet<&'a str>>, node: &str) -> Vec<&'a str> {
    edges
        .get(node)
        .map(|d| d.iter().copied().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DependencyConfig, UnitConfig};
    use crate::model::SgLimits;

    fn base(model: RedundancyModel, units: u32) -> ClusterConfig {
        ClusterConfig {
            groups: vec![GroupConfig::new("sg", model)],
            units: (0..units)
                .map(|i| UnitConfig::new(format!("su-{}", i), "sg", format!("n{}", i), i))
                .collect(),
            ..Default::default()
        }
    }

    fn edge(sponsor: &str, dependent: &str) -> DependencyConfig {
        DependencyConfig {
            sponsor: sponsor.to_string(),
            dependent: dependent.to_string(),
            tolerance_ms: None,
        }
    }

    #[test]
    fn test_valid_two_n() {
        let mut config = base(RedundancyModel::TwoN, 2);
        config.instances.push(InstanceConfig::new("si", "sg", 1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_and_dangling_names() {
        let mut config = base(RedundancyModel::NWay, 2);
        config.units.push(UnitConfig::new("su-0", "sg", "n9", 9));
        assert!(config.validate().is_err());

        let mut config = base(RedundancyModel::NWay, 2);
        config.instances.push(InstanceConfig::new("si", "nope", 1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_preferred_counts_exceed_units() {
        let config = base(RedundancyModel::TwoN, 1);
        assert!(config.validate().is_err());

        let mut config = base(RedundancyModel::NPlusM, 3);
        config.groups[0].limits = Some(SgLimits {
            pref_active_sus: 3,
            ..SgLimits::for_model(RedundancyModel::NPlusM)
        });
        assert!(config.validate().is_err());

        let mut config = base(RedundancyModel::NWay, 2);
        config
            .instances
            .push(InstanceConfig::new("si", "sg", 1).with_preferred(1, 2));
        assert!(config.validate().is_err());

        let mut config = base(RedundancyModel::TwoN, 2);
        config.groups[0].limits = Some(SgLimits {
            pref_inservice_sus: 3,
            ..SgLimits::for_model(RedundancyModel::TwoN)
        });
        assert!(config.validate().is_err());
        config.groups[0].limits = Some(SgLimits {
            pref_inservice_sus: 2,
            ..SgLimits::for_model(RedundancyModel::TwoN)
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_model_specific_rules() {
        let mut config = base(RedundancyModel::NWayActive, 3);
        config
            .instances
            .push(InstanceConfig::new("si", "sg", 1).with_preferred(2, 0));
        assert!(config.validate().is_ok());
        config.instances[0].pref_standby = Some(1);
        assert!(config.validate().is_err());

        let mut config = base(RedundancyModel::NoRedundancy, 1);
        config.instances.push(InstanceConfig::new("a", "sg", 1));
        assert!(config.validate().is_ok());
        config.instances.push(InstanceConfig::new("b", "sg", 2));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_escalation_limit_rejected() {
        let mut config = base(RedundancyModel::NWay, 2);
        config.groups[0].escalation.su_restart_probation_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dependency_rules() {
        let mut config = base(RedundancyModel::NWayActive, 2);
        for name in ["a", "b", "c"] {
            config
                .instances
                .push(InstanceConfig::new(name, "sg", 1).with_preferred(1, 0));
        }
        config.dependencies = vec![edge("a", "b"), edge("b", "c")];
        assert!(config.validate().is_ok());

        config.dependencies.push(edge("c", "a"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));

        config.dependencies = vec![edge("a", "a")];
        assert!(config.validate().is_err());

        config.dependencies = vec![edge("a", "b"), edge("a", "b")];
        assert!(config.validate().is_err());
    }
}
