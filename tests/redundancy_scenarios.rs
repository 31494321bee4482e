//! End-to-end placement and failover per redundancy model
//!
//! Each test drives a controller through simulated node agents and checks
//! where the confirmed assignments end up.

mod common;

use common::{group_config, two_n, Cluster};
use hagroups::admin::{AdminOp, AdminResponse, AdminTarget};
use hagroups::checkpoint::{CheckpointRecord, FieldUpdate};
use hagroups::config::InstanceConfig;
use hagroups::fsm::SgFsmState;
use hagroups::model::{OperState, RedundancyModel, SgLimits};

/// Group state changes published to the checkpoint stream, in order.
fn fsm_states(cluster: &Cluster) -> Vec<SgFsmState> {
    cluster
        .sink
        .envelopes()
        .into_iter()
        .filter_map(|envelope| match envelope.record {
            CheckpointRecord::Update {
                update: FieldUpdate::GroupFsmState { state, .. },
            } => Some(state),
            _ => None,
        })
        .collect()
}

/// Active holders of the given instances, sorted.
fn active_units(cluster: &Cluster, instances: &[&str]) -> Vec<String> {
    let mut units: Vec<String> = instances.iter().flat_map(|si| cluster.active(si)).collect();
    units.sort();
    units
}

// =============================================================================
// 2N
// =============================================================================

/// Bring-up places the active on the best-ranked unit and the standby on
/// the other.
#[test]
fn test_two_n_bring_up() {
    let mut cluster = Cluster::start(two_n(&["si-a", "si-b"]));

    for si in ["si-a", "si-b"] {
        assert_eq!(cluster.active(si), vec!["su-1"]);
        assert_eq!(cluster.standby(si), vec!["su-2"]);
    }
    assert!(cluster.is_stable("sg"));
    assert_eq!(cluster.controller.take_completions().len(), 0);

    // Every realignment ran to completion before the next one started.
    let states = fsm_states(&cluster);
    assert!(!states.is_empty());
    assert_eq!(states.len() % 2, 0);
    for pair in states.chunks(2) {
        assert_eq!(pair, &[SgFsmState::Realigning, SgFsmState::Stable][..]);
    }
}

/// Losing the active node promotes the standby. The standby role stays
/// empty until the node comes back.
#[test]
fn test_two_n_node_failure_and_recovery() {
    let mut cluster = Cluster::start(two_n(&["si-a"]));

    assert_eq!(cluster.fail_node("n1"), 1);
    cluster.pump();

    assert_eq!(cluster.active("si-a"), vec!["su-2"]);
    assert!(cluster.standby("si-a").is_empty());
    assert!(cluster.is_stable("sg"));
    let su1 = cluster.su("su-1");
    assert_eq!(
        cluster.controller.model().unit(su1).unwrap().oper_state,
        OperState::Disabled
    );

    cluster.restore_node("n1");

    assert_eq!(cluster.active("si-a"), vec!["su-2"]);
    assert_eq!(cluster.standby("si-a"), vec!["su-1"]);
    assert!(cluster.is_stable("sg"));
}

/// Losing the standby node leaves the active alone.
#[test]
fn test_two_n_standby_loss_keeps_active() {
    let mut cluster = Cluster::start(two_n(&["si-a"]));
    let before = cluster.delivered_to("su-1", "modify");

    cluster.fail_node("n2");
    cluster.pump();

    assert_eq!(cluster.active("si-a"), vec!["su-1"]);
    assert!(cluster.standby("si-a").is_empty());
    assert_eq!(cluster.delivered_to("su-1", "modify"), before);
}

/// A swap exchanges the unit pair and completes asynchronously.
#[test]
fn test_two_n_swap() {
    let mut cluster = Cluster::start(two_n(&["si-a", "si-b"]));

    let response = cluster.admin(7, AdminTarget::Instance("si-a".into()), AdminOp::Swap);
    assert_eq!(response, AdminResponse::Accepted);
    cluster.pump();

    for si in ["si-a", "si-b"] {
        assert_eq!(cluster.active(si), vec!["su-2"]);
        assert_eq!(cluster.standby(si), vec!["su-1"]);
    }
    let completions = cluster.controller.take_completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].invocation, 7);
    assert_eq!(completions[0].result, AdminResponse::Success);
}

/// Only the preferred number of units is brought up; a spare is
/// instantiated when an in-service unit is lost.
#[test]
fn test_two_n_spare_instantiated_on_fault() {
    let mut config = group_config(RedundancyModel::TwoN, 3, &["si-a"]);
    config.groups[0].limits = Some(SgLimits {
        pref_inservice_sus: 2,
        ..SgLimits::for_model(RedundancyModel::TwoN)
    });
    let mut cluster = Cluster::start(config);

    assert_eq!(cluster.delivered_to("su-1", "instantiate"), 1);
    assert_eq!(cluster.delivered_to("su-2", "instantiate"), 1);
    assert_eq!(cluster.delivered_to("su-3", "instantiate"), 0);
    assert_eq!(cluster.active("si-a"), vec!["su-1"]);
    assert_eq!(cluster.standby("si-a"), vec!["su-2"]);

    cluster.fail_node("n1");
    cluster.pump();

    assert_eq!(cluster.delivered_to("su-3", "instantiate"), 1);
    assert_eq!(cluster.active("si-a"), vec!["su-2"]);
    assert_eq!(cluster.standby("si-a"), vec!["su-3"]);
    assert!(cluster.is_stable("sg"));
}

/// With auto-adjust the active role returns to the better-ranked unit once
/// it is back and holding the standby.
#[test]
fn test_two_n_auto_adjust_after_recovery() {
    let mut config = two_n(&["si-a", "si-b"]);
    config.groups[0].auto_adjust = true;
    let mut cluster = Cluster::start(config);

    cluster.fail_node("n1");
    cluster.pump();
    assert_eq!(cluster.active("si-a"), vec!["su-2"]);

    cluster.restore_node("n1");

    for si in ["si-a", "si-b"] {
        assert_eq!(cluster.active(si), vec!["su-1"]);
        assert_eq!(cluster.standby(si), vec!["su-2"]);
    }
    assert!(cluster.delivered_to("su-2", "modify") >= 2);
    assert!(cluster.is_stable("sg"));
}

// =============================================================================
// N+M
// =============================================================================

/// Every instance gets one active and one standby, and no unit mixes
/// roles.
#[test]
fn test_n_plus_m_roles_do_not_mix() {
    let cluster = Cluster::start(group_config(RedundancyModel::NPlusM, 3, &["si-a", "si-b"]));

    let mut active_units = Vec::new();
    let mut standby_units = Vec::new();
    for si in ["si-a", "si-b"] {
        let active = cluster.active(si);
        let standby = cluster.standby(si);
        assert_eq!(active.len(), 1, "{} active {:?}", si, active);
        assert_eq!(standby.len(), 1, "{} standby {:?}", si, standby);
        assert_ne!(active, standby);
        active_units.extend(active);
        standby_units.extend(standby);
    }
    for unit in &active_units {
        assert!(!standby_units.contains(unit), "{} holds both roles", unit);
    }
    assert!(cluster.is_stable("sg"));
}

// =============================================================================
// N-Way
// =============================================================================

fn nway_cluster() -> Cluster {
    let mut config = group_config(RedundancyModel::NWay, 3, &[]);
    config
        .instances
        .push(InstanceConfig::new("si-a", "sg", 1).with_preferred(1, 2));
    Cluster::start(config)
}

#[test]
fn test_nway_active_and_two_standbys() {
    let cluster = nway_cluster();

    assert_eq!(cluster.active("si-a"), vec!["su-1"]);
    assert_eq!(cluster.standby("si-a"), vec!["su-2", "su-3"]);
}

/// Second fault arrives before the first promotion is confirmed; the last
/// surviving unit ends up active.
#[test]
fn test_nway_double_fault() {
    let mut cluster = nway_cluster();

    cluster.fail_node("n1");
    cluster.fail_node("n2");
    cluster.pump();

    assert_eq!(cluster.active("si-a"), vec!["su-3"]);
    assert!(cluster.standby("si-a").is_empty());
    assert!(cluster.is_stable("sg"));
}

/// A standby whose unit already carries its limit of actives is not
/// promoted; the instance waits for a unit with room.
#[test]
fn test_nway_failover_respects_active_limit() {
    let mut config = group_config(RedundancyModel::NWay, 2, &[]);
    config.groups[0].limits = Some(SgLimits {
        max_active_sis_per_su: 1,
        ..SgLimits::for_model(RedundancyModel::NWay)
    });
    for (rank, si) in ["si-a", "si-b"].iter().enumerate() {
        config
            .instances
            .push(InstanceConfig::new(*si, "sg", rank as u32 + 1).with_preferred(1, 1));
    }
    let mut cluster = Cluster::start(config);
    assert_eq!(cluster.active("si-a"), vec!["su-1"]);
    assert_eq!(cluster.standby("si-a"), vec!["su-2"]);
    assert_eq!(cluster.active("si-b"), vec!["su-2"]);
    assert_eq!(cluster.standby("si-b"), vec!["su-1"]);
    let failures = cluster.controller.metrics().placement_failures;

    cluster.fail_node("n1");
    cluster.pump();

    assert!(cluster.active("si-a").is_empty());
    assert_eq!(cluster.standby("si-a"), vec!["su-2"]);
    assert_eq!(cluster.active("si-b"), vec!["su-2"]);
    assert!(cluster.controller.metrics().placement_failures > failures);
    assert!(cluster.is_stable("sg"));

    cluster.restore_node("n1");

    assert_eq!(cluster.active("si-a"), vec!["su-1"]);
    assert_eq!(cluster.standby("si-a"), vec!["su-2"]);
    assert_eq!(cluster.active("si-b"), vec!["su-2"]);
}

// =============================================================================
// N-Way-Active
// =============================================================================

#[test]
fn test_nway_active_preferred_actives() {
    let mut config = group_config(RedundancyModel::NWayActive, 3, &[]);
    config
        .instances
        .push(InstanceConfig::new("si-a", "sg", 1).with_preferred(2, 0));
    let cluster = Cluster::start(config);

    assert_eq!(cluster.active("si-a"), vec!["su-1", "su-2"]);
    assert!(cluster.standby("si-a").is_empty());
}

/// Actives piled on one equally ranked unit are spread out again once the
/// other unit is back: the new active is confirmed before the old one goes.
#[test]
fn test_nway_active_redistributes_after_recovery() {
    let mut config = group_config(RedundancyModel::NWayActive, 2, &[]);
    for unit in &mut config.units {
        unit.rank = 1;
    }
    for (rank, si) in ["si-a", "si-b"].iter().enumerate() {
        config
            .instances
            .push(InstanceConfig::new(*si, "sg", rank as u32 + 1).with_preferred(1, 0));
    }
    let mut cluster = Cluster::start(config);
    assert_eq!(active_units(&cluster, &["si-a", "si-b"]), vec!["su-1", "su-2"]);

    cluster.fail_node("n2");
    cluster.pump();
    assert_eq!(active_units(&cluster, &["si-a", "si-b"]), vec!["su-1", "su-1"]);
    let mark = cluster.delivered.len();

    cluster.restore_node("n2");

    assert_eq!(active_units(&cluster, &["si-a", "si-b"]), vec!["su-1", "su-2"]);
    assert!(cluster.is_stable("sg"));
    let model = cluster.controller.model();
    let sg = model.group_id("sg").unwrap();
    assert_eq!(model.group(sg).unwrap().transfer, None);

    let moves: Vec<(String, &str)> = cluster.delivered[mark..]
        .iter()
        .map(|o| (o.unit.clone(), o.command.name()))
        .filter(|(_, name)| *name != "instantiate")
        .collect();
    let assigned = moves.iter().position(|m| *m == ("su-2".to_string(), "assign"));
    let removed = moves.iter().position(|m| *m == ("su-1".to_string(), "remove"));
    assert!(assigned.is_some() && removed.is_some());
    assert!(assigned < removed);
}

#[test]
fn test_nway_active_refills_after_node_loss() {
    let mut config = group_config(RedundancyModel::NWayActive, 3, &[]);
    config
        .instances
        .push(InstanceConfig::new("si-a", "sg", 1).with_preferred(2, 0));
    let mut cluster = Cluster::start(config);

    cluster.fail_node("n1");
    cluster.pump();

    assert_eq!(cluster.active("si-a"), vec!["su-2", "su-3"]);
}

// =============================================================================
// No-Redundancy
// =============================================================================

#[test]
fn test_no_redundancy_one_instance_per_unit() {
    let cluster = Cluster::start(group_config(
        RedundancyModel::NoRedundancy,
        2,
        &["si-a", "si-b"],
    ));

    assert_eq!(cluster.active("si-a"), vec!["su-1"]);
    assert_eq!(cluster.active("si-b"), vec!["su-2"]);
    assert!(cluster.standby("si-a").is_empty());
}

#[test]
fn test_no_redundancy_swap_rejected() {
    let mut cluster = Cluster::start(group_config(RedundancyModel::NoRedundancy, 1, &["si-a"]));

    let response = cluster.admin(1, AdminTarget::Instance("si-a".into()), AdminOp::Swap);

    assert_eq!(response, AdminResponse::RejectedInvalidState);
    assert_eq!(cluster.active("si-a"), vec!["su-1"]);
}

/// An instance left without a unit raises the unassigned alarm once, and
/// the alarm clears when the instance is served again.
#[test]
fn test_no_redundancy_unassigned_alarm() {
    let mut cluster = Cluster::start(group_config(
        RedundancyModel::NoRedundancy,
        2,
        &["si-a", "si-b"],
    ));
    let si = cluster.si("si-a");
    let raised = cluster.controller.metrics().unassigned_alarms;
    assert!(!cluster.controller.model().instance(si).unwrap().alarm_sent);

    cluster.fail_node("n1");
    cluster.pump();

    assert!(cluster.active("si-a").is_empty());
    assert!(cluster.controller.model().instance(si).unwrap().alarm_sent);
    assert_eq!(cluster.controller.metrics().unassigned_alarms, raised + 1);
    let published = cluster.sink.envelopes().into_iter().any(|e| {
        e.record
            == CheckpointRecord::Update {
                update: FieldUpdate::InstanceAlarmSent { si, sent: true },
            }
    });
    assert!(published);

    cluster.restore_node("n1");

    assert_eq!(cluster.active("si-a"), vec!["su-1"]);
    assert!(!cluster.controller.model().instance(si).unwrap().alarm_sent);
    assert_eq!(cluster.controller.metrics().unassigned_alarms, raised + 1);
}
