//! Configuration documents applied to a running controller

mod common;

use common::{group_config, two_n, Cluster};
use hagroups::config::{ClusterConfig, ConfigError, GroupConfig, InstanceConfig, UnitConfig};
use hagroups::model::{ModelError, RedundancyModel, SgLimits};

const DOC: &str = r#"{
    "groups": [
        { "name": "sg", "model": "n_way" }
    ],
    "units": [
        { "name": "su-1", "group": "sg", "node": "n1", "rank": 1 },
        { "name": "su-2", "group": "sg", "node": "n2", "rank": 2 },
        { "name": "su-3", "group": "sg", "node": "n3", "rank": 3 }
    ],
    "instances": [
        { "name": "si-a", "group": "sg", "rank": 1, "pref_active": 1, "pref_standby": 2 }
    ]
}"#;

#[test]
fn test_json_document_brings_up_cluster() {
    let config = ClusterConfig::from_json(DOC).unwrap();
    let cluster = Cluster::start(config);

    assert_eq!(cluster.active("si-a"), vec!["su-1"]);
    assert_eq!(cluster.standby("si-a"), vec!["su-2", "su-3"]);
}

#[test]
fn test_reconfigure_instance_trims_standbys() {
    let mut cluster = Cluster::start(ClusterConfig::from_json(DOC).unwrap());

    cluster.controller.reconfigure_instance("si-a", 1, 1).unwrap();
    cluster.pump();

    assert_eq!(cluster.active("si-a"), vec!["su-1"]);
    assert_eq!(cluster.standby("si-a"), vec!["su-2"]);
}

#[test]
fn test_reconfigure_instance_validated() {
    let mut cluster = Cluster::start(ClusterConfig::from_json(DOC).unwrap());

    let err = cluster.controller.reconfigure_instance("si-a", 1, 3).unwrap_err();

    assert!(matches!(err, ConfigError::InvalidConfiguration(_)));
    assert_eq!(cluster.standby("si-a").len(), 2);
}

#[test]
fn test_reconfigure_group_rejects_model_change() {
    let mut cluster = Cluster::start(two_n(&["si-a"]));

    let err = cluster
        .controller
        .reconfigure_group(&GroupConfig::new("sg", RedundancyModel::NWay))
        .unwrap_err();

    assert!(matches!(err, ConfigError::InvalidConfiguration(_)));
}

#[test]
fn test_reconfigure_busy_group_in_use() {
    let mut cluster = Cluster::start(two_n(&["si-a"]));
    cluster.fail_node("n1");

    let err = cluster
        .controller
        .reconfigure_group(&GroupConfig::new("sg", RedundancyModel::TwoN))
        .unwrap_err();

    assert!(matches!(err, ConfigError::Model(ModelError::InUse(_))));
}

#[test]
fn test_reconfigure_group_limits() {
    let mut cluster = Cluster::start(group_config(RedundancyModel::NPlusM, 3, &["si-a"]));
    let mut group = GroupConfig::new("sg", RedundancyModel::NPlusM);
    group.limits = Some(SgLimits {
        pref_active_sus: 1,
        ..SgLimits::for_model(RedundancyModel::NPlusM)
    });

    cluster.controller.reconfigure_group(&group).unwrap();
    cluster.pump();

    let model = cluster.controller.model();
    let sg = model.group_id("sg").unwrap();
    assert_eq!(model.group(sg).unwrap().limits.pref_active_sus, 1);
    assert_eq!(cluster.active("si-a").len(), 1);
}

/// A second document adds a group next to the running one.
#[test]
fn test_apply_additional_config() {
    let mut cluster = Cluster::start(two_n(&["si-a"]));

    let mut extra = ClusterConfig::default();
    extra
        .groups
        .push(GroupConfig::new("batch", RedundancyModel::NWayActive));
    extra.units.push(UnitConfig::new("su-x", "batch", "n1", 1));
    extra
        .instances
        .push(InstanceConfig::new("si-x", "batch", 1));
    cluster.controller.apply_config(&extra).unwrap();
    cluster.pump();

    assert_eq!(cluster.active("si-x"), vec!["su-x"]);
    assert_eq!(cluster.active("si-a"), vec!["su-1"]);
}

#[test]
fn test_existing_names_rejected() {
    let mut cluster = Cluster::start(two_n(&["si-a"]));
    let seq = cluster.controller.model().journal_seq();

    let mut extra = ClusterConfig::default();
    extra
        .groups
        .push(GroupConfig::new("other", RedundancyModel::NoRedundancy));
    extra.units.push(UnitConfig::new("su-1", "other", "n9", 1));
    let err = cluster.controller.apply_config(&extra).unwrap_err();

    assert!(matches!(err, ConfigError::InvalidConfiguration(_)));
    assert_eq!(cluster.controller.model().journal_seq(), seq);
    assert!(cluster.controller.model().group_id("other").is_err());
}

#[test]
fn test_invalid_document_rejected() {
    let mut config = two_n(&["si-a"]);
    config.instances[0] = InstanceConfig::new("si-a", "sg", 1).with_preferred(2, 1);

    let err = ClusterConfig::from_json(&config.to_json().unwrap()).unwrap_err();

    assert!(matches!(err, ConfigError::InvalidConfiguration(_)));
}
