//! Standby replay, journal files, snapshots and takeover

mod common;

use common::{depend, epoch, two_n, Cluster};
use hagroups::checkpoint::{
    read_journal, CheckpointEnvelope, CheckpointError, CheckpointResult, CheckpointSink, FileSink,
    MemorySink,
};
use hagroups::config::{GroupConfig, InstanceConfig, Settings, UnitConfig};
use hagroups::controller::{Controller, Role};
use hagroups::model::{ModelError, RedundancyModel};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Sink whose appends fail while `down` is set.
#[derive(Default)]
struct FlakySink {
    down: AtomicBool,
    inner: MemorySink,
}

impl CheckpointSink for FlakySink {
    fn append(&self, envelope: &CheckpointEnvelope) -> CheckpointResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "replication link down").into());
        }
        self.inner.append(envelope)
    }
}

fn replay_into_standby(cluster: &Cluster) -> Controller {
    let mut standby = Controller::standby(Settings::default(), epoch());
    for envelope in cluster.sink.envelopes() {
        assert!(standby.apply_checkpoint(&envelope).unwrap());
    }
    standby
}

/// After a bring-up and a failover the standby holds the same model,
/// record for record.
#[test]
fn test_standby_replay_matches_active() {
    let mut cluster = Cluster::start(two_n(&["si-a", "si-b"]));
    cluster.fail_node("n1");
    cluster.pump();
    cluster.restore_node("n1");

    let standby = replay_into_standby(&cluster);

    assert_eq!(standby.role(), Role::Standby);
    assert_eq!(standby.model().state(), cluster.controller.model().state());
    assert_eq!(
        standby.model().journal_seq(),
        cluster.sink.len() as u64
    );
}

#[test]
fn test_replay_skips_applied_and_rejects_gaps() {
    let cluster = Cluster::start(two_n(&["si-a"]));
    let envelopes = cluster.sink.envelopes();
    let mut standby = Controller::standby(Settings::default(), epoch());

    assert!(standby.apply_checkpoint(&envelopes[0]).unwrap());
    assert!(!standby.apply_checkpoint(&envelopes[0]).unwrap());
    let err = standby.apply_checkpoint(&envelopes[2]).unwrap_err();
    assert!(matches!(
        err,
        CheckpointError::Gap {
            expected: 2,
            received: 3
        }
    ));
    assert!(err.requires_snapshot());
    assert_eq!(standby.model().journal_seq(), 1);
}

#[test]
fn test_active_refuses_replay() {
    let mut cluster = Cluster::start(two_n(&["si-a"]));
    let envelope = cluster.sink.envelopes()[0].clone();

    assert!(matches!(
        cluster.controller.apply_checkpoint(&envelope),
        Err(CheckpointError::NotStandby)
    ));
}

#[test]
fn test_standby_refuses_events() {
    let mut standby = Controller::standby(Settings::default(), epoch());

    assert_eq!(standby.node_failed("n1"), Err(ModelError::NotActive));
    assert_eq!(standby.advance_to(epoch()), Err(ModelError::NotActive));
}

/// Journal written to disk replays to the same model.
#[test]
fn test_file_journal_replays() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("journal.log");
    let sink = Arc::new(FileSink::open(&path).unwrap());

    let mut config = two_n(&["si-a"]);
    config
        .groups
        .push(GroupConfig::new("nwa", RedundancyModel::NWayActive));
    config.units.push(UnitConfig::new("su-x", "nwa", "n3", 1));
    config
        .instances
        .push(InstanceConfig::new("si-x", "nwa", 1).with_preferred(1, 0));
    let mut active = Controller::from_config(&config, sink, epoch()).unwrap();
    active.node_failed("n3").unwrap();
    active.delete_instance("si-x").unwrap();

    let envelopes = read_journal(&path).unwrap();
    assert_eq!(envelopes.len() as u64, active.model().journal_seq());

    let mut standby = Controller::standby(Settings::default(), epoch());
    for envelope in &envelopes {
        standby.apply_checkpoint(envelope).unwrap();
    }
    assert_eq!(standby.model().state(), active.model().state());
    assert!(standby.model().instance_id("si-x").is_err());
}

/// Snapshot, later records, then takeover: the new active continues from
/// where the old one stopped.
#[test]
fn test_snapshot_then_promote() {
    let mut cluster = Cluster::start(two_n(&["si-a"]));
    let snapshot = cluster.controller.snapshot();
    cluster.fail_node("n1");
    cluster.pump();

    let mut standby = Controller::standby(Settings::default(), epoch());
    standby.reinitialize_from_snapshot(&snapshot);
    let mut applied = 0;
    for envelope in cluster.sink.envelopes() {
        if standby.apply_checkpoint(&envelope).unwrap() {
            applied += 1;
        }
    }
    assert_eq!(
        applied as u64,
        cluster.controller.model().journal_seq() - snapshot.journal_seq()
    );
    assert_eq!(standby.model().state(), cluster.controller.model().state());

    let sink = MemorySink::new();
    standby.promote(epoch(), Arc::new(sink.clone())).unwrap();
    assert_eq!(standby.role(), Role::Active);
    assert!(standby.promote(epoch(), Arc::new(sink.clone())).is_err());

    // The new active keeps journaling from the same sequence.
    let seq = standby.model().journal_seq();
    standby.node_failed("n2").unwrap();
    let published = sink.envelopes();
    assert!(!published.is_empty());
    assert_eq!(published[0].seq, seq + 1);
}

/// A tolerance timer running on the old active is armed again on the new
/// one.
#[test]
fn test_promote_rearms_tolerance_timers() {
    let mut config = two_n(&["web"]);
    config
        .groups
        .push(GroupConfig::new("base", RedundancyModel::NoRedundancy));
    config.units.push(UnitConfig::new("su-b", "base", "nb", 1));
    config.instances.push(InstanceConfig::new("db", "base", 1));
    depend(&mut config, "db", "web", Some(1_000));
    let mut cluster = Cluster::start(config);
    cluster.fail_node("nb");
    cluster.pump();
    assert!(cluster.controller.next_deadline().is_some());

    let mut standby = replay_into_standby(&cluster);
    assert_eq!(standby.next_deadline(), None);

    let later = epoch() + chrono::Duration::milliseconds(300);
    standby.promote(later, Arc::new(MemorySink::new())).unwrap();

    assert_eq!(
        standby.next_deadline(),
        Some(later + chrono::Duration::milliseconds(1_000))
    );
}

/// Records the sink refuses are counted as failures, not as published,
/// and the loss stays latched until the standby is resynced.
#[test]
fn test_refused_records_latch_resync() {
    let sink = Arc::new(FlakySink::default());
    sink.down.store(true, Ordering::SeqCst);
    let mut active = Controller::from_config(&two_n(&["si-a"]), sink.clone(), epoch()).unwrap();

    let refused = active.model().journal_seq();
    assert!(refused > 0);
    let metrics = active.metrics();
    assert_eq!(metrics.checkpoint_records, 0);
    assert_eq!(metrics.checkpoint_failures, refused);
    assert_eq!(active.replication_lost_at(), Some(1));
    assert!(sink.inner.is_empty());

    sink.down.store(false, Ordering::SeqCst);
    active.node_failed("n2").unwrap();
    assert!(!sink.inner.is_empty());
    // Publishing again does not clear the loss.
    assert_eq!(active.replication_lost_at(), Some(1));
    assert_eq!(active.metrics().checkpoint_failures, refused);

    let snapshot = active.resync_standby();
    assert_eq!(active.replication_lost_at(), None);

    let mut standby = Controller::standby(Settings::default(), epoch());
    standby.reinitialize_from_snapshot(&snapshot);
    for envelope in sink.inner.envelopes() {
        standby.apply_checkpoint(&envelope).unwrap();
    }
    assert_eq!(standby.model().state(), active.model().state());
}
