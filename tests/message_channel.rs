//! Message-id idempotence on the node agent channels

mod common;

use common::{two_n, Cluster};
use hagroups::controller::MessageOutcome;
use hagroups::model::{Key, PresenceState, SuId, SusiId};
use hagroups::transport::{Command, MessageBody, NodeMessage};

fn presence() -> MessageBody {
    MessageBody::Presence {
        state: PresenceState::Instantiated,
    }
}

#[test]
fn test_duplicate_is_ignored() {
    let mut cluster = Cluster::start(two_n(&["si-a"]));
    let su = cluster.su("su-1");
    let last = cluster.controller.model().unit(su).unwrap().rcv_msg_id;
    let seq = cluster.controller.model().journal_seq();

    let outcome = cluster
        .controller
        .handle_message(NodeMessage::new(su, last, MessageBody::UnitFailed))
        .unwrap();

    assert_eq!(outcome, MessageOutcome::Duplicate);
    assert_eq!(cluster.controller.metrics().messages_duplicate, 1);
    assert_eq!(cluster.controller.model().journal_seq(), seq);
    assert!(cluster.controller.take_commands().is_empty());
}

#[test]
fn test_gap_requests_one_resync() {
    let mut cluster = Cluster::start(two_n(&["si-a"]));
    let su = cluster.su("su-1");
    let expected = cluster.next_id(su);

    let first = cluster
        .controller
        .handle_message(NodeMessage::new(su, expected + 1, presence()))
        .unwrap();
    let second = cluster
        .controller
        .handle_message(NodeMessage::new(su, expected + 2, presence()))
        .unwrap();

    assert_eq!(first, MessageOutcome::Gap);
    assert_eq!(second, MessageOutcome::Gap);
    assert_eq!(cluster.controller.metrics().message_gaps, 2);
    let commands = cluster.controller.take_commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].command, Command::Resync { from: expected });
    assert!(cluster.controller.model().unit(su).unwrap().resync_pending);

    // The agent replays and reports where it ended.
    cluster.controller.resync_complete("su-1", expected).unwrap();
    assert!(!cluster.controller.model().unit(su).unwrap().resync_pending);
    assert_eq!(cluster.send("su-1", presence()), MessageOutcome::Processed);
}

#[test]
fn test_unknown_unit_ignored() {
    let mut cluster = Cluster::start(two_n(&["si-a"]));
    let stranger = SuId(Key::new(99, 7));

    let outcome = cluster
        .controller
        .handle_message(NodeMessage::new(stranger, 1, presence()))
        .unwrap();

    assert_eq!(outcome, MessageOutcome::Ignored);
}

#[test]
fn test_stale_reply_ignored() {
    let mut cluster = Cluster::start(two_n(&["si-a"]));
    let seq = cluster.controller.model().journal_seq();
    let bogus = SusiId(Key::new(42, 3));

    let outcome = cluster.send(
        "su-1",
        MessageBody::AssignmentReply {
            susi: bogus,
            ha: None,
            accepted: true,
        },
    );

    assert_eq!(outcome, MessageOutcome::Ignored);
    assert_eq!(cluster.controller.metrics().replies_ignored, 1);
    // Only the receive counter moved.
    assert_eq!(cluster.controller.model().journal_seq(), seq + 1);
    assert_eq!(cluster.active("si-a"), vec!["su-1"]);
}

/// Ids restart from one once the node is declared lost.
#[test]
fn test_ids_restart_after_node_loss() {
    let mut cluster = Cluster::start(two_n(&["si-a"]));
    let su = cluster.su("su-1");
    assert!(cluster.controller.model().unit(su).unwrap().rcv_msg_id > 1);

    cluster.fail_node("n1");
    cluster.pump();
    let unit = cluster.controller.model().unit(su).unwrap();
    assert_eq!(unit.rcv_msg_id, 0);
    assert_eq!(unit.snd_msg_id, 0);

    let outcome = cluster
        .controller
        .handle_message(NodeMessage::new(su, 1, presence()))
        .unwrap();
    assert_eq!(outcome, MessageOutcome::Processed);
}

/// Outbound sequence numbers grow by one per command on each unit.
#[test]
fn test_outbound_sequence_per_unit() {
    let cluster = Cluster::start(two_n(&["si-a", "si-b"]));

    for unit in ["su-1", "su-2"] {
        let seqs: Vec<u64> = cluster
            .delivered
            .iter()
            .filter(|o| o.unit == unit)
            .map(|o| o.seq)
            .collect();
        let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
        assert_eq!(seqs, expected);
    }
}
