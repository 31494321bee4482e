//! Observable events
//!
//! Every log line emitted by the engine carries one of these names in its
//! `event` field. Names are stable and upper-snake.

use std::fmt;

/// Observable events of the assignment engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    // Lifecycle
    /// Controller created
    ControllerStarted,
    /// Standby took over the active role
    ControllerPromoted,
    /// Controller rebuilt from a snapshot
    ControllerReinitialized,
    /// Configuration accepted
    ConfigApplied,
    /// Configuration rejected by validation
    ConfigRejected,

    // Group state machine
    /// Group state changed
    FsmTransition,
    /// Group returned to stable
    GroupStable,
    /// Event rejected because the group is busy
    GroupBusy,

    // Assignments
    /// New record sent to a unit
    AssignmentCreated,
    /// HA state change sent to a unit
    AssignmentModified,
    /// Remove sent to a unit
    AssignmentRemoved,
    /// Record dropped without a round trip
    AssignmentDiscarded,
    /// Node confirmed a change
    ReplyAccepted,
    /// Node refused a change
    ReplyRejected,
    /// Reply matched nothing outstanding
    ReplyIgnored,
    /// No eligible unit for an instance
    PlacementFailed,
    /// Instance left without an active assignment, alarm raised
    InstanceUnassigned,
    /// Unassigned-instance alarm cleared
    InstanceAlarmCleared,
    /// Instance moved toward a less loaded unit
    InstanceTransfer,
    /// Group moved back toward its preferred ranks
    GroupAdjust,
    /// Spare unit told to instantiate
    SpareInstantiated,

    // Faults
    /// Unit fault handled
    UnitFault,
    /// Node lost
    NodeFailed,
    /// Standby promoted to active
    Failover,
    /// Active and standby exchanged
    Swap,

    // Escalation
    /// Component restart requested
    ComponentRestart,
    /// Unit restart requested
    UnitRestart,
    /// Restart limits exhausted, failing over
    EscalationFailover,
    /// Fault while already failing over, node-level recovery
    EscalationNode,
    /// Probation expired, counters reset
    ProbationExpired,

    // Dependencies
    /// Dependency edge added
    DependencyAdded,
    /// Dependency edge removed
    DependencyRemoved,
    /// Dependency state changed
    DependencyState,
    /// Tolerance timer started
    ToleranceStarted,
    /// Tolerance timer expired
    ToleranceExpired,

    // Transport
    /// Command queued toward a unit
    CommandSent,
    /// Inbound message already processed
    MessageDuplicate,
    /// Inbound message beyond the next expected id
    MessageGap,
    /// Resync requested from a unit
    ResyncRequested,
    /// Channel resynchronized
    ResyncComplete,

    // Checkpoint
    /// Record journaled
    CheckpointRecord,
    /// Sink rejected a record
    CheckpointFailed,
    /// Standby must be reinitialized from a snapshot
    StandbyOutOfSync,
    /// Full snapshot taken
    SnapshotTaken,
    /// Standby applied a record
    ReplayApplied,
    /// Standby cannot reproduce the stream
    ReplayDiverged,

    // Administration
    /// Request accepted
    AdminAccepted,
    /// Request rejected
    AdminRejected,
    /// Asynchronous request finished
    AdminCompleted,

    /// Internal invariant broken (FATAL)
    InvariantViolation,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ControllerStarted => "CONTROLLER_STARTED",
            Event::ControllerPromoted => "CONTROLLER_PROMOTED",
            Event::ControllerReinitialized => "CONTROLLER_REINITIALIZED",
            Event::ConfigApplied => "CONFIG_APPLIED",
            Event::ConfigRejected => "CONFIG_REJECTED",

            Event::FsmTransition => "SG_FSM_TRANSITION",
            Event::GroupStable => "SG_STABLE",
            Event::GroupBusy => "SG_BUSY",

            Event::AssignmentCreated => "SUSI_CREATED",
            Event::AssignmentModified => "SUSI_MODIFIED",
            Event::AssignmentRemoved => "SUSI_REMOVED",
            Event::AssignmentDiscarded => "SUSI_DISCARDED",
            Event::ReplyAccepted => "REPLY_ACCEPTED",
            Event::ReplyRejected => "REPLY_REJECTED",
            Event::ReplyIgnored => "REPLY_IGNORED",
            Event::PlacementFailed => "PLACEMENT_FAILED",
            Event::InstanceUnassigned => "SI_UNASSIGNED",
            Event::InstanceAlarmCleared => "SI_ALARM_CLEARED",
            Event::InstanceTransfer => "SI_TRANSFER",
            Event::GroupAdjust => "SG_ADJUST",
            Event::SpareInstantiated => "SPARE_SU_INSTANTIATED",

            Event::UnitFault => "SU_FAULT",
            Event::NodeFailed => "NODE_FAILED",
            Event::Failover => "FAILOVER",
            Event::Swap => "SI_SWAP",

            Event::ComponentRestart => "COMP_RESTART",
            Event::UnitRestart => "SU_RESTART",
            Event::EscalationFailover => "ESCALATION_FAILOVER",
            Event::EscalationNode => "ESCALATION_NODE",
            Event::ProbationExpired => "PROBATION_EXPIRED",

            Event::DependencyAdded => "DEPENDENCY_ADDED",
            Event::DependencyRemoved => "DEPENDENCY_REMOVED",
            Event::DependencyState => "DEPENDENCY_STATE",
            Event::ToleranceStarted => "TOLERANCE_STARTED",
            Event::ToleranceExpired => "TOLERANCE_EXPIRED",

            Event::CommandSent => "COMMAND_SENT",
            Event::MessageDuplicate => "MESSAGE_DUPLICATE",
            Event::MessageGap => "MESSAGE_GAP",
            Event::ResyncRequested => "RESYNC_REQUESTED",
            Event::ResyncComplete => "RESYNC_COMPLETE",

            Event::CheckpointRecord => "CHECKPOINT_RECORD",
            Event::CheckpointFailed => "CHECKPOINT_FAILED",
            Event::StandbyOutOfSync => "STANDBY_OUT_OF_SYNC",
            Event::SnapshotTaken => "SNAPSHOT_TAKEN",
            Event::ReplayApplied => "REPLAY_APPLIED",
            Event::ReplayDiverged => "REPLAY_DIVERGED",

            Event::AdminAccepted => "ADMIN_ACCEPTED",
            Event::AdminRejected => "ADMIN_REJECTED",
            Event::AdminCompleted => "ADMIN_COMPLETED",

            Event::InvariantViolation => "INVARIANT_VIOLATION",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::InvariantViolation)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
