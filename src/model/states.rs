//! State enumerations shared by the entity model
//!
//! States are explicit and enumerable. Derived states (unit readiness,
//! instance assignment state) are computed from the stored ones and never
//! set directly by callers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Redundancy model a service group is bound to at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedundancyModel {
    /// One active unit, one standby unit, every instance on both.
    TwoN,
    /// N active units with disjoint instance partitions, M standby units.
    NPlusM,
    /// One active and several standbys per instance, mixed roles per unit.
    NWay,
    /// Several actives per instance, no standby role.
    NWayActive,
    /// One instance per unit, no failover.
    NoRedundancy,
}

impl RedundancyModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TwoN => "2N",
            Self::NPlusM => "N+M",
            Self::NWay => "N-Way",
            Self::NWayActive => "N-Way-Active",
            Self::NoRedundancy => "No-Redundancy",
        }
    }

    /// Whether the model knows a standby role at all.
    pub fn has_standby_role(&self) -> bool {
        matches!(self, Self::TwoN | Self::NPlusM | Self::NWay)
    }
}

impl fmt::Display for RedundancyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative state of a group, unit or instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminState {
    Unlocked,
    Locked,
    /// Units only: locked and kept terminated.
    LockedInstantiation,
    ShuttingDown,
}

impl AdminState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlocked => "UNLOCKED",
            Self::Locked => "LOCKED",
            Self::LockedInstantiation => "LOCKED_INSTANTIATION",
            Self::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}

/// Operational state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperState {
    Enabled,
    Disabled,
}

/// Presence state of a unit as reported by its node agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Uninstantiated,
    Instantiating,
    Instantiated,
    Terminating,
    Restarting,
    InstantiationFailed,
    TerminationFailed,
}

impl PresenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninstantiated => "UNINSTANTIATED",
            Self::Instantiating => "INSTANTIATING",
            Self::Instantiated => "INSTANTIATED",
            Self::Terminating => "TERMINATING",
            Self::Restarting => "RESTARTING",
            Self::InstantiationFailed => "INSTANTIATION_FAILED",
            Self::TerminationFailed => "TERMINATION_FAILED",
        }
    }

    /// Whether the unit's processes are up (possibly restarting in place).
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Instantiated | Self::Restarting)
    }
}

/// Readiness of a unit, derived from admin, oper and presence states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    OutOfService,
    InService,
    Stopping,
}

impl ReadinessState {
    /// Derive readiness.
    pub fn derive(admin: AdminState, oper: OperState, presence: PresenceState) -> Self {
        if oper != OperState::Enabled || !presence.is_running() {
            return Self::OutOfService;
        }
        match admin {
            AdminState::Unlocked => Self::InService,
            AdminState::ShuttingDown => Self::Stopping,
            AdminState::Locked | AdminState::LockedInstantiation => Self::OutOfService,
        }
    }
}

/// Role a unit plays for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaState {
    Active,
    Standby,
    Quiescing,
    Quiesced,
}

impl HaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Standby => "STANDBY",
            Self::Quiescing => "QUIESCING",
            Self::Quiesced => "QUIESCED",
        }
    }

    /// Active, or on its way out of the active role.
    pub fn is_active_role(&self) -> bool {
        matches!(self, Self::Active | Self::Quiescing | Self::Quiesced)
    }
}

impl fmt::Display for HaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assignment state of a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SusiState {
    /// Created, no command issued yet.
    Unassigned,
    /// Assign or HA-state change sent, reply outstanding.
    Assigning,
    /// Last change confirmed by the node.
    Assigned,
    /// Remove sent, reply outstanding.
    Removing,
}

impl SusiState {
    /// Whether a reply is outstanding.
    pub fn in_flight(&self) -> bool {
        matches!(self, Self::Assigning | Self::Removing)
    }
}

/// Assignment state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiAssignmentState {
    Unassigned,
    Assigning,
    Assigned,
    BeingRemoved,
}

impl SiAssignmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unassigned => "UNASSIGNED",
            Self::Assigning => "ASSIGNING",
            Self::Assigned => "ASSIGNED",
            Self::BeingRemoved => "BEING_REMOVED",
        }
    }
}

/// Dependency state of an instance relative to its sponsors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiDepState {
    NoDependency,
    SponsorUnassigned,
    Assigned,
    TolTimerRunning,
    ReadyToUnassign,
    UnassigningDueToDep,
    FailoverInProgress,
    ReadyToAssign,
}

impl SiDepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoDependency => "NO_DEPENDENCY",
            Self::SponsorUnassigned => "SPONSOR_UNASSIGNED",
            Self::Assigned => "ASSIGNED",
            Self::TolTimerRunning => "TOL_TIMER_RUNNING",
            Self::ReadyToUnassign => "READY_TO_UNASSIGN",
            Self::UnassigningDueToDep => "UNASSIGNING_DUE_TO_DEP",
            Self::FailoverInProgress => "FAILOVER_IN_PROGRESS",
            Self::ReadyToAssign => "READY_TO_ASSIGN",
        }
    }

    /// Whether the instance may be placed right now.
    pub fn permits_assignment(&self) -> bool {
        matches!(self, Self::NoDependency | Self::Assigned)
    }
}

impl fmt::Display for SiDepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_requires_all_three() {
        use AdminState::*;
        use OperState::*;
        use PresenceState::*;

        assert_eq!(
            ReadinessState::derive(Unlocked, Enabled, Instantiated),
            ReadinessState::InService
        );
        assert_eq!(
            ReadinessState::derive(Unlocked, Disabled, Instantiated),
            ReadinessState::OutOfService
        );
        assert_eq!(
            ReadinessState::derive(Unlocked, Enabled, Instantiating),
            ReadinessState::OutOfService
        );
        assert_eq!(
            ReadinessState::derive(Locked, Enabled, Instantiated),
            ReadinessState::OutOfService
        );
        assert_eq!(
            ReadinessState::derive(ShuttingDown, Enabled, Restarting),
            ReadinessState::Stopping
        );
    }

    #[test]
    fn test_standby_role_by_model() {
        assert!(RedundancyModel::TwoN.has_standby_role());
        assert!(RedundancyModel::NWay.has_standby_role());
        assert!(!RedundancyModel::NWayActive.has_standby_role());
        assert!(!RedundancyModel::NoRedundancy.has_standby_role());
    }
}
