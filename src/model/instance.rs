//! Service instance entity

use super::ids::{SgId, SiId, SusiId};
use super::states::{AdminState, HaState, SiAssignmentState, SiDepState};
use serde::{Deserialize, Serialize};

/// How an instance's active assignment is taken down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalMode {
    /// Stop immediately: active goes to quiesced.
    Lock,
    /// Drain: active goes to quiescing.
    Shutdown,
}

impl RemovalMode {
    /// HA state an active record is moved to before removal.
    pub fn quiesce_target(self) -> HaState {
        match self {
            RemovalMode::Lock => HaState::Quiesced,
            RemovalMode::Shutdown => HaState::Quiescing,
        }
    }
}

/// Owning edge from a sponsor to one of its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependent {
    pub si: SiId,
    /// Grace period before the dependent is unassigned after the sponsor
    /// loses its assignment.
    pub tolerance_ms: u64,
}

/// A logical workload assigned to one or more units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub name: String,
    /// Owning group, lookup only.
    pub sg: SgId,
    pub rank: u32,
    pub admin_state: AdminState,
    pub assignment_state: SiAssignmentState,
    pub dep_state: SiDepState,
    pub pref_active_assignments: u32,
    pub pref_standby_assignments: u32,
    /// Shared assignment records, in creation order.
    pub assignments: Vec<SusiId>,
    /// Instances depending on this one.
    pub dependents: Vec<Dependent>,
    /// Instances this one depends on, lookup only.
    pub sponsors: Vec<SiId>,
    /// Removal requested but waiting for dependents to go first.
    pub pending_unassign: Option<RemovalMode>,
    /// The unassigned alarm is raised.
    #[serde(default)]
    pub alarm_sent: bool,
}

impl ServiceInstance {
    pub fn new(name: impl Into<String>, sg: SgId, rank: u32) -> Self {
        Self {
            name: name.into(),
            sg,
            rank,
            admin_state: AdminState::Unlocked,
            assignment_state: SiAssignmentState::Unassigned,
            dep_state: SiDepState::NoDependency,
            pref_active_assignments: 1,
            pref_standby_assignments: 1,
            assignments: Vec::new(),
            dependents: Vec::new(),
            sponsors: Vec::new(),
            pending_unassign: None,
            alarm_sent: false,
        }
    }

    pub fn with_preferred(mut self, active: u32, standby: u32) -> Self {
        self.pref_active_assignments = active;
        self.pref_standby_assignments = standby;
        self
    }

    pub fn tolerance_for(&self, dependent: SiId) -> Option<u64> {
        self.dependents
            .iter()
            .find(|d| d.si == dependent)
            .map(|d| d.tolerance_ms)
    }
}
