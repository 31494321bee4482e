//! Administrative surface
//!
//! Lock, unlock, shutdown, restart and swap requests addressed by name to a
//! group, unit or instance. A request is answered at once:
//!
//! - `Success` when the operation finished within the request
//! - `Accepted` when it continues asynchronously; an [`AdminCompletion`]
//!   carrying the same invocation id follows once the group is stable again
//! - `RejectedInUse` when the owning group is busy
//! - `RejectedInvalidState` when the target's state forbids the operation
//!
//! Unknown names are reported as `ModelError::NotFound`.

mod handler;

pub use handler::dispatch;

use crate::model::SgId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminOp {
    Lock,
    Unlock,
    Shutdown,
    Restart,
    Swap,
    /// Units only: keep a locked unit terminated.
    LockInstantiation,
    /// Units only: instantiate a unit again after lock-instantiation.
    UnlockInstantiation,
}

impl AdminOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminOp::Lock => "LOCK",
            AdminOp::Unlock => "UNLOCK",
            AdminOp::Shutdown => "SHUTDOWN",
            AdminOp::Restart => "RESTART",
            AdminOp::Swap => "SWAP",
            AdminOp::LockInstantiation => "LOCK_INSTANTIATION",
            AdminOp::UnlockInstantiation => "UNLOCK_INSTANTIATION",
        }
    }
}

/// Entity an administrative request is addressed to, by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum AdminTarget {
    Group(String),
    Unit(String),
    Instance(String),
}

impl AdminTarget {
    pub fn name(&self) -> &str {
        match self {
            AdminTarget::Group(name) | AdminTarget::Unit(name) | AdminTarget::Instance(name) => {
                name
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AdminTarget::Group(_) => "group",
            AdminTarget::Unit(_) => "unit",
            AdminTarget::Instance(_) => "instance",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRequest {
    /// Caller-chosen id echoed in the completion.
    pub invocation: u64,
    pub target: AdminTarget,
    pub op: AdminOp,
}

impl AdminRequest {
    pub fn new(invocation: u64, target: AdminTarget, op: AdminOp) -> Self {
        Self {
            invocation,
            target,
            op,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminResponse {
    Accepted,
    RejectedInvalidState,
    RejectedInUse,
    Success,
}

impl AdminResponse {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminResponse::Accepted => "ACCEPTED",
            AdminResponse::RejectedInvalidState => "REJECTED_INVALID_STATE",
            AdminResponse::RejectedInUse => "REJECTED_IN_USE",
            AdminResponse::Success => "SUCCESS",
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            AdminResponse::RejectedInvalidState | AdminResponse::RejectedInUse
        )
    }
}

/// Final outcome of an accepted request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCompletion {
    pub invocation: u64,
    pub target: AdminTarget,
    pub op: AdminOp,
    pub result: AdminResponse,
}

/// Accepted requests waiting for their group to become stable.
///
/// Held by the active controller only; a standby taking over does not
/// inherit outstanding invocations.
#[derive(Debug, Clone, Default)]
pub struct PendingInvocations {
    pending: Vec<(SgId, AdminRequest)>,
}

impl PendingInvocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sg: SgId, request: AdminRequest) {
        self.pending.push((sg, request));
    }

    /// Complete every invocation waiting on `sg`.
    pub fn complete_group(&mut self, sg: SgId) -> Vec<AdminCompletion> {
        let (done, waiting): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.pending).into_iter().partition(|(g, _)| *g == sg);
        self.pending = waiting;
        done.into_iter()
            .map(|(_, request)| AdminCompletion {
                invocation: request.invocation,
                target: request.target,
                op: request.op,
                result: AdminResponse::Success,
            })
            .collect()
    }

    /// Remove an invocation; returns whether it was still pending.
    pub fn take(&mut self, invocation: u64) -> bool {
        let before = self.pending.len();
        self.pending.retain(|(_, r)| r.invocation != invocation);
        self.pending.len() != before
    }

    pub fn is_pending(&self, invocation: u64) -> bool {
        self.pending.iter().any(|(_, r)| r.invocation == invocation)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
