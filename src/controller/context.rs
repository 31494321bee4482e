//! Explicit controller context
//!
//! Everything an operation may touch travels in one struct, passed by
//! mutable reference. There is no process-wide state.

use crate::config::Settings;
use crate::fsm::OperationKind;
use crate::model::EntityModel;
use crate::observability::MetricsRegistry;
use crate::timer::TimerTable;
use crate::transport::Outbox;
use chrono::{DateTime, Utc};

/// Mutable state shared by strategies, the state machine and the
/// dependency engine while one event is processed.
#[derive(Debug)]
pub struct Ctx {
    pub model: EntityModel,
    pub outbox: Outbox,
    pub timers: TimerTable,
    pub metrics: MetricsRegistry,
    pub settings: Settings,
    /// Current instant as supplied by the caller.
    pub now: DateTime<Utc>,
    /// Operation being dispatched, used to pick the state a stable group
    /// moves to when work is added to it.
    pub(crate) current_op: Option<OperationKind>,
}

impl Ctx {
    pub fn new(model: EntityModel, settings: Settings, now: DateTime<Utc>) -> Self {
        Self {
            model,
            outbox: Outbox::new(),
            timers: TimerTable::new(),
            metrics: MetricsRegistry::new(),
            settings,
            now,
            current_op: None,
        }
    }
}
