//! Controller: the explicit context object of the engine
//!
//! One controller processes one ordered stream of events: node messages,
//! administrative requests, timer ticks and configuration changes. Each
//! event runs to completion:
//!
//! 1. The event is dispatched to the owning group's strategy.
//! 2. The settle loop re-evaluates dependents of instances whose
//!    assignment state changed, unassigns dependents waiting for a stable
//!    group, stabilizes groups whose work is done and realigns them.
//! 3. The invariants are verified; a violation is fatal.
//!
//! Commands for node agents accumulate in the outbox and are collected
//! with [`Controller::take_commands`]. Every model mutation has already
//! been published to the checkpoint sink when the event returns. A record
//! the sink refuses latches [`Controller::replication_lost_at`] until the
//! standby is reinitialized from [`Controller::resync_standby`].
//!
//! A standby controller only replays the checkpoint stream. It becomes
//! active through [`Controller::promote`].

mod context;
pub mod invariants;

pub use context::Ctx;
pub use invariants::InvariantViolation;

use crate::admin::{self, AdminCompletion, AdminRequest, AdminResponse, PendingInvocations};
use crate::checkpoint::{
    CheckpointEnvelope, CheckpointError, CheckpointResult, CheckpointSink, FieldUpdate, NullSink,
    Snapshot,
};
use crate::config::{
    validate_group, ClusterConfig, ConfigError, ConfigResult, GroupConfig, InstanceConfig,
    Settings,
};
use crate::dependency;
use crate::escalation::{self, Probation};
use crate::fsm::{self, OperationKind};
use crate::model::{
    AdminState, EntityModel, ModelError, ModelResult, OperState, PresenceState, ServiceGroup,
    ServiceInstance, ServiceUnit, SgId, SiId, SuId,
};
use crate::observability::{Event, MetricsSnapshot};
use crate::redundancy::{self, ReplyOutcome};
use crate::timer::TimerKey;
use crate::transport::{Command, InboundCheck, MessageBody, NodeMessage, Outbound};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Role of a controller instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Active,
    Standby,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Active => "ACTIVE",
            Role::Standby => "STANDBY",
        }
    }
}

/// What became of an inbound node message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Processed,
    /// Id already processed, nothing changed.
    Duplicate,
    /// Id beyond the next expected one, rejected until resync.
    Gap,
    /// In order, but matched nothing outstanding.
    Ignored,
}

#[derive(Debug)]
pub struct Controller {
    id: Uuid,
    role: Role,
    ctx: Ctx,
    invocations: PendingInvocations,
    completions: Vec<AdminCompletion>,
}

impl Controller {
    /// Active controller with an empty model publishing to `sink`.
    pub fn new(sink: Arc<dyn CheckpointSink>, settings: Settings, now: DateTime<Utc>) -> Self {
        Self::with_role(Role::Active, EntityModel::with_sink(sink), settings, now)
    }

    /// Standby controller with an empty model.
    pub fn standby(settings: Settings, now: DateTime<Utc>) -> Self {
        Self::with_role(Role::Standby, EntityModel::new(), settings, now)
    }

    /// Active controller built from a validated configuration.
    pub fn from_config(
        config: &ClusterConfig,
        sink: Arc<dyn CheckpointSink>,
        now: DateTime<Utc>,
    ) -> ConfigResult<Self> {
        let mut controller = Self::new(sink, config.settings, now);
        controller.apply_config(config)?;
        Ok(controller)
    }

    fn with_role(role: Role, model: EntityModel, settings: Settings, now: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4();
        info!(
            event = Event::ControllerStarted.as_str(),
            controller = %id,
            role = role.as_str(),
            "controller started"
        );
        Self {
            id,
            role,
            ctx: Ctx::new(model, settings, now),
            invocations: PendingInvocations::new(),
            completions: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn model(&self) -> &EntityModel {
        &self.ctx.model
    }

    pub fn settings(&self) -> &Settings {
        &self.ctx.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.ctx.now
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// Earliest armed timer deadline.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.ctx.timers.next_deadline()
    }

    /// Commands queued for node agents since the last call, in order.
    pub fn take_commands(&mut self) -> Vec<Outbound> {
        self.ctx.outbox.drain()
    }

    /// Completions of accepted administrative requests.
    pub fn take_completions(&mut self) -> Vec<AdminCompletion> {
        std::mem::take(&mut self.completions)
    }

    fn ensure_active(&self) -> ModelResult<()> {
        match self.role {
            Role::Active => Ok(()),
            Role::Standby => Err(ModelError::NotActive),
        }
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Create the groups, units, instances and edges of a configuration.
    ///
    /// The whole document is validated and checked against existing names
    /// before the first entity is created. New units are told to
    /// instantiate; instances are placed once units report in.
    pub fn apply_config(&mut self, config: &ClusterConfig) -> ConfigResult<()> {
        self.ensure_active()?;
        if let Err(err) = config.validate().and_then(|_| self.check_new_names(config)) {
            warn!(event = Event::ConfigRejected.as_str(), error = %err, "configuration rejected");
            return Err(err);
        }
        self.ctx.settings = config.settings;

        for group in &config.groups {
            self.ctx.model.create_group(
                ServiceGroup::new(&group.name, group.model, group.effective_limits())
                    .with_escalation(group.escalation)
                    .with_auto_adjust(group.auto_adjust),
            )?;
        }
        let mut created = Vec::new();
        for unit in &config.units {
            let sg = self.ctx.model.group_id(&unit.group)?;
            self.ctx
                .model
                .create_unit(ServiceUnit::new(&unit.name, sg, &unit.node, unit.rank))?;
            if !created.contains(&sg) {
                created.push(sg);
            }
        }
        for instance in &config.instances {
            let sg = self.ctx.model.group_id(&instance.group)?;
            let (active, standby) = instance.preferred(self.ctx.model.group(sg)?.model);
            self.ctx.model.create_instance(
                ServiceInstance::new(&instance.name, sg, instance.rank)
                    .with_preferred(active, standby),
            )?;
        }
        for edge in &config.dependencies {
            self.link(&edge.sponsor, &edge.dependent, edge.tolerance_ms)?;
        }
        for sg in created {
            top_up_units(&mut self.ctx, sg)?;
        }

        self.finish_event()?;
        info!(
            event = Event::ConfigApplied.as_str(),
            groups = config.groups.len(),
            units = config.units.len(),
            instances = config.instances.len(),
            dependencies = config.dependencies.len(),
            "configuration applied"
        );
        Ok(())
    }

    fn check_new_names(&self, config: &ClusterConfig) -> ConfigResult<()> {
        let model = &self.ctx.model;
        let taken = config
            .groups
            .iter()
            .map(|g| &g.name)
            .find(|n| model.group_id(n).is_ok())
            .or_else(|| config.units.iter().map(|u| &u.name).find(|n| model.unit_id(n).is_ok()))
            .or_else(|| {
                config
                    .instances
                    .iter()
                    .map(|i| &i.name)
                    .find(|n| model.instance_id(n).is_ok())
            });
        match taken {
            Some(name) => Err(ConfigError::invalid(format!("{} already exists", name))),
            None => Ok(()),
        }
    }

    fn group_config(&self, sg: SgId) -> ModelResult<GroupConfig> {
        let group = self.ctx.model.group(sg)?;
        Ok(GroupConfig {
            name: group.name.clone(),
            model: group.model,
            limits: Some(group.limits),
            escalation: group.escalation,
            auto_adjust: group.auto_adjust,
        })
    }

    fn instance_configs(&self, sg: SgId) -> ModelResult<Vec<InstanceConfig>> {
        let group = self.ctx.model.group(sg)?;
        group
            .instances
            .iter()
            .map(|si| {
                let instance = self.ctx.model.instance(*si)?;
                Ok(InstanceConfig::new(&instance.name, &group.name, instance.rank).with_preferred(
                    instance.pref_active_assignments,
                    instance.pref_standby_assignments,
                ))
            })
            .collect()
    }

    fn revalidate(
        &self,
        sg: SgId,
        group: &GroupConfig,
        instances: &[InstanceConfig],
    ) -> ConfigResult<()> {
        let units = self.ctx.model.group(sg)?.units.len() as u32;
        let refs: Vec<&InstanceConfig> = instances.iter().collect();
        validate_group(group, units, &refs)
    }

    /// Change a group's limits and escalation settings. The redundancy
    /// model is fixed at creation; the group must be stable.
    pub fn reconfigure_group(&mut self, config: &GroupConfig) -> ConfigResult<()> {
        self.ensure_active()?;
        let sg = self.ctx.model.group_id(&config.name)?;
        let group = self.ctx.model.group(sg)?;
        if group.model != config.model {
            return Err(ConfigError::invalid(format!(
                "group {} is {}, its model cannot change",
                group.name, group.model
            )));
        }
        if !group.fsm.is_stable() {
            return Err(ModelError::InUse(group.name.clone()).into());
        }
        self.revalidate(sg, config, &self.instance_configs(sg)?)?;

        self.ctx.model.update(FieldUpdate::GroupLimits {
            sg,
            limits: config.effective_limits(),
        })?;
        self.ctx.model.update(FieldUpdate::GroupEscalation {
            sg,
            escalation: config.escalation,
        })?;
        self.ctx.model.update(FieldUpdate::GroupAutoAdjust {
            sg,
            enabled: config.auto_adjust,
        })?;
        self.realign_group(sg)?;
        self.finish_event()?;
        Ok(())
    }

    /// Change an instance's preferred assignment counts.
    pub fn reconfigure_instance(
        &mut self,
        name: &str,
        active: u32,
        standby: u32,
    ) -> ConfigResult<()> {
        self.ensure_active()?;
        let si = self.ctx.model.instance_id(name)?;
        let sg = self.ctx.model.instance(si)?.sg;
        if !self.ctx.model.group(sg)?.fsm.is_stable() {
            return Err(ModelError::InUse(self.ctx.model.group(sg)?.name.clone()).into());
        }
        let mut instances = self.instance_configs(sg)?;
        for instance in instances.iter_mut().filter(|i| i.name == name) {
            *instance = instance.clone().with_preferred(active, standby);
        }
        self.revalidate(sg, &self.group_config(sg)?, &instances)?;

        self.ctx
            .model
            .update(FieldUpdate::InstancePreferred { si, active, standby })?;
        self.realign_group(sg)?;
        self.finish_event()?;
        Ok(())
    }

    fn realign_group(&mut self, sg: SgId) -> ModelResult<bool> {
        let strategy = redundancy::for_group(&self.ctx, sg)?;
        fsm::run(&mut self.ctx, sg, OperationKind::Realign, |ctx| {
            strategy.realign(ctx, sg)
        })
    }

    fn rebalance_group(&mut self, sg: SgId) -> ModelResult<bool> {
        let strategy = redundancy::for_group(&self.ctx, sg)?;
        fsm::run(&mut self.ctx, sg, OperationKind::Realign, |ctx| {
            strategy.rebalance(ctx, sg)
        })
    }

    fn is_stable(&self, sg: SgId) -> bool {
        self.ctx.model.group(sg).map_or(false, |g| g.fsm.is_stable())
    }

    fn link(
        &mut self,
        sponsor: &str,
        dependent: &str,
        tolerance_ms: Option<u64>,
    ) -> ModelResult<()> {
        let sponsor_id = self.ctx.model.instance_id(sponsor)?;
        let dependent_id = self.ctx.model.instance_id(dependent)?;
        let tolerance = tolerance_ms.unwrap_or(self.ctx.settings.default_tolerance_ms);
        self.ctx
            .model
            .add_dependency(sponsor_id, dependent_id, tolerance)?;
        info!(
            event = Event::DependencyAdded.as_str(),
            sponsor,
            dependent,
            tolerance_ms = tolerance,
            "dependency added"
        );
        dependency::on_edge_changed(&mut self.ctx, sponsor_id, dependent_id)
    }

    /// Add the edge "`dependent` depends on `sponsor`".
    pub fn add_dependency(
        &mut self,
        sponsor: &str,
        dependent: &str,
        tolerance_ms: Option<u64>,
    ) -> ModelResult<()> {
        self.ensure_active()?;
        self.link(sponsor, dependent, tolerance_ms)?;
        self.finish_event()
    }

    pub fn remove_dependency(&mut self, sponsor: &str, dependent: &str) -> ModelResult<()> {
        self.ensure_active()?;
        let sponsor_id = self.ctx.model.instance_id(sponsor)?;
        let dependent_id = self.ctx.model.instance_id(dependent)?;
        self.ctx.model.remove_dependency(sponsor_id, dependent_id)?;
        info!(
            event = Event::DependencyRemoved.as_str(),
            sponsor,
            dependent,
            "dependency removed"
        );
        dependency::on_edge_changed(&mut self.ctx, sponsor_id, dependent_id)?;
        self.finish_event()
    }

    /// Delete a drained instance.
    pub fn delete_instance(&mut self, name: &str) -> ModelResult<()> {
        self.ensure_active()?;
        let si = self.ctx.model.instance_id(name)?;
        self.ctx.model.delete_instance(si)?;
        self.finish_event()
    }

    /// Delete a unit that holds no records.
    pub fn delete_unit(&mut self, name: &str) -> ModelResult<()> {
        self.ensure_active()?;
        let su = self.ctx.model.unit_id(name)?;
        self.ctx.model.delete_unit(su)?;
        self.ctx.timers.stop_unit(su);
        self.finish_event()
    }

    /// Delete a group without members.
    pub fn delete_group(&mut self, name: &str) -> ModelResult<()> {
        self.ensure_active()?;
        let sg = self.ctx.model.group_id(name)?;
        self.ctx.model.delete_group(sg)?;
        self.finish_event()
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Process one message from a node agent.
    pub fn handle_message(&mut self, message: NodeMessage) -> ModelResult<MessageOutcome> {
        self.ensure_active()?;
        self.ctx.metrics.increment_events();
        let su = message.su;
        let Ok(unit) = self.ctx.model.unit(su) else {
            warn!(unit = %su, kind = message.kind(), "message from unknown unit dropped");
            return Ok(MessageOutcome::Ignored);
        };
        let name = unit.name.clone();

        match InboundCheck::evaluate(unit.rcv_msg_id, message.msg_id) {
            InboundCheck::Accepted => {}
            InboundCheck::Duplicate => {
                self.ctx.metrics.increment_duplicates();
                debug!(
                    event = Event::MessageDuplicate.as_str(),
                    unit = %name,
                    msg_id = message.msg_id,
                    "duplicate message ignored"
                );
                return Ok(MessageOutcome::Duplicate);
            }
            InboundCheck::Gap { expected, received } => {
                self.ctx.metrics.increment_gaps();
                warn!(
                    event = Event::MessageGap.as_str(),
                    unit = %name,
                    expected,
                    received,
                    "message beyond next expected id rejected"
                );
                self.request_resync(su, expected)?;
                self.finish_event()?;
                return Ok(MessageOutcome::Gap);
            }
        }

        self.ctx.model.update(FieldUpdate::UnitRcvMsgId {
            su,
            id: message.msg_id,
        })?;
        let outcome = dispatch(&mut self.ctx, su, message.body)?;
        self.finish_event()?;
        Ok(outcome)
    }

    fn request_resync(&mut self, su: SuId, from: u64) -> ModelResult<()> {
        if self.ctx.model.unit(su)?.resync_pending {
            return Ok(());
        }
        self.ctx
            .model
            .update(FieldUpdate::UnitResyncPending { su, pending: true })?;
        self.ctx.outbox.send(&mut self.ctx.model, su, Command::Resync { from })?;
        self.ctx.metrics.increment_commands();
        info!(
            event = Event::ResyncRequested.as_str(),
            unit = %self.ctx.model.unit(su)?.name,
            from,
            "resync requested"
        );
        Ok(())
    }

    /// A node is gone. Its units' records are dropped locally and their
    /// message channels restart from zero.
    pub fn node_failed(&mut self, node: &str) -> ModelResult<usize> {
        self.ensure_active()?;
        self.ctx.metrics.increment_events();
        let units: Vec<SuId> = self
            .ctx
            .model
            .units()
            .filter(|(_, u)| u.node == node)
            .map(|(id, _)| id)
            .collect();
        warn!(
            event = Event::NodeFailed.as_str(),
            node,
            units = units.len(),
            "node failed"
        );
        let ctx = &mut self.ctx;
        for &su in &units {
            let sg = ctx.model.unit(su)?.sg;
            let strategy = redundancy::for_group(ctx, sg)?;
            ctx.model.update(FieldUpdate::UnitOperState {
                su,
                state: OperState::Disabled,
            })?;
            ctx.model.update(FieldUpdate::UnitPresence {
                su,
                state: PresenceState::Uninstantiated,
            })?;
            fsm::run(ctx, sg, OperationKind::UnitFault, |ctx| {
                strategy.node_fail(ctx, sg, su)
            })?;
            ctx.model.update(FieldUpdate::UnitRcvMsgId { su, id: 0 })?;
            ctx.model.update(FieldUpdate::UnitSndMsgId { su, id: 0 })?;
            ctx.model
                .update(FieldUpdate::UnitResyncPending { su, pending: false })?;
            ctx.timers.stop_unit(su);
        }
        self.finish_event()?;
        Ok(units.len())
    }

    /// The agent of `unit` replayed its channel up to `last_id`.
    pub fn resync_complete(&mut self, unit: &str, last_id: u64) -> ModelResult<()> {
        self.ensure_active()?;
        let su = self.ctx.model.unit_id(unit)?;
        self.ctx
            .model
            .update(FieldUpdate::UnitRcvMsgId { su, id: last_id })?;
        self.ctx
            .model
            .update(FieldUpdate::UnitResyncPending { su, pending: false })?;
        info!(event = Event::ResyncComplete.as_str(), unit, last_id, "channel resynchronized");
        self.finish_event()
    }

    /// Move the clock to `now` and fire every timer due. Returns how many
    /// fired.
    pub fn advance_to(&mut self, now: DateTime<Utc>) -> ModelResult<usize> {
        self.ensure_active()?;
        if now > self.ctx.now {
            self.ctx.now = now;
        }
        let due = self.ctx.timers.expired(self.ctx.now);
        for key in &due {
            self.ctx.metrics.increment_events();
            match *key {
                TimerKey::Tolerance { dependent, sponsor } => {
                    dependency::on_tolerance_expired(&mut self.ctx, dependent, sponsor)?;
                }
                TimerKey::CompProbation(su) => {
                    escalation::probation_expired(&mut self.ctx, su, Probation::Component)?;
                }
                TimerKey::SuProbation(su) => {
                    escalation::probation_expired(&mut self.ctx, su, Probation::Unit)?;
                }
            }
        }
        self.finish_event()?;
        Ok(due.len())
    }

    /// Handle an administrative request.
    pub fn admin(&mut self, request: AdminRequest) -> ModelResult<AdminResponse> {
        self.ensure_active()?;
        self.ctx.metrics.increment_events();
        let (response, sg) = admin::dispatch(&mut self.ctx, &request)?;
        if response == AdminResponse::Accepted {
            self.invocations.register(sg, request.clone());
        }
        self.finish_event()?;
        if response != AdminResponse::Accepted {
            return Ok(response);
        }

        let before = self.completions.len();
        self.completions
            .retain(|c| c.invocation != request.invocation);
        let completed_now = self.completions.len() != before;
        let stable = self.ctx.model.group(sg)?.fsm.is_stable();
        if completed_now || (stable && self.invocations.take(request.invocation)) {
            return Ok(AdminResponse::Success);
        }
        Ok(AdminResponse::Accepted)
    }

    /// Run dependency reactions and stabilize groups until nothing moves,
    /// then verify the invariants.
    fn finish_event(&mut self) -> ModelResult<()> {
        let max_rounds = self.ctx.settings.max_settle_rounds.max(1);
        let mut realign: Vec<SgId> = Vec::new();
        let mut converged = false;

        for _ in 0..max_rounds {
            let mut progressed = false;

            for si in self.ctx.model.take_changed_instances() {
                dependency::on_instance_changed(&mut self.ctx, si)?;
                progressed = true;
            }
            let alarmed: Vec<SiId> = self
                .ctx
                .model
                .instances()
                .filter(|(_, i)| i.alarm_sent)
                .map(|(id, _)| id)
                .collect();
            for si in alarmed {
                progressed |= redundancy::placement::review_alarm(&mut self.ctx, si)?;
            }
            for sg in self.ctx.model.group_ids() {
                progressed |= dependency::process_ready_to_unassign(&mut self.ctx, sg)?;
                progressed |= top_up_units(&mut self.ctx, sg)?;
            }
            for sg in self.ctx.model.group_ids() {
                if fsm::try_stabilize(&mut self.ctx, sg)? {
                    progressed = true;
                    for completion in self.invocations.complete_group(sg) {
                        info!(
                            event = Event::AdminCompleted.as_str(),
                            invocation = completion.invocation,
                            op = completion.op.as_str(),
                            name = completion.target.name(),
                            "admin request completed"
                        );
                        self.completions.push(completion);
                    }
                    if !realign.contains(&sg) {
                        realign.push(sg);
                    }
                }
            }
            for sg in std::mem::take(&mut realign) {
                if self.is_stable(sg) {
                    progressed |= self.realign_group(sg)?;
                }
            }
            // Rebalancing only starts once nothing else is moving.
            if !progressed {
                for sg in self.ctx.model.group_ids() {
                    if self.is_stable(sg) {
                        progressed |= self.rebalance_group(sg)?;
                    }
                }
            }

            if !progressed {
                converged = true;
                break;
            }
        }
        if !converged {
            warn!(
                event = Event::GroupBusy.as_str(),
                rounds = max_rounds,
                "settle loop did not converge"
            );
        }

        let (published, refused) = self.ctx.model.take_publish_counts();
        self.ctx.metrics.add_checkpoint_records(published);
        if refused > 0 {
            self.ctx.metrics.add_checkpoint_failures(refused);
            warn!(
                event = Event::StandbyOutOfSync.as_str(),
                controller = %self.id,
                refused,
                since = ?self.ctx.model.replication_lost_at(),
                "standby needs a snapshot"
            );
        }

        if let Err(violation) = invariants::verify(&self.ctx.model) {
            error!(
                event = Event::InvariantViolation.as_str(),
                controller = %self.id,
                error = %violation,
                "invariant violated"
            );
            panic!("{}", violation);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Checkpointing and role changes
    // ------------------------------------------------------------------

    /// Full copy of the model.
    pub fn snapshot(&self) -> Snapshot {
        let snapshot = Snapshot::capture(&self.ctx.model, self.ctx.now);
        info!(
            event = Event::SnapshotTaken.as_str(),
            snapshot = %snapshot.id,
            seq = snapshot.journal_seq(),
            "snapshot taken"
        );
        snapshot
    }

    /// Sequence of the first record the checkpoint sink refused. The
    /// standby cannot follow the stream past it.
    pub fn replication_lost_at(&self) -> Option<u64> {
        self.ctx.model.replication_lost_at()
    }

    /// Snapshot for reinitializing the standby after the sink refused
    /// records. Publishing continues from the snapshot's sequence.
    pub fn resync_standby(&mut self) -> Snapshot {
        let lost_at = self.ctx.model.replication_lost_at();
        let snapshot = self.snapshot();
        self.ctx.model.clear_replication_loss();
        info!(
            event = Event::StandbyOutOfSync.as_str(),
            controller = %self.id,
            lost_at = ?lost_at,
            seq = snapshot.journal_seq(),
            "standby resync snapshot taken"
        );
        snapshot
    }

    /// Apply one record of the active controller's stream.
    ///
    /// Returns `false` for an envelope already applied. Errors that
    /// require a snapshot leave the model as it was before the envelope.
    pub fn apply_checkpoint(&mut self, envelope: &CheckpointEnvelope) -> CheckpointResult<bool> {
        if self.role != Role::Standby {
            return Err(CheckpointError::NotStandby);
        }
        match self.ctx.model.apply_envelope(envelope) {
            Ok(applied) => {
                if applied {
                    debug!(
                        event = Event::ReplayApplied.as_str(),
                        seq = envelope.seq,
                        kind = envelope.record.kind(),
                        "record applied"
                    );
                }
                Ok(applied)
            }
            Err(err) => {
                error!(
                    event = Event::ReplayDiverged.as_str(),
                    seq = envelope.seq,
                    error = %err,
                    "replay failed"
                );
                Err(err)
            }
        }
    }

    /// Replace the model with a snapshot and become (or stay) standby.
    pub fn reinitialize_from_snapshot(&mut self, snapshot: &Snapshot) {
        self.ctx.model = snapshot.restore(Arc::new(NullSink));
        self.ctx.timers.clear();
        self.ctx.outbox.drain();
        self.invocations.clear();
        self.completions.clear();
        self.role = Role::Standby;
        info!(
            event = Event::ControllerReinitialized.as_str(),
            controller = %self.id,
            snapshot = %snapshot.id,
            seq = snapshot.journal_seq(),
            "reinitialized from snapshot"
        );
    }

    /// Take over as active controller, publishing to `sink` from now on.
    ///
    /// Timers are not part of the checkpoint; tolerance and probation
    /// timers are re-armed from the replicated states, counting from `now`.
    pub fn promote(
        &mut self,
        now: DateTime<Utc>,
        sink: Arc<dyn CheckpointSink>,
    ) -> ModelResult<()> {
        if self.role == Role::Active {
            return Err(ModelError::invalid_state("controller is already active"));
        }
        self.ctx.model.set_sink(sink);
        self.ctx.now = now;
        self.ctx.timers.clear();
        self.role = Role::Active;
        dependency::rearm_timers(&mut self.ctx)?;
        escalation::rearm_timers(&mut self.ctx)?;
        info!(
            event = Event::ControllerPromoted.as_str(),
            controller = %self.id,
            seq = self.ctx.model.journal_seq(),
            timers = self.ctx.timers.len(),
            "promoted to active"
        );
        Ok(())
    }

    /// Admin state of a unit, by name. Convenience for callers driving
    /// lock-instantiation.
    pub fn unit_admin_state(&self, unit: &str) -> ModelResult<AdminState> {
        let su = self.ctx.model.unit_id(unit)?;
        Ok(self.ctx.model.unit(su)?.admin_state)
    }
}

fn dispatch(ctx: &mut Ctx, su: SuId, body: MessageBody) -> ModelResult<MessageOutcome> {
    let sg = ctx.model.unit(su)?.sg;
    match body {
        MessageBody::AssignmentReply { susi, ha, accepted } => {
            return match redundancy::on_reply(ctx, su, susi, ha, accepted)? {
                ReplyOutcome::Applied => Ok(MessageOutcome::Processed),
                ReplyOutcome::Ignored => Ok(MessageOutcome::Ignored),
            };
        }
        MessageBody::Presence { state } => presence_changed(ctx, su, state)?,
        MessageBody::ComponentFailed { component } => {
            escalation::component_failed(ctx, su, &component)?;
        }
        MessageBody::UnitFailed => {
            escalation::unit_failed(ctx, su)?;
        }
        MessageBody::AdminReply { success } => {
            if ctx.model.unit(su)?.presence != PresenceState::Restarting {
                debug!(unit = %su, group = %sg, "admin reply without restart ignored");
                return Ok(MessageOutcome::Ignored);
            }
            if success {
                ctx.model.update(FieldUpdate::UnitPresence {
                    su,
                    state: PresenceState::Instantiated,
                })?;
            } else {
                escalation::fail_over_unit(ctx, su)?;
            }
        }
    }
    Ok(MessageOutcome::Processed)
}

/// Instantiate units in rank order until the group has its preferred
/// number of units up or coming up. A preference of zero means every unit.
fn top_up_units(ctx: &mut Ctx, sg: SgId) -> ModelResult<bool> {
    let group = ctx.model.group(sg)?;
    let wanted = match group.limits.pref_inservice_sus as usize {
        0 => group.units.len(),
        n => n,
    };
    let mut up = 0;
    let mut spares = Vec::new();
    for &su in &group.units {
        let unit = ctx.model.unit(su)?;
        if unit.oper_state != OperState::Enabled
            || unit.admin_state == AdminState::LockedInstantiation
        {
            continue;
        }
        match unit.presence {
            PresenceState::Instantiating
            | PresenceState::Instantiated
            | PresenceState::Restarting => up += 1,
            PresenceState::Uninstantiated => spares.push(su),
            _ => {}
        }
    }

    let mut started = false;
    for su in spares.into_iter().take(wanted.saturating_sub(up)) {
        ctx.model.update(FieldUpdate::UnitPresence {
            su,
            state: PresenceState::Instantiating,
        })?;
        ctx.outbox.send(&mut ctx.model, su, Command::Instantiate)?;
        ctx.metrics.increment_commands();
        if up > 0 {
            info!(
                event = Event::SpareInstantiated.as_str(),
                unit = %ctx.model.unit(su)?.name,
                group = %ctx.model.group(sg)?.name,
                "spare unit instantiated"
            );
        }
        started = true;
    }
    Ok(started)
}

fn presence_changed(ctx: &mut Ctx, su: SuId, state: PresenceState) -> ModelResult<()> {
    let unit = ctx.model.unit(su)?;
    let sg = unit.sg;
    let was_in_service = unit.is_in_service();
    let holds_records = !unit.assignments.is_empty();
    let strategy = redundancy::for_group(ctx, sg)?;

    ctx.model.update(FieldUpdate::UnitPresence { su, state })?;
    match state {
        PresenceState::Instantiated => {
            let unit = ctx.model.unit(su)?;
            if unit.oper_state == OperState::Disabled && !holds_records {
                ctx.model.update(FieldUpdate::UnitOperState {
                    su,
                    state: OperState::Enabled,
                })?;
            }
            if !was_in_service && ctx.model.unit(su)?.is_in_service() {
                fsm::run(ctx, sg, OperationKind::Realign, |ctx| {
                    strategy.su_insvc(ctx, sg, su)
                })?;
            }
        }
        PresenceState::Uninstantiated
        | PresenceState::InstantiationFailed
        | PresenceState::TerminationFailed => {
            if state != PresenceState::Uninstantiated || holds_records {
                ctx.model.update(FieldUpdate::UnitOperState {
                    su,
                    state: OperState::Disabled,
                })?;
            }
            if holds_records {
                info!(
                    event = Event::UnitFault.as_str(),
                    unit = %ctx.model.unit(su)?.name,
                    presence = state.as_str(),
                    "unit went away holding assignments"
                );
                fsm::run(ctx, sg, OperationKind::UnitFault, |ctx| {
                    strategy.node_fail(ctx, sg, su)
                })?;
            }
        }
        PresenceState::Instantiating | PresenceState::Terminating | PresenceState::Restarting => {}
    }
    Ok(())
}
