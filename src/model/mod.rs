//! Entity model
//!
//! Groups, units, instances and assignment records live in generational
//! arenas. Every mutation is expressed as a [`CheckpointRecord`], applied to
//! the local state and then published to the checkpoint sink, so the active
//! controller and a replaying standby run the exact same code path.
//!
//! # Ownership
//!
//! - A group owns its member id lists.
//! - Units and instances share assignment records (both hold the id).
//! - A sponsor owns its dependent edges; the dependent's sponsor list is a
//!   lookup-only back reference.

pub mod arena;
mod assignment;
mod errors;
mod group;
mod ids;
mod instance;
mod states;
mod unit;

pub use arena::{Arena, Key};
pub use assignment::{Assignment, AssignmentRef, FollowUp};
pub use errors::{ModelError, ModelResult};
pub use group::{EscalationLimits, ServiceGroup, SgLimits, SiTransfer};
pub use ids::{EntityId, SgId, SiId, SuId, SusiId};
pub use instance::{Dependent, RemovalMode, ServiceInstance};
pub use states::{
    AdminState, HaState, OperState, PresenceState, ReadinessState, RedundancyModel,
    SiAssignmentState, SiDepState, SusiState,
};
pub use unit::{EscalationCounters, EscalationLevel, ServiceUnit};

use crate::checkpoint::{
    CheckpointEnvelope, CheckpointError, CheckpointRecord, CheckpointResult, CheckpointSink,
    EntityRecord, FieldUpdate, NullSink,
};
use crate::dependency::graph;
use crate::observability::Event;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, trace};

/// Everything that is checkpointed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub groups: Arena<ServiceGroup>,
    pub units: Arena<ServiceUnit>,
    pub instances: Arena<ServiceInstance>,
    pub assignments: Arena<Assignment>,
    /// Sequence number of the last journaled record.
    pub journal_seq: u64,
}

#[derive(Debug, Clone, Default)]
struct NameIndex {
    groups: BTreeMap<String, SgId>,
    units: BTreeMap<String, SuId>,
    instances: BTreeMap<String, SiId>,
}

impl NameIndex {
    fn rebuild(state: &ModelState) -> Self {
        let mut index = Self::default();
        for (key, group) in state.groups.iter() {
            index.groups.insert(group.name.clone(), SgId(key));
        }
        for (key, unit) in state.units.iter() {
            index.units.insert(unit.name.clone(), SuId(key));
        }
        for (key, instance) in state.instances.iter() {
            index.instances.insert(instance.name.clone(), SiId(key));
        }
        index
    }
}

fn set<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn expect_next(next: Key, id: impl Into<EntityId>) -> CheckpointResult<()> {
    let id = id.into();
    let key = match id {
        EntityId::Group(id) => id.key(),
        EntityId::Unit(id) => id.key(),
        EntityId::Instance(id) => id.key(),
        EntityId::Assignment(id) => id.key(),
    };
    if key == next {
        Ok(())
    } else {
        Err(CheckpointError::diverged(format!(
            "create of {} but next free key is {}",
            id, next
        )))
    }
}

fn checkpoint_to_model(err: CheckpointError) -> ModelError {
    match err {
        CheckpointError::UnknownEntity(id) => ModelError::NotFound(id),
        other => ModelError::InvalidState(other.to_string()),
    }
}

/// The entity store of one controller.
pub struct EntityModel {
    state: ModelState,
    names: NameIndex,
    sink: Arc<dyn CheckpointSink>,
    changed_instances: Vec<SiId>,
    publish: PublishState,
}

/// Outcome of publishing records to the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PublishState {
    accepted: u64,
    refused: u64,
    /// First sequence the sink refused since the last resync.
    lost_at: Option<u64>,
}

impl Default for EntityModel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntityModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityModel")
            .field("groups", &self.state.groups.len())
            .field("units", &self.state.units.len())
            .field("instances", &self.state.instances.len())
            .field("assignments", &self.state.assignments.len())
            .field("journal_seq", &self.state.journal_seq)
            .finish()
    }
}

impl EntityModel {
    /// Empty model that discards its journal.
    pub fn new() -> Self {
        Self::with_sink(Arc::new(NullSink))
    }

    pub fn with_sink(sink: Arc<dyn CheckpointSink>) -> Self {
        Self {
            state: ModelState::default(),
            names: NameIndex::default(),
            sink,
            changed_instances: Vec::new(),
            publish: PublishState::default(),
        }
    }

    /// Model restored from a snapshot state.
    pub fn from_state(state: ModelState, sink: Arc<dyn CheckpointSink>) -> Self {
        let names = NameIndex::rebuild(&state);
        Self {
            state,
            names,
            sink,
            changed_instances: Vec::new(),
            publish: PublishState::default(),
        }
    }

    pub fn set_sink(&mut self, sink: Arc<dyn CheckpointSink>) {
        self.sink = sink;
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn journal_seq(&self) -> u64 {
        self.state.journal_seq
    }

    /// Sequence of the first record the sink refused. Set until the
    /// standby is reinitialized from a snapshot.
    pub fn replication_lost_at(&self) -> Option<u64> {
        self.publish.lost_at
    }

    pub fn clear_replication_loss(&mut self) {
        self.publish.lost_at = None;
    }

    /// Records accepted and refused by the sink since the last call.
    pub fn take_publish_counts(&mut self) -> (u64, u64) {
        let counts = (self.publish.accepted, self.publish.refused);
        self.publish.accepted = 0;
        self.publish.refused = 0;
        counts
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn group(&self, sg: SgId) -> ModelResult<&ServiceGroup> {
        self.state.groups.get(sg.key()).ok_or_else(|| ModelError::missing(sg))
    }

    pub fn unit(&self, su: SuId) -> ModelResult<&ServiceUnit> {
        self.state.units.get(su.key()).ok_or_else(|| ModelError::missing(su))
    }

    pub fn instance(&self, si: SiId) -> ModelResult<&ServiceInstance> {
        self.state.instances.get(si.key()).ok_or_else(|| ModelError::missing(si))
    }

    pub fn assignment(&self, susi: SusiId) -> ModelResult<&Assignment> {
        self.state
            .assignments
            .get(susi.key())
            .ok_or_else(|| ModelError::missing(susi))
    }

    pub fn group_id(&self, name: &str) -> ModelResult<SgId> {
        self.names
            .groups
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::NotFound(name.to_string()))
    }

    pub fn unit_id(&self, name: &str) -> ModelResult<SuId> {
        self.names
            .units
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::NotFound(name.to_string()))
    }

    pub fn instance_id(&self, name: &str) -> ModelResult<SiId> {
        self.names
            .instances
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::NotFound(name.to_string()))
    }

    pub fn groups(&self) -> impl Iterator<Item = (SgId, &ServiceGroup)> {
        self.state.groups.iter().map(|(k, g)| (SgId(k), g))
    }

    pub fn units(&self) -> impl Iterator<Item = (SuId, &ServiceUnit)> {
        self.state.units.iter().map(|(k, u)| (SuId(k), u))
    }

    pub fn instances(&self) -> impl Iterator<Item = (SiId, &ServiceInstance)> {
        self.state.instances.iter().map(|(k, i)| (SiId(k), i))
    }

    pub fn assignments(&self) -> impl Iterator<Item = (SusiId, &Assignment)> {
        self.state.assignments.iter().map(|(k, a)| (SusiId(k), a))
    }

    pub fn group_ids(&self) -> Vec<SgId> {
        self.state.groups.keys().into_iter().map(SgId).collect()
    }

    /// Record of a (unit, instance) pair.
    pub fn find_assignment(&self, su: SuId, si: SiId) -> Option<SusiId> {
        let unit = self.state.units.get(su.key())?;
        unit.assignments.iter().copied().find(|id| {
            self.state
                .assignments
                .get(id.key())
                .map_or(false, |a| a.si == si)
        })
    }

    /// Records of an instance, in creation order.
    pub fn instance_records(&self, si: SiId) -> Vec<(SusiId, &Assignment)> {
        self.state
            .instances
            .get(si.key())
            .map(|instance| {
                instance
                    .assignments
                    .iter()
                    .filter_map(|id| self.state.assignments.get(id.key()).map(|a| (*id, a)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Records of a unit, in creation order.
    pub fn unit_records(&self, su: SuId) -> Vec<(SusiId, &Assignment)> {
        self.state
            .units
            .get(su.key())
            .map(|unit| {
                unit.assignments
                    .iter()
                    .filter_map(|id| self.state.assignments.get(id.key()).map(|a| (*id, a)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Assignment state implied by an instance's current records.
    pub fn derive_assignment_state(&self, si: SiId) -> ModelResult<SiAssignmentState> {
        let records = self.instance_records(si);
        self.instance(si)?;
        if records.is_empty() {
            return Ok(SiAssignmentState::Unassigned);
        }
        let serving = records
            .iter()
            .any(|(_, r)| !r.is_leaving() && r.confirmed_ha == Some(HaState::Active));
        if serving {
            return Ok(SiAssignmentState::Assigned);
        }
        if records.iter().any(|(_, r)| !r.is_leaving()) {
            Ok(SiAssignmentState::Assigning)
        } else {
            Ok(SiAssignmentState::BeingRemoved)
        }
    }

    /// Instances whose assignment state changed since the last call.
    pub fn take_changed_instances(&mut self) -> Vec<SiId> {
        std::mem::take(&mut self.changed_instances)
    }

    // ------------------------------------------------------------------
    // Mutation (active side)
    // ------------------------------------------------------------------

    pub fn create_group(&mut self, group: ServiceGroup) -> ModelResult<SgId> {
        if self.names.groups.contains_key(&group.name) {
            return Err(ModelError::AlreadyExists(group.name));
        }
        if !group.units.is_empty() || !group.instances.is_empty() {
            return Err(ModelError::invalid_state("new group must have no members"));
        }
        let id = SgId(self.state.groups.next_key());
        self.commit(CheckpointRecord::Create {
            entity: EntityRecord::Group { id, group },
        })?;
        Ok(id)
    }

    pub fn delete_group(&mut self, sg: SgId) -> ModelResult<()> {
        let group = self.group(sg)?;
        if !group.units.is_empty() || !group.instances.is_empty() {
            return Err(ModelError::InUse(group.name.clone()));
        }
        self.commit(CheckpointRecord::Delete { id: sg.into() })?;
        Ok(())
    }

    pub fn create_unit(&mut self, unit: ServiceUnit) -> ModelResult<SuId> {
        if self.names.units.contains_key(&unit.name) {
            return Err(ModelError::AlreadyExists(unit.name));
        }
        self.group(unit.sg)?;
        if !unit.assignments.is_empty() {
            return Err(ModelError::invalid_state("new unit must have no assignments"));
        }
        let id = SuId(self.state.units.next_key());
        self.commit(CheckpointRecord::Create {
            entity: EntityRecord::Unit { id, unit },
        })?;
        Ok(id)
    }

    /// Rejected while the unit still holds records or outstanding work.
    pub fn delete_unit(&mut self, su: SuId) -> ModelResult<()> {
        let unit = self.unit(su)?;
        let busy = self.group(unit.sg)?.fsm.in_oper_list(su);
        if !unit.assignments.is_empty() || busy {
            return Err(ModelError::InUse(unit.name.clone()));
        }
        self.commit(CheckpointRecord::Delete { id: su.into() })?;
        Ok(())
    }

    pub fn create_instance(&mut self, instance: ServiceInstance) -> ModelResult<SiId> {
        if self.names.instances.contains_key(&instance.name) {
            return Err(ModelError::AlreadyExists(instance.name));
        }
        self.group(instance.sg)?;
        if !instance.assignments.is_empty()
            || !instance.dependents.is_empty()
            || !instance.sponsors.is_empty()
        {
            return Err(ModelError::invalid_state(
                "new instance must have no assignments or dependencies",
            ));
        }
        let id = SiId(self.state.instances.next_key());
        self.commit(CheckpointRecord::Create {
            entity: EntityRecord::Instance { id, instance },
        })?;
        Ok(id)
    }

    /// Rejected while the instance holds records or dependency edges.
    pub fn delete_instance(&mut self, si: SiId) -> ModelResult<()> {
        let instance = self.instance(si)?;
        if !instance.assignments.is_empty()
            || !instance.dependents.is_empty()
            || !instance.sponsors.is_empty()
        {
            return Err(ModelError::InUse(instance.name.clone()));
        }
        let admin_target = self.group(instance.sg)?.fsm.admin_si == Some(si);
        if admin_target {
            return Err(ModelError::InUse(instance.name.clone()));
        }
        self.commit(CheckpointRecord::Delete { id: si.into() })?;
        Ok(())
    }

    /// Add the edge "`dependent` depends on `sponsor`".
    ///
    /// The graph is walked before anything is recorded; a cycle or a
    /// duplicate edge leaves the model untouched.
    pub fn add_dependency(
        &mut self,
        sponsor: SiId,
        dependent: SiId,
        tolerance_ms: u64,
    ) -> ModelResult<()> {
        let sponsor_name = self.instance(sponsor)?.name.clone();
        let dependent_name = self.instance(dependent)?.name.clone();
        if self.instance(sponsor)?.tolerance_for(dependent).is_some() {
            return Err(ModelError::DependencyAlreadyExists {
                sponsor: sponsor_name,
                dependent: dependent_name,
            });
        }
        if graph::would_cycle(self, sponsor, dependent) {
            return Err(ModelError::CyclicDependency {
                sponsor: sponsor_name,
                dependent: dependent_name,
            });
        }
        self.update(FieldUpdate::DependencyAdded {
            sponsor,
            dependent,
            tolerance_ms,
        })?;
        Ok(())
    }

    pub fn remove_dependency(&mut self, sponsor: SiId, dependent: SiId) -> ModelResult<()> {
        let instance = self.instance(sponsor)?;
        if instance.tolerance_for(dependent).is_none() {
            return Err(ModelError::NotFound(format!(
                "dependency {} -> {}",
                dependent, instance.name
            )));
        }
        self.update(FieldUpdate::DependencyRemoved { sponsor, dependent })?;
        Ok(())
    }

    /// Create a record in flight toward `ha`.
    ///
    /// Rejects a duplicate (unit, instance) pair, a unit outside the
    /// instance's group and a unit that is not in service.
    pub fn create_assignment(&mut self, su: SuId, si: SiId, ha: HaState) -> ModelResult<SusiId> {
        let unit = self.unit(su)?;
        let instance = self.instance(si)?;
        if unit.sg != instance.sg {
            return Err(ModelError::invalid_state(format!(
                "{} and {} belong to different groups",
                unit.name, instance.name
            )));
        }
        if self.find_assignment(su, si).is_some() {
            return Err(ModelError::AlreadyExists(format!(
                "{}/{}",
                unit.name, instance.name
            )));
        }
        if !unit.is_in_service() {
            return Err(ModelError::UnitNotInService(unit.name.clone()));
        }
        let mut assignment = Assignment::new(su, si, ha);
        assignment.state = SusiState::Assigning;
        let id = SusiId(self.state.assignments.next_key());
        self.commit(CheckpointRecord::Create {
            entity: EntityRecord::Assignment { id, assignment },
        })?;
        Ok(id)
    }

    pub fn delete_assignment(&mut self, susi: SusiId) -> ModelResult<()> {
        self.assignment(susi)?;
        self.commit(CheckpointRecord::Delete { id: susi.into() })?;
        Ok(())
    }

    /// Apply and journal a single-field change. Returns whether anything
    /// changed; an unchanged value is not journaled.
    pub fn update(&mut self, update: FieldUpdate) -> ModelResult<bool> {
        self.commit(CheckpointRecord::Update { update })
    }

    /// Recompute the stored assignment state of an instance.
    pub fn refresh_assignment_state(&mut self, si: SiId) -> ModelResult<SiAssignmentState> {
        let state = self.derive_assignment_state(si)?;
        self.update(FieldUpdate::InstanceAssignmentState { si, state })?;
        Ok(state)
    }

    fn commit(&mut self, record: CheckpointRecord) -> ModelResult<bool> {
        let changed = self.apply(&record).map_err(checkpoint_to_model)?;
        if !changed {
            return Ok(false);
        }
        if let CheckpointRecord::Update {
            update: FieldUpdate::InstanceAssignmentState { si, .. },
        } = &record
        {
            if !self.changed_instances.contains(si) {
                self.changed_instances.push(*si);
            }
        }
        self.state.journal_seq += 1;
        let envelope = CheckpointEnvelope {
            seq: self.state.journal_seq,
            record,
        };
        trace!(
            event = Event::CheckpointRecord.as_str(),
            seq = envelope.seq,
            kind = envelope.record.kind(),
            "journaled"
        );
        match self.sink.append(&envelope) {
            Ok(()) => self.publish.accepted += 1,
            Err(err) => {
                self.publish.refused += 1;
                self.publish.lost_at.get_or_insert(envelope.seq);
                error!(
                    event = Event::CheckpointFailed.as_str(),
                    seq = envelope.seq,
                    error = %err,
                    "checkpoint sink rejected record"
                );
            }
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Replay (standby side)
    // ------------------------------------------------------------------

    /// Apply one envelope from the active controller's stream.
    ///
    /// Returns `false` for an already-applied sequence number. A gap or a
    /// record that cannot be reproduced is an error and the standby must
    /// be reinitialized from a snapshot.
    pub fn apply_envelope(&mut self, envelope: &CheckpointEnvelope) -> CheckpointResult<bool> {
        let expected = self.state.journal_seq + 1;
        if envelope.seq < expected {
            return Ok(false);
        }
        if envelope.seq > expected {
            return Err(CheckpointError::Gap {
                expected,
                received: envelope.seq,
            });
        }
        self.apply_record(&envelope.record)?;
        self.state.journal_seq = envelope.seq;
        Ok(true)
    }

    /// Apply a record without sequence bookkeeping.
    pub fn apply_record(&mut self, record: &CheckpointRecord) -> CheckpointResult<()> {
        self.apply(record)?;
        Ok(())
    }

    fn apply(&mut self, record: &CheckpointRecord) -> CheckpointResult<bool> {
        match record {
            CheckpointRecord::Create { entity } => {
                self.apply_create(entity)?;
                Ok(true)
            }
            CheckpointRecord::Delete { id } => {
                self.apply_delete(*id)?;
                Ok(true)
            }
            CheckpointRecord::Update { update } => self.apply_update(update),
        }
    }

    fn apply_create(&mut self, entity: &EntityRecord) -> CheckpointResult<()> {
        let occupied = |id: EntityId| CheckpointError::diverged(format!("{} already occupied", id));
        match entity {
            EntityRecord::Group { id, group } => {
                expect_next(self.state.groups.next_key(), *id)?;
                if self.names.groups.contains_key(&group.name) {
                    return Err(CheckpointError::diverged(format!(
                        "duplicate group name {}",
                        group.name
                    )));
                }
                self.state
                    .groups
                    .insert_at(id.key(), group.clone())
                    .map_err(|_| occupied((*id).into()))?;
                self.names.groups.insert(group.name.clone(), *id);
            }
            EntityRecord::Unit { id, unit } => {
                expect_next(self.state.units.next_key(), *id)?;
                if self.names.units.contains_key(&unit.name) {
                    return Err(CheckpointError::diverged(format!(
                        "duplicate unit name {}",
                        unit.name
                    )));
                }
                let group = self
                    .state
                    .groups
                    .get(unit.sg.key())
                    .ok_or_else(|| CheckpointError::unknown(unit.sg))?;
                let units = &self.state.units;
                let position = group
                    .units
                    .iter()
                    .position(|u| units.get(u.key()).map_or(false, |o| o.rank > unit.rank))
                    .unwrap_or(group.units.len());
                self.state
                    .units
                    .insert_at(id.key(), unit.clone())
                    .map_err(|_| occupied((*id).into()))?;
                self.names.units.insert(unit.name.clone(), *id);
                if let Some(group) = self.state.groups.get_mut(unit.sg.key()) {
                    group.units.insert(position, *id);
                }
                self.refresh_equal_rank(unit.sg);
            }
            EntityRecord::Instance { id, instance } => {
                expect_next(self.state.instances.next_key(), *id)?;
                if self.names.instances.contains_key(&instance.name) {
                    return Err(CheckpointError::diverged(format!(
                        "duplicate instance name {}",
                        instance.name
                    )));
                }
                let group = self
                    .state
                    .groups
                    .get(instance.sg.key())
                    .ok_or_else(|| CheckpointError::unknown(instance.sg))?;
                let instances = &self.state.instances;
                let position = group
                    .instances
                    .iter()
                    .position(|i| {
                        instances
                            .get(i.key())
                            .map_or(false, |o| o.rank > instance.rank)
                    })
                    .unwrap_or(group.instances.len());
                self.state
                    .instances
                    .insert_at(id.key(), instance.clone())
                    .map_err(|_| occupied((*id).into()))?;
                self.names.instances.insert(instance.name.clone(), *id);
                if let Some(group) = self.state.groups.get_mut(instance.sg.key()) {
                    group.instances.insert(position, *id);
                }
            }
            EntityRecord::Assignment { id, assignment } => {
                expect_next(self.state.assignments.next_key(), *id)?;
                if !self.state.units.contains(assignment.su.key()) {
                    return Err(CheckpointError::unknown(assignment.su));
                }
                if !self.state.instances.contains(assignment.si.key()) {
                    return Err(CheckpointError::unknown(assignment.si));
                }
                self.state
                    .assignments
                    .insert_at(id.key(), assignment.clone())
                    .map_err(|_| occupied((*id).into()))?;
                if let Some(unit) = self.state.units.get_mut(assignment.su.key()) {
                    unit.assignments.push(*id);
                }
                if let Some(instance) = self.state.instances.get_mut(assignment.si.key()) {
                    instance.assignments.push(*id);
                }
            }
        }
        Ok(())
    }

    fn apply_delete(&mut self, id: EntityId) -> CheckpointResult<()> {
        match id {
            EntityId::Group(sg) => {
                let group = self
                    .state
                    .groups
                    .remove(sg.key())
                    .ok_or_else(|| CheckpointError::unknown(sg))?;
                self.names.groups.remove(&group.name);
            }
            EntityId::Unit(su) => {
                let unit = self
                    .state
                    .units
                    .remove(su.key())
                    .ok_or_else(|| CheckpointError::unknown(su))?;
                self.names.units.remove(&unit.name);
                if let Some(group) = self.state.groups.get_mut(unit.sg.key()) {
                    group.units.retain(|u| *u != su);
                    if group.last_selected == Some(su) {
                        group.last_selected = None;
                    }
                }
                self.refresh_equal_rank(unit.sg);
            }
            EntityId::Instance(si) => {
                let instance = self
                    .state
                    .instances
                    .remove(si.key())
                    .ok_or_else(|| CheckpointError::unknown(si))?;
                self.names.instances.remove(&instance.name);
                if let Some(group) = self.state.groups.get_mut(instance.sg.key()) {
                    group.instances.retain(|i| *i != si);
                }
            }
            EntityId::Assignment(susi) => {
                let assignment = self
                    .state
                    .assignments
                    .remove(susi.key())
                    .ok_or_else(|| CheckpointError::unknown(susi))?;
                if let Some(unit) = self.state.units.get_mut(assignment.su.key()) {
                    unit.assignments.retain(|a| *a != susi);
                }
                if let Some(instance) = self.state.instances.get_mut(assignment.si.key()) {
                    instance.assignments.retain(|a| *a != susi);
                }
            }
        }
        Ok(())
    }

    fn refresh_equal_rank(&mut self, sg: SgId) {
        let units = &self.state.units;
        let Some(group) = self.state.groups.get_mut(sg.key()) else {
            return;
        };
        let mut ranks = group
            .units
            .iter()
            .filter_map(|u| units.get(u.key()).map(|unit| unit.rank));
        let equal = match ranks.next() {
            Some(first) => group.units.len() > 1 && ranks.all(|r| r == first),
            None => false,
        };
        group.equal_ranked_su = equal;
    }

    fn group_mut(&mut self, sg: SgId) -> CheckpointResult<&mut ServiceGroup> {
        self.state
            .groups
            .get_mut(sg.key())
            .ok_or_else(|| CheckpointError::unknown(sg))
    }

    fn unit_mut(&mut self, su: SuId) -> CheckpointResult<&mut ServiceUnit> {
        self.state
            .units
            .get_mut(su.key())
            .ok_or_else(|| CheckpointError::unknown(su))
    }

    fn instance_mut(&mut self, si: SiId) -> CheckpointResult<&mut ServiceInstance> {
        self.state
            .instances
            .get_mut(si.key())
            .ok_or_else(|| CheckpointError::unknown(si))
    }

    fn assignment_mut(&mut self, susi: SusiId) -> CheckpointResult<&mut Assignment> {
        self.state
            .assignments
            .get_mut(susi.key())
            .ok_or_else(|| CheckpointError::unknown(susi))
    }

    fn apply_update(&mut self, update: &FieldUpdate) -> CheckpointResult<bool> {
        use FieldUpdate::*;
        let changed = match update.clone() {
            GroupAdminState { sg, state } => set(&mut self.group_mut(sg)?.admin_state, state),
            GroupLimits { sg, limits } => set(&mut self.group_mut(sg)?.limits, limits),
            GroupEscalation { sg, escalation } => {
                set(&mut self.group_mut(sg)?.escalation, escalation)
            }
            GroupFsmState { sg, state } => set(&mut self.group_mut(sg)?.fsm.state, state),
            GroupOperListAdd { sg, su } => {
                let fsm = &mut self.group_mut(sg)?.fsm;
                if fsm.oper_list.contains(&su) {
                    false
                } else {
                    fsm.oper_list.push(su);
                    true
                }
            }
            GroupOperListRemove { sg, su } => {
                let fsm = &mut self.group_mut(sg)?.fsm;
                let before = fsm.oper_list.len();
                fsm.oper_list.retain(|u| *u != su);
                fsm.oper_list.len() != before
            }
            GroupAdminSi { sg, si } => set(&mut self.group_mut(sg)?.fsm.admin_si, si),
            GroupLastSelected { sg, su } => set(&mut self.group_mut(sg)?.last_selected, su),
            GroupAutoAdjust { sg, enabled } => set(&mut self.group_mut(sg)?.auto_adjust, enabled),
            GroupTransfer { sg, transfer } => set(&mut self.group_mut(sg)?.transfer, transfer),

            UnitAdminState { su, state } => set(&mut self.unit_mut(su)?.admin_state, state),
            UnitOperState { su, state } => set(&mut self.unit_mut(su)?.oper_state, state),
            UnitPresence { su, state } => set(&mut self.unit_mut(su)?.presence, state),
            UnitEscalation { su, counters } => set(&mut self.unit_mut(su)?.escalation, counters),
            UnitRcvMsgId { su, id } => set(&mut self.unit_mut(su)?.rcv_msg_id, id),
            UnitSndMsgId { su, id } => set(&mut self.unit_mut(su)?.snd_msg_id, id),
            UnitResyncPending { su, pending } => {
                set(&mut self.unit_mut(su)?.resync_pending, pending)
            }

            InstanceAdminState { si, state } => {
                set(&mut self.instance_mut(si)?.admin_state, state)
            }
            InstanceAssignmentState { si, state } => {
                set(&mut self.instance_mut(si)?.assignment_state, state)
            }
            InstanceDepState { si, state } => set(&mut self.instance_mut(si)?.dep_state, state),
            InstancePreferred {
                si,
                active,
                standby,
            } => {
                let instance = self.instance_mut(si)?;
                let a = set(&mut instance.pref_active_assignments, active);
                let s = set(&mut instance.pref_standby_assignments, standby);
                a || s
            }
            InstancePendingUnassign { si, mode } => {
                set(&mut self.instance_mut(si)?.pending_unassign, mode)
            }
            InstanceAlarmSent { si, sent } => set(&mut self.instance_mut(si)?.alarm_sent, sent),
            DependencyAdded {
                sponsor,
                dependent,
                tolerance_ms,
            } => {
                self.instance_mut(dependent)?;
                let sponsor_entry = self.instance_mut(sponsor)?;
                if sponsor_entry.tolerance_for(dependent).is_some() {
                    false
                } else {
                    sponsor_entry.dependents.push(Dependent {
                        si: dependent,
                        tolerance_ms,
                    });
                    let dependent_entry = self.instance_mut(dependent)?;
                    if !dependent_entry.sponsors.contains(&sponsor) {
                        dependent_entry.sponsors.push(sponsor);
                    }
                    true
                }
            }
            DependencyRemoved { sponsor, dependent } => {
                self.instance_mut(dependent)?;
                let sponsor_entry = self.instance_mut(sponsor)?;
                let before = sponsor_entry.dependents.len();
                sponsor_entry.dependents.retain(|d| d.si != dependent);
                let removed = sponsor_entry.dependents.len() != before;
                self.instance_mut(dependent)?.sponsors.retain(|s| *s != sponsor);
                removed
            }

            AssignmentHaState { susi, ha } => set(&mut self.assignment_mut(susi)?.ha_state, ha),
            AssignmentState { susi, state } => set(&mut self.assignment_mut(susi)?.state, state),
            AssignmentConfirmed { susi, ha } => {
                set(&mut self.assignment_mut(susi)?.confirmed_ha, ha)
            }
            AssignmentFollowUp { susi, follow_up } => {
                set(&mut self.assignment_mut(susi)?.follow_up, follow_up)
            }
            AssignmentAwaitingPeer { susi, awaiting } => {
                set(&mut self.assignment_mut(susi)?.awaiting_peer, awaiting)
            }
        };
        Ok(changed)
    }
}
