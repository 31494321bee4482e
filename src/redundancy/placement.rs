//! Unit selection
//!
//! Candidates are in-service units of the group. Among those with capacity
//! for the requested role, the unit with the fewest assignments wins, then
//! the lower rank. When every unit of the group has the same rank, ties
//! rotate round-robin starting after the last unit chosen.

use crate::checkpoint::FieldUpdate;
use crate::controller::Ctx;
use crate::model::{
    AdminState, Assignment, EntityModel, HaState, ModelResult, ServiceGroup, SgId,
    SiAssignmentState, SiId, SuId, SusiId, SusiState,
};
use crate::observability::Event;
use tracing::{info, warn};

/// Assignments held by a unit, by role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitLoad {
    pub active: u32,
    pub standby: u32,
}

impl UnitLoad {
    pub fn total(&self) -> u32 {
        self.active + self.standby
    }
}

/// Counts every record not already on its way out through a remove.
pub fn load(model: &EntityModel, su: SuId) -> UnitLoad {
    let mut load = UnitLoad::default();
    for (_, record) in model.unit_records(su) {
        if record.state == SusiState::Removing {
            continue;
        }
        if record.ha_state.is_active_role() {
            load.active += 1;
        } else {
            load.standby += 1;
        }
    }
    load
}

pub fn has_capacity(group: &ServiceGroup, load: UnitLoad, ha: HaState) -> bool {
    let (limit, used) = if ha == HaState::Standby {
        (group.limits.max_standby_sis_per_su, load.standby)
    } else {
        (group.limits.max_active_sis_per_su, load.active)
    };
    limit == 0 || used < limit
}

/// In-service member units, in rank order.
pub fn in_service_units(model: &EntityModel, sg: SgId) -> ModelResult<Vec<SuId>> {
    let group = model.group(sg)?;
    Ok(group
        .units
        .iter()
        .copied()
        .filter(|su| model.unit(*su).map_or(false, |u| u.is_in_service()))
        .collect())
}

/// Pick the best candidate for a new record in role `ha`.
pub fn choose(
    ctx: &mut Ctx,
    sg: SgId,
    candidates: &[SuId],
    ha: HaState,
) -> ModelResult<Option<SuId>> {
    let group = ctx.model.group(sg)?;
    let n = group.units.len().max(1);
    let start = group
        .last_selected
        .and_then(|last| group.units.iter().position(|u| *u == last))
        .map(|p| p + 1)
        .unwrap_or(0);

    let mut best: Option<((u32, u32, usize), SuId)> = None;
    for su in candidates {
        let unit = ctx.model.unit(*su)?;
        if !unit.is_in_service() {
            continue;
        }
        let unit_load = load(&ctx.model, *su);
        if !has_capacity(group, unit_load, ha) {
            continue;
        }
        let position = group.units.iter().position(|u| u == su).unwrap_or(n);
        let key = if group.equal_ranked_su {
            (unit_load.total(), 0, (position + n - start % n) % n)
        } else {
            (unit_load.total(), unit.rank, position)
        };
        if best.map_or(true, |(k, _)| key < k) {
            best = Some((key, *su));
        }
    }

    let chosen = best.map(|(_, su)| su);
    if let Some(su) = chosen {
        if ctx.model.group(sg)?.equal_ranked_su {
            ctx.model.update(FieldUpdate::GroupLastSelected { sg, su: Some(su) })?;
        }
    }
    Ok(chosen)
}

/// Record that an instance could not be placed. An unlocked instance left
/// without an active while its group has units in service raises the
/// unassigned alarm once.
pub fn placement_failed(ctx: &mut Ctx, si: SiId, ha: HaState) -> ModelResult<()> {
    ctx.metrics.increment_placement_failures();
    let instance = ctx.model.instance(si)?;
    warn!(
        event = Event::PlacementFailed.as_str(),
        instance = %instance.name,
        role = ha.as_str(),
        "no eligible unit"
    );
    let raise = ha.is_active_role()
        && !instance.alarm_sent
        && instance.admin_state == AdminState::Unlocked
        && !in_service_units(&ctx.model, instance.sg)?.is_empty()
        && !InstanceRecords::collect(&ctx.model, si).has_active();
    if raise {
        ctx.model.update(FieldUpdate::InstanceAlarmSent { si, sent: true })?;
        ctx.metrics.increment_unassigned_alarms();
        warn!(
            event = Event::InstanceUnassigned.as_str(),
            instance = %ctx.model.instance(si)?.name,
            "instance has no active assignment"
        );
    }
    Ok(())
}

/// Clear the unassigned alarm once the instance is served again or no
/// longer expected to be.
pub fn review_alarm(ctx: &mut Ctx, si: SiId) -> ModelResult<bool> {
    let instance = ctx.model.instance(si)?;
    if !instance.alarm_sent {
        return Ok(false);
    }
    let served = instance.assignment_state == SiAssignmentState::Assigned;
    if !served && instance.admin_state == AdminState::Unlocked {
        return Ok(false);
    }
    ctx.model.update(FieldUpdate::InstanceAlarmSent { si, sent: false })?;
    info!(
        event = Event::InstanceAlarmCleared.as_str(),
        instance = %ctx.model.instance(si)?.name,
        "unassigned alarm cleared"
    );
    Ok(true)
}

/// Snapshot of one instance's records grouped by role.
#[derive(Debug, Clone, Default)]
pub struct InstanceRecords {
    /// Active-role records not being removed.
    pub active: Vec<SusiId>,
    /// Active-role records that stay.
    pub staying_active: Vec<SusiId>,
    /// Standby records not being removed, leaving ones included.
    pub standby: Vec<SusiId>,
    /// Standby records that stay.
    pub staying_standby: Vec<SusiId>,
    /// Confirmed, idle standbys whose unit has room for one more active.
    pub settled_standby: Vec<SusiId>,
    /// Units holding any record of the instance.
    pub units: Vec<SuId>,
}

impl InstanceRecords {
    pub fn collect(model: &EntityModel, si: SiId) -> Self {
        let mut view = Self::default();
        for (id, record) in model.instance_records(si) {
            view.units.push(record.su);
            if record.state == SusiState::Removing {
                continue;
            }
            if record.ha_state.is_active_role() {
                view.active.push(id);
                if !record.is_leaving() {
                    view.staying_active.push(id);
                }
            } else {
                view.standby.push(id);
                if !record.is_leaving() {
                    view.staying_standby.push(id);
                }
                if is_promotable(model, record) && has_active_room(model, record.su) {
                    view.settled_standby.push(id);
                }
            }
        }
        view
    }

    pub fn has_active(&self) -> bool {
        !self.staying_active.is_empty()
    }

    pub fn on_unit(&self, su: SuId) -> bool {
        self.units.contains(&su)
    }
}

/// Confirmed idle standby on an in-service unit.
pub fn is_promotable(model: &EntityModel, record: &Assignment) -> bool {
    record.is_settled_as(HaState::Standby)
        && model.unit(record.su).map_or(false, |u| u.is_in_service())
}

/// Whether `su` can take one more active without passing its group's
/// per-unit limit.
pub fn has_active_room(model: &EntityModel, su: SuId) -> bool {
    model
        .unit(su)
        .and_then(|unit| model.group(unit.sg))
        .map_or(false, |group| has_capacity(group, load(model, su), HaState::Active))
}

/// Order records by their unit's position in the group.
pub fn by_unit_rank(model: &EntityModel, sg: SgId, records: &mut [SusiId]) {
    let order = model.group(sg).map(|g| g.units.clone()).unwrap_or_default();
    records.sort_by_key(|id| {
        model
            .assignment(*id)
            .ok()
            .and_then(|r| order.iter().position(|u| *u == r.su))
            .unwrap_or(usize::MAX)
    });
}

/// Best-ranked record of a set.
pub fn first_by_rank(model: &EntityModel, sg: SgId, records: &[SusiId]) -> Option<SusiId> {
    let mut sorted = records.to_vec();
    by_unit_rank(model, sg, &mut sorted);
    sorted.first().copied()
}

/// Role each unit currently plays, for models that assign roles per unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitRoles {
    /// Units holding a staying active-role record, in rank order.
    pub active: Vec<SuId>,
    /// Units holding only staying standby records, in rank order.
    pub standby: Vec<SuId>,
}

impl UnitRoles {
    pub fn collect(model: &EntityModel, sg: SgId) -> ModelResult<Self> {
        let mut roles = Self::default();
        for su in &model.group(sg)?.units {
            let staying: Vec<&Assignment> = model
                .unit_records(*su)
                .into_iter()
                .map(|(_, r)| r)
                .filter(|r| !r.is_leaving())
                .collect();
            if staying.iter().any(|r| r.ha_state.is_active_role()) {
                roles.active.push(*su);
            } else if !staying.is_empty() {
                roles.standby.push(*su);
            }
        }
        Ok(roles)
    }

    pub fn has_role(&self, su: SuId) -> bool {
        self.active.contains(&su) || self.standby.contains(&su)
    }
}
