//! Fault escalation
//!
//! Per unit, faults climb three tiers:
//!
//! 1. Component restart, until the component-restart count exceeds its
//!    maximum within the probation period.
//! 2. Unit restart, until the unit-restart count exceeds its maximum.
//! 3. Unit failover. A further fault while failing over takes down the
//!    whole node.
//!
//! Probation expiry resets the tier's counter. The policy functions are
//! pure; [`apply`] turns a decision into commands and strategy calls.

use crate::checkpoint::FieldUpdate;
use crate::controller::Ctx;
use crate::fsm::{self, OperationKind};
use crate::model::{
    EscalationCounters, EscalationLevel, EscalationLimits, ModelResult, OperState,
    PresenceState, SuId,
};
use crate::observability::Event;
use crate::redundancy;
use crate::timer::{deadline_after, TimerKey};
use crate::transport::Command;
use tracing::{info, warn};

/// Recovery action chosen for a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    ComponentRestart,
    UnitRestart,
    UnitFailover,
    NodeFailover,
}

impl Recovery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recovery::ComponentRestart => "COMPONENT_RESTART",
            Recovery::UnitRestart => "UNIT_RESTART",
            Recovery::UnitFailover => "UNIT_FAILOVER",
            Recovery::NodeFailover => "NODE_FAILOVER",
        }
    }
}

/// Which probation period ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probation {
    Component,
    Unit,
}

fn unit_tier(
    mut counters: EscalationCounters,
    limits: &EscalationLimits,
) -> (Recovery, EscalationCounters) {
    counters.su_restarts += 1;
    if counters.su_restarts > limits.su_restart_max {
        counters.level = EscalationLevel::Failover;
        (Recovery::UnitFailover, counters)
    } else {
        counters.level = EscalationLevel::Unit;
        (Recovery::UnitRestart, counters)
    }
}

/// Decide the recovery for a failed component.
pub fn on_component_failure(
    counters: EscalationCounters,
    limits: &EscalationLimits,
) -> (Recovery, EscalationCounters) {
    match counters.level {
        EscalationLevel::Component => {
            let mut next = counters;
            next.comp_restarts += 1;
            if next.comp_restarts > limits.comp_restart_max {
                unit_tier(next, limits)
            } else {
                (Recovery::ComponentRestart, next)
            }
        }
        EscalationLevel::Unit => unit_tier(counters, limits),
        EscalationLevel::Failover => (Recovery::NodeFailover, counters),
    }
}

/// Decide the recovery for a failed unit.
pub fn on_unit_failure(
    counters: EscalationCounters,
    limits: &EscalationLimits,
) -> (Recovery, EscalationCounters) {
    match counters.level {
        EscalationLevel::Component | EscalationLevel::Unit => unit_tier(counters, limits),
        EscalationLevel::Failover => (Recovery::NodeFailover, counters),
    }
}

/// Counters after a probation period expired.
pub fn on_probation_expired(
    mut counters: EscalationCounters,
    probation: Probation,
) -> EscalationCounters {
    match probation {
        Probation::Component => {
            counters.comp_restarts = 0;
            if counters.su_restarts == 0 {
                counters.level = EscalationLevel::Component;
            }
        }
        Probation::Unit => {
            counters.su_restarts = 0;
            counters.comp_restarts = 0;
            counters.level = EscalationLevel::Component;
        }
    }
    counters
}

fn limits_of(ctx: &Ctx, su: SuId) -> ModelResult<EscalationLimits> {
    let sg = ctx.model.unit(su)?.sg;
    Ok(ctx.model.group(sg)?.escalation)
}

fn arm(ctx: &mut Ctx, key: TimerKey, ms: u64) {
    if !ctx.timers.is_armed(&key) {
        ctx.timers.start(key, deadline_after(ctx.now, ms));
    }
}

/// A component of `su` failed.
pub fn component_failed(ctx: &mut Ctx, su: SuId, component: &str) -> ModelResult<Recovery> {
    let limits = limits_of(ctx, su)?;
    let (recovery, counters) = on_component_failure(ctx.model.unit(su)?.escalation, &limits);
    ctx.model
        .update(FieldUpdate::UnitEscalation { su, counters })?;
    apply(ctx, su, recovery, Some(component))?;
    Ok(recovery)
}

/// `su` failed as a whole.
pub fn unit_failed(ctx: &mut Ctx, su: SuId) -> ModelResult<Recovery> {
    let limits = limits_of(ctx, su)?;
    let (recovery, counters) = on_unit_failure(ctx.model.unit(su)?.escalation, &limits);
    ctx.model
        .update(FieldUpdate::UnitEscalation { su, counters })?;
    apply(ctx, su, recovery, None)?;
    Ok(recovery)
}

/// Carry out a recovery decision.
pub fn apply(
    ctx: &mut Ctx,
    su: SuId,
    recovery: Recovery,
    component: Option<&str>,
) -> ModelResult<()> {
    let limits = limits_of(ctx, su)?;
    let unit = ctx.model.unit(su)?.name.clone();
    match recovery {
        Recovery::ComponentRestart => {
            let component = component.unwrap_or_default().to_string();
            info!(
                event = Event::ComponentRestart.as_str(),
                unit = %unit,
                component = %component,
                "restarting component"
            );
            ctx.outbox
                .send(&mut ctx.model, su, Command::RestartComponent { component })?;
            ctx.metrics.increment_commands();
            arm(ctx, TimerKey::CompProbation(su), limits.comp_restart_probation_ms);
        }
        Recovery::UnitRestart => {
            ctx.metrics.increment_escalations();
            info!(event = Event::UnitRestart.as_str(), unit = %unit, "restarting unit");
            ctx.model.update(FieldUpdate::UnitPresence {
                su,
                state: PresenceState::Restarting,
            })?;
            ctx.outbox.send(&mut ctx.model, su, Command::RestartUnit)?;
            ctx.metrics.increment_commands();
            arm(ctx, TimerKey::SuProbation(su), limits.su_restart_probation_ms);
        }
        Recovery::UnitFailover => {
            ctx.metrics.increment_escalations();
            warn!(
                event = Event::EscalationFailover.as_str(),
                unit = %unit,
                "restart limits exhausted, failing over"
            );
            fail_over_unit(ctx, su)?;
            arm(ctx, TimerKey::SuProbation(su), limits.su_restart_probation_ms);
        }
        Recovery::NodeFailover => {
            ctx.metrics.increment_escalations();
            let node = ctx.model.unit(su)?.node.clone();
            warn!(
                event = Event::EscalationNode.as_str(),
                unit = %unit,
                node = %node,
                "fault during failover, recovering node"
            );
            fail_node(ctx, &node)?;
        }
    }
    Ok(())
}

/// Disable a unit and run the group's fault handling on it.
pub fn fail_over_unit(ctx: &mut Ctx, su: SuId) -> ModelResult<bool> {
    ctx.model.update(FieldUpdate::UnitOperState {
        su,
        state: OperState::Disabled,
    })?;
    let sg = ctx.model.unit(su)?.sg;
    let strategy = redundancy::for_group(ctx, sg)?;
    info!(
        event = Event::UnitFault.as_str(),
        unit = %ctx.model.unit(su)?.name,
        "unit fault"
    );
    fsm::run(ctx, sg, OperationKind::UnitFault, |ctx| {
        strategy.su_fault(ctx, sg, su)
    })
}

/// Drop every unit hosted on `node` and tell each agent to terminate.
pub fn fail_node(ctx: &mut Ctx, node: &str) -> ModelResult<()> {
    let units: Vec<SuId> = ctx
        .model
        .units()
        .filter(|(_, u)| u.node == node)
        .map(|(id, _)| id)
        .collect();
    for su in units {
        ctx.model.update(FieldUpdate::UnitOperState {
            su,
            state: OperState::Disabled,
        })?;
        let sg = ctx.model.unit(su)?.sg;
        let strategy = redundancy::for_group(ctx, sg)?;
        fsm::run(ctx, sg, OperationKind::UnitFault, |ctx| {
            strategy.node_fail(ctx, sg, su)
        })?;
        ctx.model.update(FieldUpdate::UnitPresence {
            su,
            state: PresenceState::Terminating,
        })?;
        ctx.outbox.send(&mut ctx.model, su, Command::Terminate)?;
        ctx.metrics.increment_commands();
        ctx.timers.stop_unit(su);
    }
    Ok(())
}

/// A probation timer fired.
pub fn probation_expired(ctx: &mut Ctx, su: SuId, probation: Probation) -> ModelResult<()> {
    let Ok(unit) = ctx.model.unit(su) else {
        return Ok(());
    };
    let counters = on_probation_expired(unit.escalation, probation);
    if ctx
        .model
        .update(FieldUpdate::UnitEscalation { su, counters })?
    {
        info!(
            event = Event::ProbationExpired.as_str(),
            unit = %ctx.model.unit(su)?.name,
            level = ?counters.level,
            "probation expired"
        );
    }
    Ok(())
}

/// Re-arm probation timers after a takeover, for units with non-zero
/// counters.
pub fn rearm_timers(ctx: &mut Ctx) -> ModelResult<()> {
    let units: Vec<(SuId, EscalationCounters)> = ctx
        .model
        .units()
        .map(|(id, u)| (id, u.escalation))
        .collect();
    for (su, counters) in units {
        let limits = limits_of(ctx, su)?;
        if counters.comp_restarts > 0 {
            arm(ctx, TimerKey::CompProbation(su), limits.comp_restart_probation_ms);
        }
        if counters.su_restarts > 0 || counters.level == EscalationLevel::Failover {
            arm(ctx, TimerKey::SuProbation(su), limits.su_restart_probation_ms);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> EscalationLimits {
        EscalationLimits {
            comp_restart_max: 2,
            comp_restart_probation_ms: 1_000,
            su_restart_max: 1,
            su_restart_probation_ms: 2_000,
        }
    }

    #[test]
    fn test_component_faults_climb_tiers() {
        let limits = limits();
        let mut counters = EscalationCounters::default();
        let mut seen = Vec::new();
        for _ in 0..5 {
            let (recovery, next) = on_component_failure(counters, &limits);
            seen.push(recovery);
            counters = next;
        }
        assert_eq!(
            seen,
            vec![
                Recovery::ComponentRestart,
                Recovery::ComponentRestart,
                Recovery::UnitRestart,
                Recovery::UnitFailover,
                Recovery::NodeFailover,
            ]
        );
        assert_eq!(counters.level, EscalationLevel::Failover);
    }

    #[test]
    fn test_unit_failure_skips_component_tier() {
        let (recovery, counters) = on_unit_failure(EscalationCounters::default(), &limits());
        assert_eq!(recovery, Recovery::UnitRestart);
        assert_eq!(counters.su_restarts, 1);
        assert_eq!(counters.level, EscalationLevel::Unit);
    }

    #[test]
    fn test_probation_resets() {
        let counters = EscalationCounters {
            level: EscalationLevel::Component,
            comp_restarts: 2,
            su_restarts: 0,
        };
        let reset = on_probation_expired(counters, Probation::Component);
        assert_eq!(reset, EscalationCounters::default());

        let counters = EscalationCounters {
            level: EscalationLevel::Failover,
            comp_restarts: 3,
            su_restarts: 2,
        };
        let partial = on_probation_expired(counters, Probation::Component);
        assert_eq!(partial.level, EscalationLevel::Failover);
        assert_eq!(partial.comp_restarts, 0);

        let reset = on_probation_expired(counters, Probation::Unit);
        assert_eq!(reset, EscalationCounters::default());
    }
}
