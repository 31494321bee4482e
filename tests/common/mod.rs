//! Test harness: a controller wired to simulated node agents
//!
//! Agents answer every command the way a healthy node would, unless their
//! unit is silenced. Message ids are tracked per unit so tests can also
//! inject out-of-order traffic by hand.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use hagroups::admin::{AdminOp, AdminRequest, AdminResponse, AdminTarget};
use hagroups::checkpoint::MemorySink;
use hagroups::config::{
    ClusterConfig, DependencyConfig, GroupConfig, InstanceConfig, UnitConfig,
};
use hagroups::controller::{Controller, MessageOutcome};
use hagroups::model::{HaState, PresenceState, RedundancyModel, SiId, SuId, SusiState};
use hagroups::transport::{Command, MessageBody, NodeMessage, Outbound};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Upper bound on command/reply rounds in one pump.
const MAX_PUMP_ROUNDS: usize = 1_000;

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub struct Cluster {
    pub controller: Controller,
    pub sink: MemorySink,
    pub now: DateTime<Utc>,
    msg_ids: BTreeMap<SuId, u64>,
    silent: BTreeSet<String>,
    /// Every command delivered, in order.
    pub delivered: Vec<Outbound>,
}

impl Cluster {
    /// Apply `config` and let every agent come up.
    pub fn start(config: ClusterConfig) -> Self {
        let mut cluster = Self::configured(config);
        cluster.pump();
        cluster
    }

    /// Apply `config` without answering the first commands.
    pub fn configured(config: ClusterConfig) -> Self {
        let sink = MemorySink::new();
        let controller = Controller::from_config(&config, Arc::new(sink.clone()), epoch())
            .expect("configuration accepted");
        Self {
            controller,
            sink,
            now: epoch(),
            msg_ids: BTreeMap::new(),
            silent: BTreeSet::new(),
            delivered: Vec::new(),
        }
    }

    pub fn su(&self, name: &str) -> SuId {
        self.controller.model().unit_id(name).expect("unit exists")
    }

    pub fn si(&self, name: &str) -> SiId {
        self.controller.model().instance_id(name).expect("instance exists")
    }

    /// Next message id the agent of `unit` will use.
    pub fn next_id(&mut self, su: SuId) -> u64 {
        let id = self.msg_ids.entry(su).or_insert(0);
        *id += 1;
        *id
    }

    /// Commands sent to `unit` are dropped from now on.
    pub fn silence(&mut self, unit: &str) {
        self.silent.insert(unit.to_string());
    }

    pub fn unsilence(&mut self, unit: &str) {
        self.silent.remove(unit);
    }

    /// Send one message from the agent of `unit`.
    pub fn send(&mut self, unit: &str, body: MessageBody) -> MessageOutcome {
        let su = self.su(unit);
        let id = self.next_id(su);
        self.controller
            .handle_message(NodeMessage::new(su, id, body))
            .expect("message handled")
    }

    /// Deliver queued commands and feed the replies back until the
    /// controller goes quiet. Returns how many commands were delivered.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        for _ in 0..MAX_PUMP_ROUNDS {
            let commands = self.controller.take_commands();
            if commands.is_empty() {
                return delivered;
            }
            for outbound in commands {
                delivered += 1;
                self.delivered.push(outbound.clone());
                if self.silent.contains(&outbound.unit) {
                    continue;
                }
                if let Some(body) = reply_to(&outbound.command) {
                    let id = self.next_id(outbound.su);
                    self.controller
                        .handle_message(NodeMessage::new(outbound.su, id, body))
                        .expect("reply handled");
                }
            }
        }
        panic!("controller kept emitting commands");
    }

    /// Node is gone: the controller drops its units and both sides restart
    /// their message ids.
    pub fn fail_node(&mut self, node: &str) -> usize {
        let units: Vec<SuId> = self
            .controller
            .model()
            .units()
            .filter(|(_, u)| u.node == node)
            .map(|(id, _)| id)
            .collect();
        let count = self.controller.node_failed(node).expect("node failure handled");
        for su in units {
            self.msg_ids.remove(&su);
        }
        count
    }

    /// The node came back: its agents report their units instantiated.
    pub fn restore_node(&mut self, node: &str) {
        let units: Vec<String> = self
            .controller
            .model()
            .units()
            .filter(|(_, u)| u.node == node)
            .map(|(_, u)| u.name.clone())
            .collect();
        for unit in units {
            self.send(
                &unit,
                MessageBody::Presence {
                    state: PresenceState::Instantiated,
                },
            );
        }
        self.pump();
    }

    pub fn admin(&mut self, invocation: u64, target: AdminTarget, op: AdminOp) -> AdminResponse {
        self.controller
            .admin(AdminRequest::new(invocation, target, op))
            .expect("admin request handled")
    }

    pub fn advance(&mut self, ms: i64) -> usize {
        self.now = self.now + Duration::milliseconds(ms);
        let fired = self.controller.advance_to(self.now).expect("timers fired");
        self.pump();
        fired
    }

    /// Units holding a confirmed record of `instance` in role `ha`.
    pub fn holders(&self, instance: &str, ha: HaState) -> Vec<String> {
        let model = self.controller.model();
        let mut units: Vec<String> = model
            .instance_records(self.si(instance))
            .into_iter()
            .filter(|(_, r)| r.state == SusiState::Assigned && r.ha_state == ha)
            .filter_map(|(_, r)| model.unit(r.su).ok().map(|u| u.name.clone()))
            .collect();
        units.sort();
        units
    }

    pub fn active(&self, instance: &str) -> Vec<String> {
        self.holders(instance, HaState::Active)
    }

    pub fn standby(&self, instance: &str) -> Vec<String> {
        self.holders(instance, HaState::Standby)
    }

    pub fn is_stable(&self, group: &str) -> bool {
        let model = self.controller.model();
        let sg = model.group_id(group).expect("group exists");
        model.group(sg).expect("group exists").fsm.is_stable()
    }

    /// Count of commands of one kind delivered to `unit`.
    pub fn delivered_to(&self, unit: &str, name: &str) -> usize {
        self.delivered
            .iter()
            .filter(|o| o.unit == unit && o.command.name() == name)
            .count()
    }
}

/// What a healthy agent answers.
fn reply_to(command: &Command) -> Option<MessageBody> {
    match command {
        Command::Instantiate => Some(MessageBody::Presence {
            state: PresenceState::Instantiated,
        }),
        Command::Terminate => Some(MessageBody::Presence {
            state: PresenceState::Uninstantiated,
        }),
        Command::Assign { record, ha } | Command::Modify { record, ha } => {
            Some(MessageBody::AssignmentReply {
                susi: record.susi,
                ha: Some(*ha),
                accepted: true,
            })
        }
        Command::Remove { record } => Some(MessageBody::AssignmentReply {
            susi: record.susi,
            ha: None,
            accepted: true,
        }),
        Command::RestartUnit => Some(MessageBody::AdminReply { success: true }),
        Command::RestartComponent { .. } | Command::Resync { .. } => None,
    }
}

// =============================================================================
// Configurations
// =============================================================================

/// One group, `units` units on nodes n1..nK ranked in order, the given
/// instances ranked in order.
pub fn group_config(model: RedundancyModel, units: usize, instances: &[&str]) -> ClusterConfig {
    let mut config = ClusterConfig::default();
    config.groups.push(GroupConfig::new("sg", model));
    for i in 1..=units {
        config.units.push(UnitConfig::new(
            format!("su-{}", i),
            "sg",
            format!("n{}", i),
            i as u32,
        ));
    }
    for (rank, name) in instances.iter().enumerate() {
        config
            .instances
            .push(InstanceConfig::new(*name, "sg", rank as u32 + 1));
    }
    config
}

pub fn two_n(instances: &[&str]) -> ClusterConfig {
    group_config(RedundancyModel::TwoN, 2, instances)
}

pub fn depend(
    config: &mut ClusterConfig,
    sponsor: &str,
    dependent: &str,
    tolerance_ms: Option<u64>,
) {
    config.dependencies.push(DependencyConfig {
        sponsor: sponsor.to_string(),
        dependent: dependent.to_string(),
        tolerance_ms,
    });
}
