//! hagroups - service-group assignment engine for a cluster availability
//! manager
//!
//! Given a declared set of redundant service groups, the engine computes and
//! maintains assignments of service instances onto service units according
//! to each group's redundancy model, and reacts to faults, administrative
//! requests and dependency constraints. Every mutation is published to a
//! checkpoint stream before the event that caused it returns.
//!
//! Everything is driven through [`Controller`].

pub mod admin;
pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod dependency;
pub mod escalation;
pub mod fsm;
pub mod model;
pub mod observability;
pub mod redundancy;
pub mod timer;
pub mod transport;

pub use admin::{AdminCompletion, AdminOp, AdminRequest, AdminResponse, AdminTarget};
pub use config::{ClusterConfig, ConfigError, ConfigResult, Settings};
pub use controller::{Controller, MessageOutcome, Role};
pub use model::{ModelError, ModelResult, RedundancyModel};
