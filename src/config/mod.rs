//! Cluster configuration
//!
//! JSON documents describing groups, units, instances and dependency
//! edges, plus engine tunables. A document is validated as a whole before
//! the controller applies any of it.

mod errors;
mod loader;
mod types;
mod validator;

pub use errors::{ConfigError, ConfigResult};
pub use types::{
    ClusterConfig, DependencyConfig, GroupConfig, InstanceConfig, Settings, UnitConfig,
};
pub use validator::validate_group;
