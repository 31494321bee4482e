//! Node-agent transport boundary
//!
//! The reliable transport itself is external. This module defines what
//! crosses the boundary: sequenced commands going out, id-tagged messages
//! coming in, and the duplicate/gap check applied to the latter.

mod command;
mod message;
mod sequence;

pub use command::{Command, Outbound, Outbox};
pub use message::{MessageBody, NodeMessage};
pub use sequence::InboundCheck;
