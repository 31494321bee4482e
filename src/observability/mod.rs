//! Observability for the assignment engine
//!
//! - Structured logging through `tracing`, every line tagged with an
//!   [`Event`] name in its `event` field
//! - Monotonic counters in [`MetricsRegistry`]
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No side effects on assignment decisions
//! 3. The library never installs a subscriber
//!
//! # Usage
//!
//! ```ignore
//! use hagroups::observability::{Event, MetricsRegistry};
//!
//! tracing::info!(event = Event::Failover.as_str(), si = %si, "standby promoted");
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_failovers();
//! ```

mod events;
mod metrics;

pub use events::Event;
pub use metrics::{MetricsRegistry, MetricsSnapshot};
