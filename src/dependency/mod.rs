//! Instance dependencies
//!
//! A dependent instance may only be assigned while every sponsor is
//! assigned. Losing a sponsor starts a per-edge tolerance timer; when it
//! expires the dependent is unassigned and waits for the sponsor chain to
//! come back. Administrative removal of a sponsor removes its dependents
//! first.

mod engine;
pub mod graph;

pub use engine::{
    begin_admin_unassign, evaluate_dependent, on_edge_changed, on_instance_changed,
    on_tolerance_expired, process_ready_to_unassign, rearm_timers,
};
