//! Checkpoint stream for standby controllers
//!
//! # Design Principles
//!
//! - One record per mutation, published synchronously
//! - Strictly increasing sequence numbers
//! - Replay runs the same apply code as the active controller
//! - Divergence is explicit, never healed silently
//!
//! A standby cold-starts from a [`Snapshot`] and then applies envelopes
//! whose sequence is above the snapshot's. Duplicates are skipped; a gap or
//! a diverging record requires a new snapshot.

mod errors;
mod record;
mod sink;
mod snapshot;

pub use errors::{CheckpointError, CheckpointResult};
pub use record::{CheckpointEnvelope, CheckpointRecord, EntityRecord, FieldUpdate};
pub use sink::{line_checksum, read_journal, CheckpointSink, FileSink, MemorySink, NullSink};
pub use snapshot::Snapshot;
