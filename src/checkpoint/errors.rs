//! Checkpoint error types
//!
//! Encoding and sink failures are reported to the caller. Divergence means a
//! standby cannot reproduce the active controller's state from the stream and
//! must be reinitialized from a full snapshot.

use std::io;
use thiserror::Error;

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Checkpoint errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to encode checkpoint data: {0}")]
    Encode(String),

    #[error("Failed to decode checkpoint data: {0}")]
    Decode(String),

    #[error("Replay diverged: {0}")]
    Diverged(String),

    #[error("Checkpoint stream gap: expected {expected}, received {received}")]
    Gap { expected: u64, received: u64 },

    #[error("Checkpoint references unknown entity {0}")]
    UnknownEntity(String),

    #[error("Only a standby controller replays the checkpoint stream")]
    NotStandby,

    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CheckpointError {
    pub fn diverged(message: impl Into<String>) -> Self {
        CheckpointError::Diverged(message.into())
    }

    pub fn unknown(id: impl std::fmt::Display) -> Self {
        CheckpointError::UnknownEntity(id.to_string())
    }

    /// Whether the standby must fall back to a full snapshot.
    pub fn requires_snapshot(&self) -> bool {
        matches!(
            self,
            CheckpointError::Diverged(_)
                | CheckpointError::Gap { .. }
                | CheckpointError::UnknownEntity(_)
        )
    }
}
