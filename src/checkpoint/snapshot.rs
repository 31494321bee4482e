//! Full model snapshot
//!
//! Used at standby cold start and whenever replay reports divergence. The
//! snapshot carries the journal sequence it was taken at, so replay resumes
//! strictly after it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use super::errors::{CheckpointError, CheckpointResult};
use super::sink::CheckpointSink;
use crate::model::{EntityModel, ModelState};

/// Point-in-time copy of the entity model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub state: ModelState,
}

impl Snapshot {
    pub fn capture(model: &EntityModel, taken_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            taken_at,
            state: model.state().clone(),
        }
    }

    /// Journal sequence covered by this snapshot.
    pub fn journal_seq(&self) -> u64 {
        self.state.journal_seq
    }

    /// Build a model from the snapshot; new mutations go to `sink`.
    pub fn restore(&self, sink: Arc<dyn CheckpointSink>) -> EntityModel {
        EntityModel::from_state(self.state.clone(), sink)
    }

    pub fn to_json(&self) -> CheckpointResult<String> {
        serde_json::to_string(self).map_err(|e| CheckpointError::Encode(e.to_string()))
    }

    pub fn from_json(data: &str) -> CheckpointResult<Self> {
        serde_json::from_str(data).map_err(|e| CheckpointError::Decode(e.to_string()))
    }

    /// Write via a temporary file and rename.
    pub fn write_to(&self, path: impl AsRef<Path>) -> CheckpointResult<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, self.to_json()?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn read_from(path: impl AsRef<Path>) -> CheckpointResult<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }
}
