//! Checkpoint sinks
//!
//! A sink receives every envelope synchronously, in order, right after the
//! mutation it describes. The replication transport behind a sink is an
//! external concern; the sinks here keep the stream in memory or append it
//! to a checksummed JSON-lines file.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crc32fast::Hasher;

use super::errors::{CheckpointError, CheckpointResult};
use super::record::CheckpointEnvelope;

/// Destination of the checkpoint stream.
pub trait CheckpointSink: Send + Sync {
    /// Append one envelope. Must be visible when this returns.
    fn append(&self, envelope: &CheckpointEnvelope) -> CheckpointResult<()>;
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl CheckpointSink for NullSink {
    fn append(&self, _envelope: &CheckpointEnvelope) -> CheckpointResult<()> {
        Ok(())
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory sink. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    envelopes: Arc<Mutex<Vec<CheckpointEnvelope>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn envelopes(&self) -> Vec<CheckpointEnvelope> {
        guard(&self.envelopes).clone()
    }

    /// Remove and return everything appended so far.
    pub fn drain(&self) -> Vec<CheckpointEnvelope> {
        std::mem::take(&mut *guard(&self.envelopes))
    }

    pub fn len(&self) -> usize {
        guard(&self.envelopes).len()
    }

    pub fn is_empty(&self) -> bool {
        guard(&self.envelopes).is_empty()
    }
}

impl CheckpointSink for MemorySink {
    fn append(&self, envelope: &CheckpointEnvelope) -> CheckpointResult<()> {
        guard(&self.envelopes).push(envelope.clone());
        Ok(())
    }
}

/// CRC32 of a journal line's payload.
pub fn line_checksum(payload: &str) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload.as_bytes());
    hasher.finalize()
}

/// JSON-lines file sink, one envelope per line.
///
/// Each line is `<crc32 hex> <json>`; a mismatch on read is corruption.
pub struct FileSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileSink {
    /// Open or create a journal file in append mode.
    pub fn open(path: impl AsRef<Path>) -> CheckpointResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointSink for FileSink {
    fn append(&self, envelope: &CheckpointEnvelope) -> CheckpointResult<()> {
        let line = envelope.to_json()?;
        let mut writer = guard(&self.writer);
        writeln!(writer, "{:08x} {}", line_checksum(&line), line)?;
        writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for FileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSink").field("path", &self.path).finish()
    }
}

/// Read back a journal written by [`FileSink`].
pub fn read_journal(path: impl AsRef<Path>) -> CheckpointResult<Vec<CheckpointEnvelope>> {
    let reader = BufReader::new(File::open(path)?);
    let mut envelopes = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let (checksum, payload) = line
            .split_once(' ')
            .ok_or_else(|| {
                CheckpointError::Decode(format!("line {}: missing checksum", index + 1))
            })?;
        let expected = u32::from_str_radix(checksum, 16)
            .map_err(|e| CheckpointError::Decode(format!("line {}: {}", index + 1, e)))?;
        if line_checksum(payload) != expected {
            return Err(CheckpointError::Decode(format!(
                "line {}: checksum mismatch",
                index + 1
            )));
        }
        envelopes.push(CheckpointEnvelope::from_json(payload)?);
    }
    Ok(envelopes)
}
