//! Single-shot timers
//!
//! Timers are keyed by the identity they guard. Starting an armed key
//! restarts it; expiry removes the key, so a second expiry of the same key
//! finds nothing and is a no-op. Time never advances on its own: the
//! controller passes the current instant to [`TimerTable::expired`].

use crate::model::{SiId, SuId};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Identity of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKey {
    /// Grace period of a dependent after its sponsor lost its assignment.
    Tolerance { dependent: SiId, sponsor: SiId },
    /// Component-restart probation of a unit.
    CompProbation(SuId),
    /// Unit-restart probation of a unit.
    SuProbation(SuId),
}

/// Deadline `ms` milliseconds after `now`.
pub fn deadline_after(now: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    const CENTURY_MS: u64 = 100 * 365 * 24 * 3600 * 1000;
    let ms = ms.min(CENTURY_MS) as i64;
    now.checked_add_signed(Duration::milliseconds(ms))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone, Default)]
pub struct TimerTable {
    deadlines: BTreeMap<TimerKey, DateTime<Utc>>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm or re-arm a timer. Returns true if it was already armed.
    pub fn start(&mut self, key: TimerKey, deadline: DateTime<Utc>) -> bool {
        self.deadlines.insert(key, deadline).is_some()
    }

    /// Disarm. Returns true if the timer was armed.
    pub fn stop(&mut self, key: &TimerKey) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.deadlines.contains_key(key)
    }

    pub fn deadline(&self, key: &TimerKey) -> Option<DateTime<Utc>> {
        self.deadlines.get(key).copied()
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn expired(&mut self, now: DateTime<Utc>) -> Vec<TimerKey> {
        let mut due: Vec<(DateTime<Utc>, TimerKey)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (*deadline, *key))
            .collect();
        due.sort();
        for (_, key) in &due {
            self.deadlines.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }

    /// Drop every timer that refers to a unit.
    pub fn stop_unit(&mut self, su: SuId) {
        self.deadlines.retain(|key, _| match key {
            TimerKey::CompProbation(u) | TimerKey::SuProbation(u) => *u != su,
            TimerKey::Tolerance { .. } => true,
        });
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
