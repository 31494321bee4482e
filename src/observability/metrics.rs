//! Metrics registry
//!
//! Counters only, monotonic, reset on controller creation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Operational counters of one controller
///
/// Uses Relaxed ordering; values are read for inspection only.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    events_processed: AtomicU64,
    commands_emitted: AtomicU64,
    replies_ignored: AtomicU64,
    messages_duplicate: AtomicU64,
    message_gaps: AtomicU64,
    placement_failures: AtomicU64,
    failovers: AtomicU64,
    escalations: AtomicU64,
    admin_requests: AtomicU64,
    admin_rejections: AtomicU64,
    checkpoint_records: AtomicU64,
    checkpoint_failures: AtomicU64,
    unassigned_alarms: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_events(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commands(&self) {
        self.commands_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_replies_ignored(&self) {
        self.replies_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_duplicates(&self) {
        self.messages_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_gaps(&self) {
        self.message_gaps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_placement_failures(&self) {
        self.placement_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failovers(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_escalations(&self) {
        self.escalations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_admin_requests(&self) {
        self.admin_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_admin_rejections(&self) {
        self.admin_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Add records the sink accepted.
    pub fn add_checkpoint_records(&self, count: u64) {
        self.checkpoint_records.fetch_add(count, Ordering::Relaxed);
    }

    /// Add records the sink refused.
    pub fn add_checkpoint_failures(&self, count: u64) {
        self.checkpoint_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_unassigned_alarms(&self) {
        self.unassigned_alarms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn placement_failures(&self) -> u64 {
        self.placement_failures.load(Ordering::Relaxed)
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            commands_emitted: self.commands_emitted.load(Ordering::Relaxed),
            replies_ignored: self.replies_ignored.load(Ordering::Relaxed),
            messages_duplicate: self.messages_duplicate.load(Ordering::Relaxed),
            message_gaps: self.message_gaps.load(Ordering::Relaxed),
            placement_failures: self.placement_failures.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            admin_requests: self.admin_requests.load(Ordering::Relaxed),
            admin_rejections: self.admin_rejections.load(Ordering::Relaxed),
            checkpoint_records: self.checkpoint_records.load(Ordering::Relaxed),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
            unassigned_alarms: self.unassigned_alarms.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub events_processed: u64,
    pub commands_emitted: u64,
    pub replies_ignored: u64,
    pub messages_duplicate: u64,
    pub message_gaps: u64,
    pub placement_failures: u64,
    pub failovers: u64,
    pub escalations: u64,
    pub admin_requests: u64,
    pub admin_rejections: u64,
    pub checkpoint_records: u64,
    pub checkpoint_failures: u64,
    pub unassigned_alarms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_increment_counters() {
        let registry = MetricsRegistry::new();

        registry.increment_events();
        registry.increment_events();
        registry.increment_failovers();
        registry.increment_placement_failures();
        registry.add_checkpoint_records(5);
        registry.add_checkpoint_failures(2);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.events_processed, 2);
        assert_eq!(snapshot.failovers, 1);
        assert_eq!(snapshot.placement_failures, 1);
        assert_eq!(registry.placement_failures(), 1);
        assert_eq!(snapshot.checkpoint_records, 5);
        assert_eq!(snapshot.checkpoint_failures, 2);
    }
}
