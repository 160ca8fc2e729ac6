//! Operational counters
//!
//! Counters only, monotonic, reset on process start. Relaxed atomics: exact
//! cross-counter consistency is not needed.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    configs_committed: AtomicU64,
    configs_unchanged: AtomicU64,
    configs_rejected: AtomicU64,
    pushes_succeeded: AtomicU64,
    pushes_failed: AtomicU64,
    allocations: AtomicU64,
    allocations_rejected: AtomicU64,
    messages_forwarded: AtomicU64,
    messages_applied: AtomicU64,
    messages_duplicated: AtomicU64,
    stale_rejections: AtomicU64,
    transport_failures: AtomicU64,
    alerts_raised: AtomicU64,
    writes_rejected: AtomicU64,
    switchovers_succeeded: AtomicU64,
    switchovers_failed: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Configuration

    pub fn increment_configs_committed(&self) {
        self.configs_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_configs_unchanged(&self) {
        self.configs_unchanged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_configs_rejected(&self) {
        self.configs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_pushes_succeeded(&self) {
        self.pushes_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_pushes_failed(&self) {
        self.pushes_failed.fetch_add(1, Ordering::Relaxed);
    }

    // Allocation

    pub fn increment_allocations(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_allocations_rejected(&self) {
        self.allocations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    // Routing

    pub fn increment_forwarded(&self) {
        self.messages_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_applied(&self) {
        self.messages_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_duplicated(&self) {
        self.messages_duplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_stale_rejections(&self) {
        self.stale_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_transport_failures(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_alerts(&self) {
        self.alerts_raised.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_writes_rejected(&self) {
        self.writes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    // Switchover

    pub fn increment_switchovers_succeeded(&self) {
        self.switchovers_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_switchovers_failed(&self) {
        self.switchovers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn alerts(&self) -> u64 {
        self.alerts_raised.load(Ordering::Relaxed)
    }

    pub fn stale_rejections(&self) -> u64 {
        self.stale_rejections.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            configs_committed: self.configs_committed.load(Ordering::Relaxed),
            configs_unchanged: self.configs_unchanged.load(Ordering::Relaxed),
            configs_rejected: self.configs_rejected.load(Ordering::Relaxed),
            pushes_succeeded: self.pushes_succeeded.load(Ordering::Relaxed),
            pushes_failed: self.pushes_failed.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            allocations_rejected: self.allocations_rejected.load(Ordering::Relaxed),
            messages_forwarded: self.messages_forwarded.load(Ordering::Relaxed),
            messages_applied: self.messages_applied.load(Ordering::Relaxed),
            messages_duplicated: self.messages_duplicated.load(Ordering::Relaxed),
            stale_rejections: self.stale_rejections.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            writes_rejected: self.writes_rejected.load(Ordering::Relaxed),
            switchovers_succeeded: self.switchovers_succeeded.load(Ordering::Relaxed),
            switchovers_failed: self.switchovers_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub configs_committed: u64,
    pub configs_unchanged: u64,
    pub configs_rejected: u64,
    pub pushes_succeeded: u64,
    pub pushes_failed: u64,
    pub allocations: u64,
    pub allocations_rejected: u64,
    pub messages_forwarded: u64,
    pub messages_applied: u64,
    pub messages_duplicated: u64,
    pub stale_rejections: u64,
    pub transport_failures: u64,
    pub alerts_raised: u64,
    pub writes_rejected: u64,
    pub switchovers_succeeded: u64,
    pub switchovers_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        assert_eq!(MetricsRegistry::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_increments_show_in_snapshot() {
        let metrics = MetricsRegistry::new();
        metrics.increment_configs_committed();
        metrics.increment_stale_rejections();
        metrics.increment_stale_rejections();
        metrics.increment_alerts();

        let snap = metrics.snapshot();
        assert_eq!(snap.configs_committed, 1);
        assert_eq!(snap.stale_rejections, 2);
        assert_eq!(metrics.alerts(), 1);
    }
}
