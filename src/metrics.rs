//! Client-side counters for observing the multiplexer.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic counters updated by the reactor and producer threads.
#[derive(Debug, Default)]
pub(crate) struct ClientMetrics {
    submitted: AtomicU64,
    completed: AtomicU64,
    merged: AtomicU64,
    batches_dispatched: AtomicU64,
    validation_failures: AtomicU64,
    pending_roots: AtomicU64,
}

impl ClientMetrics {
    pub(crate) fn packet_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn packets_completed(&self, count: u64) {
        self.completed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn packet_merged(&self) {
        self.merged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn batch_dispatched(&self) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_pending_roots(&self, depth: u64) {
        self.pending_roots.store(depth, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            merged: self.merged.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            pending_roots: self.pending_roots.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a client's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Packets handed to the submission queue.
    pub submitted: u64,
    /// Packets whose completion callback has been invoked.
    pub completed: u64,
    /// Packets absorbed into an existing pending batch.
    pub merged: u64,
    /// Protocol requests handed to the wire.
    pub batches_dispatched: u64,
    /// Packets rejected before reaching the pending queue.
    pub validation_failures: u64,
    /// Batch roots currently waiting for the inflight slot.
    pub pending_roots: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let metrics = ClientMetrics::default();
        metrics.packet_submitted();
        metrics.packet_submitted();
        metrics.packets_completed(2);
        metrics.packet_merged();
        metrics.batch_dispatched();
        metrics.validation_failure();
        metrics.set_pending_roots(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.submitted, 2);
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.merged, 1);
        assert_eq!(snap.batches_dispatched, 1);
        assert_eq!(snap.validation_failures, 1);
        assert_eq!(snap.pending_roots, 3);
    }
}
