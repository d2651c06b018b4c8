//! Data-plane counters

use core::sync::atomic::{AtomicU64, Ordering};

/// Stackmap statistics, updated lock-free from the flush path
#[derive(Debug, Default)]
pub struct StackmapStats {
    /// Flush invocations
    pub flushes: AtomicU64,
    /// Flushes that delivered nothing because of topology or locking
    pub aborted: AtomicU64,
    /// Buffers swapped into a destination ring
    pub delivered: AtomicU64,
    /// Buffers left for the next flush at the space ceiling
    pub requeued: AtomicU64,
    /// Buffers consumed by the host stack
    pub consumed: AtomicU64,
    /// Buffers parked in the reserve pool
    pub reserved: AtomicU64,
    /// Scans stopped by a host stack rejection
    pub early_breaks: AtomicU64,
    /// Scans stopped by an exhausted reserve pool
    pub reserve_exhausted: AtomicU64,
    /// Buffers dropped because their connection could not be queued
    pub dropped: AtomicU64,
    /// Topology or ownership invariants found broken
    pub invariant_violations: AtomicU64,
    /// Notifications routed to the stack port
    pub notifications: AtomicU64,
}

/// Point-in-time copy of [`StackmapStats`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub flushes: u64,
    pub aborted: u64,
    pub delivered: u64,
    pub requeued: u64,
    pub consumed: u64,
    pub reserved: u64,
    pub early_breaks: u64,
    pub reserve_exhausted: u64,
    pub dropped: u64,
    pub invariant_violations: u64,
    pub notifications: u64,
}

impl StackmapStats {
    #[inline]
    pub(crate) fn inc(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            flushes: get(&self.flushes),
            aborted: get(&self.aborted),
            delivered: get(&self.delivered),
            requeued: get(&self.requeued),
            consumed: get(&self.consumed),
            reserved: get(&self.reserved),
            early_breaks: get(&self.early_breaks),
            reserve_exhausted: get(&self.reserve_exhausted),
            dropped: get(&self.dropped),
            invariant_violations: get(&self.invariant_violations),
            notifications: get(&self.notifications),
        }
    }
}
