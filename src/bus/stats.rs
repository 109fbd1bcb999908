//! Bus-wide statistics snapshot, returned by `MessageBus::statistics()`.
//!
//! **[EXPANDED]** grounded on `spark-core::runtime::SloPolicyManager`'s
//! pattern of accumulating lock-guarded counters and handing back a plain
//! value type (`*Report`) rather than a live handle.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub(crate) struct BusCounters {
    pub(crate) publishes: AtomicU64,
    pub(crate) handler_failures: AtomicU64,
    pub(crate) subscriptions_evicted: AtomicU64,
}

impl BusCounters {
    pub(crate) fn snapshot(&self, subscriber_types: usize, cache_entries: usize) -> BusStatistics {
        BusStatistics {
            publishes: self.publishes.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            subscriptions_evicted: self.subscriptions_evicted.load(Ordering::Relaxed),
            subscriber_types,
            cache_entries,
        }
    }
}

/// Point-in-time view of bus activity, suitable for a control-surface
/// `busStatistics()` call (spec §6).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusStatistics {
    pub publishes: u64,
    pub handler_failures: u64,
    pub subscriptions_evicted: u64,
    pub subscriber_types: usize,
    pub cache_entries: usize,
}
