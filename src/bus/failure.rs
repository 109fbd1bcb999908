//! Per-handler failure tracking and auto-eviction (spec §4.2.2).

use super::subscription::SubscriptionId;
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Default)]
pub struct FailureTracker {
    counts: DashMap<(TypeId, SubscriptionId), AtomicU32>,
    threshold: u32,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        FailureTracker {
            counts: DashMap::new(),
            threshold,
        }
    }

    /// Resets the consecutive-failure counter for `id` to zero.
    pub fn record_success(&self, type_id: TypeId, id: SubscriptionId) {
        if let Some(counter) = self.counts.get(&(type_id, id)) {
            counter.store(0, Ordering::Release);
        }
    }

    /// Increments the counter and reports whether it has now crossed the
    /// removal threshold.
    pub fn record_failure(&self, type_id: TypeId, id: SubscriptionId) -> u32 {
        let counter = self
            .counts
            .entry((type_id, id))
            .or_insert_with(|| AtomicU32::new(0));
        counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn should_evict(&self, count: u32) -> bool {
        count >= self.threshold
    }

    pub fn forget(&self, type_id: TypeId, id: SubscriptionId) {
        self.counts.remove(&(type_id, id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct T;

    #[test]
    fn success_resets_consecutive_count() {
        let tracker = FailureTracker::new(3);
        let tid = TypeId::of::<T>();
        let id = SubscriptionId::next();
        assert_eq!(tracker.record_failure(tid, id), 1);
        assert_eq!(tracker.record_failure(tid, id), 2);
        tracker.record_success(tid, id);
        assert_eq!(tracker.record_failure(tid, id), 1);
        assert!(!tracker.should_evict(1));
    }

    #[test]
    fn threshold_crossing_is_reported() {
        let tracker = FailureTracker::new(3);
        let tid = TypeId::of::<T>();
        let id = SubscriptionId::next();
        tracker.record_failure(tid, id);
        tracker.record_failure(tid, id);
        let count = tracker.record_failure(tid, id);
        assert!(tracker.should_evict(count));
    }
}
