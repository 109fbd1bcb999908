//! Last-value cache (spec §4.2.1): at most `max_entries` per-type snapshots,
//! evicted first by TTL then by oldest-timestamp-first once over budget.

use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;
use std::time::Duration;

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    stamped_at_ms: i64,
}

pub struct LastValueCache {
    entries: DashMap<TypeId, CacheEntry>,
    max_entries: usize,
    ttl_ms: i64,
}

impl LastValueCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        LastValueCache {
            entries: DashMap::new(),
            max_entries,
            ttl_ms: ttl.as_millis() as i64,
        }
    }

    pub fn insert<T: Send + Sync + 'static>(&self, value: T, stamped_at_ms: i64) {
        self.entries.insert(
            TypeId::of::<T>(),
            CacheEntry {
                value: Arc::new(value),
                stamped_at_ms,
            },
        );
        self.evict(stamped_at_ms);
    }

    pub fn get<T: Send + Sync + Clone + 'static>(&self) -> Option<(T, i64)> {
        let entry = self.entries.get(&TypeId::of::<T>())?;
        let value = entry.value.downcast_ref::<T>()?.clone();
        Some((value, entry.stamped_at_ms))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&self, now_ms: i64) {
        if self.ttl_ms > 0 {
            self.entries
                .retain(|_, entry| now_ms - entry.stamped_at_ms <= self.ttl_ms);
        }
        while self.entries.len() > self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().stamped_at_ms)
                .map(|e| *e.key());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}
