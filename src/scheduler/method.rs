//! Scheduled-method bookkeeping (spec §3 `ScheduledMethod`, §4.4).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

/// A periodic callback. The two-argument form gives the callback the current
/// global tick and its own call counter (spec §4.4); callers that don't need
/// either can ignore the parameters.
pub type TickFn = Box<dyn FnMut(i64, i64) + Send>;

pub(crate) struct MethodState {
    pub(crate) name: String,
    pub(crate) divisor: u64,
    pub(crate) actual_rate_hz: f64,
    pub(crate) order: u64,
    pub(crate) paused: AtomicBool,
    pub(crate) local_call: AtomicU64,
    pub(crate) calls: AtomicU64,
    pub(crate) total_elapsed_ns: AtomicU64,
    pub(crate) max_elapsed_ns: AtomicU64,
    pub(crate) func: Mutex<TickFn>,
}

impl MethodState {
    pub(crate) fn is_due(&self, global_tick: i64) -> bool {
        !self.paused.load(Ordering::Relaxed)
            && (global_tick as u64) % self.divisor == 0
    }

    pub(crate) fn record(&self, elapsed_ns: u64) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_elapsed_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
        self.max_elapsed_ns.fetch_max(elapsed_ns, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MethodStats {
        let calls = self.calls.load(Ordering::Relaxed);
        let total_ns = self.total_elapsed_ns.load(Ordering::Relaxed);
        MethodStats {
            name: self.name.clone(),
            actual_rate_hz: self.actual_rate_hz,
            divisor: self.divisor,
            calls,
            paused: self.paused.load(Ordering::Relaxed),
            total_elapsed_ns: total_ns,
            max_elapsed_ns: self.max_elapsed_ns.load(Ordering::Relaxed),
            avg_elapsed_ns: if calls == 0 { 0 } else { total_ns / calls },
        }
    }
}

/// Point-in-time counters for one scheduled method.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodStats {
    pub name: String,
    pub actual_rate_hz: f64,
    pub divisor: u64,
    pub calls: u64,
    pub paused: bool,
    pub total_elapsed_ns: u64,
    pub max_elapsed_ns: u64,
    pub avg_elapsed_ns: u64,
}

type Remover = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by `EventScheduler::schedule`. Dropping it unschedules the
/// method (spec §4.4 `unschedule`/handle drop).
pub struct ScheduledMethodHandle {
    pub(crate) state: Arc<MethodState>,
    pub(crate) remover: Remover,
    pub(crate) active: Arc<AtomicBool>,
}

impl ScheduledMethodHandle {
    pub fn actual_rate_hz(&self) -> f64 {
        self.state.actual_rate_hz
    }

    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> MethodStats {
        self.state.snapshot()
    }
}

impl Drop for ScheduledMethodHandle {
    fn drop(&mut self) {
        if self.active.swap(false, Ordering::AcqRel) {
            (self.remover)();
        }
    }
}
