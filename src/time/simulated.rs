use super::sleep::SleepCompleter;
use super::{Sleep, TimeSource, WallTime};
use crate::error::{KernelError, Result};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

struct PendingDelay {
    deadline_ms: i64,
    completer: SleepCompleter,
}

/// A time source whose passage is entirely driven by explicit calls to
/// [`SimulatedClock::advance`] or [`SimulatedClock::set_time`]. `delay(d)`
/// registers a [`PendingDelay`] and never resolves on its own; under frozen
/// time (the default) a delay hangs indefinitely by design (spec §4.1).
pub struct SimulatedClock {
    now_ms: AtomicI64,
    /// `time_scale` bits are stored as an `f64` via `to_bits`; only read by
    /// `runRealTime` when converting elapsed wall time into advance steps.
    time_scale_bits: AtomicU64,
    pending: Mutex<Vec<PendingDelay>>,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(start_ms: i64) -> Self {
        SimulatedClock {
            now_ms: AtomicI64::new(start_ms),
            time_scale_bits: AtomicU64::new(1.0f64.to_bits()),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn time_scale(&self) -> f64 {
        f64::from_bits(self.time_scale_bits.load(Ordering::Relaxed))
    }

    /// `timeScale == 0` freezes time even under `runRealTime`.
    pub fn set_time_scale(&self, scale: f64) {
        self.time_scale_bits
            .store(scale.to_bits(), Ordering::Relaxed);
    }

    pub fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::Acquire)
    }

    /// Advances simulated time by `d`, completing every delay whose deadline
    /// has been reached or passed.
    pub fn advance(&self, d: Duration) {
        let delta = d.as_millis() as i64;
        let new_now = self.now_ms.fetch_add(delta, Ordering::AcqRel) + delta;
        self.fire_due(new_now);
    }

    /// Jumps directly to `t`. Fails with [`KernelError::ContractViolation`] if
    /// `t` is before the current time (spec §4.1).
    pub fn set_time(&self, t: WallTime) -> Result<()> {
        let current = self.now_ms.load(Ordering::Acquire);
        if t.0 < current {
            return Err(KernelError::ContractViolation(format!(
                "simulated time cannot move backwards: {} < {current}",
                t.0
            )));
        }
        self.now_ms.store(t.0, Ordering::Release);
        self.fire_due(t.0);
        Ok(())
    }

    /// The deadline of the earliest still-pending delay, if any.
    pub fn next_deadline(&self) -> Option<i64> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.deadline_ms)
            .min()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    fn fire_due(&self, now: i64) {
        let due: Vec<SleepCompleter> = {
            let mut guard = self.pending.lock().unwrap();
            let mut due = Vec::new();
            guard.retain(|p| {
                if p.deadline_ms <= now {
                    due.push(p.completer.clone());
                    false
                } else {
                    true
                }
            });
            due
        };
        for completer in due {
            completer.complete();
        }
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SimulatedClock {
    fn utc_now(&self) -> WallTime {
        WallTime(self.now_ms())
    }

    fn monotonic_millis(&self) -> i64 {
        self.now_ms()
    }

    fn delay(&self, d: Duration) -> Sleep {
        let deadline_ms = self.now_ms() + d.as_millis() as i64;
        if deadline_ms <= self.now_ms() {
            return Sleep::ready();
        }
        let (sleep, completer) = Sleep::new();
        self.pending.lock().unwrap().push(PendingDelay {
            deadline_ms,
            completer,
        });
        sleep
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_resolves_exactly_at_deadline() {
        let clock = SimulatedClock::new();
        let registered_at = clock.now_ms();
        let _sleep = clock.delay(Duration::from_millis(100));
        assert_eq!(clock.next_deadline(), Some(registered_at + 100));
        clock.advance(Duration::from_millis(99));
        assert_eq!(clock.pending_count(), 1);
        clock.advance(Duration::from_millis(1));
        assert_eq!(clock.pending_count(), 0);
    }

    #[test]
    fn set_time_rejects_going_backwards() {
        let clock = SimulatedClock::new();
        clock.advance(Duration::from_millis(500));
        assert!(clock.set_time(WallTime(100)).is_err());
        assert!(clock.set_time(WallTime(600)).is_ok());
    }
}
