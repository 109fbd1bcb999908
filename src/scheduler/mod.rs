//! Event Scheduler (spec §4.4): a single rate-driven tick loop that fans out
//! to registered methods in a deterministic order, plus two cooperative
//! drivers (`run_real_time`, `run_simulation`) for hosting the same methods
//! alongside caller-supplied futures without a background thread.

mod method;
mod stats;
mod waker;

pub use method::{MethodStats, ScheduledMethodHandle, TickFn};
pub use stats::SchedulerStats;

use crate::bus::dispatch::invoke_handler;
use crate::error::{KernelError, Result};
use crate::time::{SharedTimeSource, SimulatedClock};
use method::MethodState;
use parking_lot::{Mutex as PlMutex, RwLock};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::Context;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

const STOP_JOIN_BUDGET: Duration = Duration::from_secs(5);
const SIMULATION_IDLE_LIMIT: u32 = 1_000;

struct SchedulerInner {
    base_rate_hz: f64,
    period_ms: f64,
    time: SharedTimeSource,
    methods: RwLock<Vec<Arc<MethodState>>>,
    global_tick: AtomicI64,
    state: AtomicU8,
    stop_requested: AtomicBool,
    thread: PlMutex<Option<JoinHandle<()>>>,
    next_order: AtomicU64,
    allow_schedule_while_running: bool,
}

/// Drives every [`ScheduledMethodHandle`] registered against it. Cheap to
/// clone; clones share the same tick state.
#[derive(Clone)]
pub struct EventScheduler {
    inner: Arc<SchedulerInner>,
}

impl EventScheduler {
    /// `base_rate_hz` must satisfy `0 < r <= 1000` (spec §4.4).
    pub fn new(base_rate_hz: f64, time: SharedTimeSource) -> Result<Self> {
        if !(base_rate_hz > 0.0 && base_rate_hz <= 1000.0) {
            return Err(KernelError::ContractViolation(format!(
                "baseRateHz must satisfy 0 < r <= 1000, got {base_rate_hz}"
            )));
        }
        Ok(EventScheduler {
            inner: Arc::new(SchedulerInner {
                base_rate_hz,
                period_ms: 1000.0 / base_rate_hz,
                time,
                methods: RwLock::new(Vec::new()),
                global_tick: AtomicI64::new(0),
                state: AtomicU8::new(CREATED),
                stop_requested: AtomicBool::new(false),
                thread: PlMutex::new(None),
                next_order: AtomicU64::new(0),
                allow_schedule_while_running: true,
            }),
        })
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == RUNNING
    }

    /// Registers a periodic method. `rate_hz` is rounded to the nearest
    /// integer divisor of `base_rate_hz` (spec §4.4 rate assignment); the
    /// handle reports the resulting `actual_rate_hz`.
    pub fn schedule(
        &self,
        name: impl Into<String>,
        rate_hz: f64,
        method: impl FnMut(i64, i64) + Send + 'static,
    ) -> Result<ScheduledMethodHandle> {
        if !(rate_hz > 0.0) {
            return Err(KernelError::ContractViolation(format!(
                "requestedRateHz must be > 0, got {rate_hz}"
            )));
        }
        if self.is_running() && !self.inner.allow_schedule_while_running {
            return Err(KernelError::ContractViolation(
                "this scheduler does not accept registrations while running".into(),
            ));
        }

        let divisor = (self.inner.base_rate_hz / rate_hz).round().max(1.0) as u64;
        let actual_rate_hz = self.inner.base_rate_hz / divisor as f64;
        let order = self.inner.next_order.fetch_add(1, Ordering::Relaxed);

        let state = Arc::new(MethodState {
            name: name.into(),
            divisor,
            actual_rate_hz,
            order,
            paused: AtomicBool::new(false),
            local_call: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            total_elapsed_ns: AtomicU64::new(0),
            max_elapsed_ns: AtomicU64::new(0),
            func: PlMutex::new(Box::new(method)),
        });

        self.inner.methods.write().push(state.clone());

        let inner = self.inner.clone();
        let remover: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            inner.methods.write().retain(|m| m.order != order);
        });

        Ok(ScheduledMethodHandle {
            state,
            remover,
            active: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Convenience wrapper for the argument-less method form spec §4.4 also
    /// allows.
    pub fn schedule_simple(
        &self,
        name: impl Into<String>,
        rate_hz: f64,
        mut method: impl FnMut() + Send + 'static,
    ) -> Result<ScheduledMethodHandle> {
        self.schedule(name, rate_hz, move |_tick, _call| method())
    }

    pub fn statistics(&self) -> SchedulerStats {
        SchedulerStats {
            global_tick: self.inner.global_tick.load(Ordering::Relaxed),
            base_rate_hz: self.inner.base_rate_hz,
            running: self.is_running(),
            methods: self
                .inner
                .methods
                .read()
                .iter()
                .map(|m| m.snapshot())
                .collect(),
        }
    }

    fn run_due_methods(&self, tick: i64) {
        for method in self.inner.methods.read().iter() {
            if !method.is_due(tick) {
                continue;
            }
            let call = method.local_call.fetch_add(1, Ordering::Relaxed) as i64 + 1;
            let start = Instant::now();
            let outcome = invoke_handler(|| {
                (method.func.lock())(tick, call);
                Ok(())
            });
            method.record(start.elapsed().as_nanos() as u64);
            if let Err(message) = outcome {
                tracing::warn!(method = %method.name, error = %message, "scheduled method failed");
            }
        }
    }

    fn any_method_due(&self, tick: i64) -> bool {
        self.inner.methods.read().iter().any(|m| m.is_due(tick))
    }

    fn stats_interval(&self) -> i64 {
        ((10.0 * self.inner.base_rate_hz).round() as i64).max(1)
    }

    /// Starts the background tick thread (spec §4.4 "background-thread mode,
    /// real clock"). Fails with [`KernelError::AlreadyRunning`] if already
    /// started.
    pub fn start(&self) -> Result<()> {
        if self
            .inner
            .state
            .compare_exchange(CREATED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            if self.inner.state.load(Ordering::Acquire) == STOPPED {
                self.inner.state.store(RUNNING, Ordering::Release);
            } else {
                return Err(KernelError::AlreadyRunning);
            }
        }
        self.inner.stop_requested.store(false, Ordering::Release);

        let inner = self.inner.clone();
        let scheduler = EventScheduler { inner: inner.clone() };
        let handle = thread::Builder::new()
            .name("furrow-scheduler-tick".into())
            .spawn(move || scheduler.tick_loop())
            .expect("spawn scheduler tick thread");
        *self.inner.thread.lock() = Some(handle);
        Ok(())
    }

    fn tick_loop(&self) {
        let mut next_fire_at = self.inner.time.monotonic_millis() as f64 + self.inner.period_ms;
        let stats_every = self.stats_interval();

        loop {
            if self.inner.stop_requested.load(Ordering::Acquire) {
                break;
            }

            let tick = self.inner.global_tick.load(Ordering::Acquire);
            self.run_due_methods(tick);
            self.inner.global_tick.fetch_add(1, Ordering::Relaxed);

            if (tick + 1) % stats_every == 0 {
                tracing::debug!(tick = tick + 1, "scheduler tick snapshot: {:?}", self.statistics());
            }

            let now_ms = self.inner.time.monotonic_millis() as f64;
            let remaining_ms = next_fire_at - now_ms;
            if remaining_ms > 0.0 {
                thread::sleep(Duration::from_millis(remaining_ms as u64));
            } else if remaining_ms < -self.inner.period_ms {
                tracing::warn!(overrun_ms = -remaining_ms, "tick loop overran its slot");
            }
            next_fire_at += self.inner.period_ms;
        }

        self.inner.state.store(STOPPED, Ordering::Release);
    }

    /// Signals the tick loop to stop and waits up to 5s for it to exit.
    pub fn stop(&self) -> Result<()> {
        if self.inner.state.load(Ordering::Acquire) != RUNNING {
            return Ok(());
        }
        self.inner.stop_requested.store(true, Ordering::Release);

        let deadline = Instant::now() + STOP_JOIN_BUDGET;
        let handle = self.inner.thread.lock().take();
        if let Some(handle) = handle {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if !handle.is_finished() {
                tracing::warn!("scheduler tick thread did not stop within its budget");
            }
            let _ = handle.join();
        }
        self.inner.state.store(STOPPED, Ordering::Release);
        Ok(())
    }

    /// Cooperatively drives registered methods and `externals` on the
    /// calling thread using real elapsed time, scaled by the time source's
    /// `timeScale` when it is a [`SimulatedClock`] (spec §4.4).
    pub fn run_real_time(
        &self,
        mut externals: Vec<Pin<Box<dyn Future<Output = ()> + Send>>>,
    ) -> Result<()> {
        if self.is_running() {
            return Err(KernelError::AlreadyRunning);
        }
        let waker = waker::noop_waker();
        let mut cx = Context::from_waker(&waker);
        let sim = self.inner.time.as_any().downcast_ref::<SimulatedClock>();
        let mut last_wall = Instant::now();
        let mut next_fire_at = self.inner.time.monotonic_millis() as f64 + self.inner.period_ms;

        loop {
            externals.retain_mut(|fut| fut.as_mut().poll(&mut cx).is_pending());
            if externals.is_empty() {
                return Ok(());
            }

            if let Some(clock) = sim {
                let scale = clock.time_scale();
                let now_wall = Instant::now();
                let real_elapsed = now_wall.duration_since(last_wall);
                last_wall = now_wall;
                if scale > 0.0 {
                    let sim_delta_ms = real_elapsed.as_secs_f64() * 1000.0 * scale;
                    if sim_delta_ms >= 1.0 {
                        clock.advance(Duration::from_millis(sim_delta_ms as u64));
                    }
                }
            }

            let now_ms = self.inner.time.monotonic_millis() as f64;
            if now_ms >= next_fire_at {
                let tick = self.inner.global_tick.load(Ordering::Acquire);
                self.run_due_methods(tick);
                self.inner.global_tick.fetch_add(1, Ordering::Relaxed);
                next_fire_at += self.inner.period_ms;
            }

            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Cooperatively drives registered methods and `externals` against
    /// `clock`, jumping directly to the next event instead of sleeping
    /// (spec §4.4 simulation mode): each round computes `nextEventAt =
    /// min(next tick's fire time, earliest pending delay's deadline)`,
    /// advances `clock` to it (completing any delay that falls due), and
    /// only then runs due methods if `nextEventAt` landed on a tick
    /// boundary. Advancing time on every round, not only idle ones, is what
    /// keeps `monotonic_millis()` in lockstep with `global_tick` and lets a
    /// continuously-due method (divisor 1) coexist with pending delays
    /// instead of starving them. Fails with [`KernelError::Deadlock`] if
    /// externals remain incomplete with neither a due method nor a pending
    /// delay firing for [`SIMULATION_IDLE_LIMIT`] consecutive rounds.
    pub fn run_simulation(
        &self,
        clock: &SimulatedClock,
        mut externals: Vec<Pin<Box<dyn Future<Output = ()> + Send>>>,
    ) -> Result<()> {
        if self.is_running() {
            return Err(KernelError::AlreadyRunning);
        }
        let waker = waker::noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut idle_rounds = 0u32;
        let start_tick = self.inner.global_tick.load(Ordering::Acquire);
        let start_ms = clock.now_ms();

        loop {
            externals.retain_mut(|fut| fut.as_mut().poll(&mut cx).is_pending());
            if externals.is_empty() {
                return Ok(());
            }

            let tick = self.inner.global_tick.load(Ordering::Acquire);
            let elapsed_ticks = (tick - start_tick) as f64;
            let next_tick_at = start_ms + (elapsed_ticks * self.inner.period_ms).round() as i64;
            let next_delay_at = clock.next_deadline();
            let next_event_at = next_delay_at.map_or(next_tick_at, |d| d.min(next_tick_at));

            let now = clock.now_ms();
            let gap_ms = (next_event_at - now).max(0) as u64;
            clock.advance(Duration::from_millis(gap_ms));

            let delay_fired = next_delay_at.is_some_and(|d| d <= next_event_at);
            let mut method_fired = false;
            if next_event_at >= next_tick_at {
                if self.any_method_due(tick) {
                    self.run_due_methods(tick);
                    method_fired = true;
                }
                self.inner.global_tick.fetch_add(1, Ordering::Relaxed);
            }

            if delay_fired || method_fired {
                idle_rounds = 0;
                continue;
            }

            idle_rounds += 1;
            if idle_rounds >= SIMULATION_IDLE_LIMIT {
                return Err(KernelError::Deadlock);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SystemClock;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn divisor_assignment_matches_rate_rounding() {
        let scheduler = EventScheduler::new(100.0, Arc::new(SystemClock::new())).unwrap();
        let handle = scheduler.schedule("m", 30.0, |_, _| {}).unwrap();
        // 100/30 = 3.33 -> rounds to 3 -> actual rate 33.33Hz
        assert_eq!(handle.stats().divisor, 3);
        assert!((handle.actual_rate_hz() - 33.333_333).abs() < 0.01);
    }

    #[test]
    fn rejects_non_positive_rate() {
        let scheduler = EventScheduler::new(100.0, Arc::new(SystemClock::new())).unwrap();
        assert!(scheduler.schedule("m", 0.0, |_, _| {}).is_err());
    }

    #[test]
    fn run_simulation_drives_due_methods_and_exits_when_externals_complete() {
        let clock = Arc::new(SimulatedClock::new());
        let scheduler = EventScheduler::new(100.0, clock.clone()).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_for_method = calls.clone();
        let _handle = scheduler
            .schedule_simple("counter", 100.0, move || {
                calls_for_method.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let done_for_future = done.clone();
        let fut: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            done_for_future.store(true, Ordering::Relaxed);
        });

        scheduler.run_simulation(&clock, vec![fut]).unwrap();
        assert!(done.load(Ordering::Relaxed));
        assert!(calls.load(Ordering::Relaxed) > 0);
    }
}
