//! Watchdog (spec §4.8): tracks open, long-running operations per module and
//! reports — never kills — hangs and missed heartbeats.

use crate::bus::MessageBus;
use crate::events::ModuleHangDetected;
use crate::time::SharedTimeSource;
use dashmap::DashMap;
use parking_lot::Mutex as PlMutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct OperationRecord {
    module_id: String,
    operation_name: String,
    started_at_ms: i64,
    thread_name: String,
    reported: AtomicBool,
}

struct WatchdogInner {
    time: SharedTimeSource,
    bus: MessageBus,
    operations: DashMap<u64, Arc<OperationRecord>>,
    heartbeats: DashMap<String, AtomicI64>,
    next_id: AtomicU64,
    hang_threshold: Duration,
    check_interval: Duration,
    stop_requested: AtomicBool,
    running: AtomicBool,
    thread: PlMutex<Option<JoinHandle<()>>>,
}

#[derive(Clone, Copy, Debug)]
pub struct WatchdogConfig {
    pub hang_threshold: Duration,
    pub check_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig {
            hang_threshold: Duration::from_secs(60),
            check_interval: Duration::from_secs(5),
        }
    }
}

/// Lives for the process lifetime; owned by the Application Kernel.
#[derive(Clone)]
pub struct Watchdog {
    inner: Arc<WatchdogInner>,
}

/// A handle to one open operation. Drop it (or let it go out of scope) to
/// unregister, same as scoped guards elsewhere in this crate.
pub struct OperationToken {
    id: u64,
    watchdog: Arc<WatchdogInner>,
}

impl Drop for OperationToken {
    fn drop(&mut self) {
        self.watchdog.operations.remove(&self.id);
    }
}

impl Watchdog {
    pub fn new(bus: MessageBus, time: SharedTimeSource, config: WatchdogConfig) -> Self {
        Watchdog {
            inner: Arc::new(WatchdogInner {
                time,
                bus,
                operations: DashMap::new(),
                heartbeats: DashMap::new(),
                next_id: AtomicU64::new(0),
                hang_threshold: config.hang_threshold,
                check_interval: config.check_interval,
                stop_requested: AtomicBool::new(false),
                running: AtomicBool::new(false),
                thread: PlMutex::new(None),
            }),
        }
    }

    /// Begins tracking an operation; the returned token unregisters it on
    /// drop (spec §4.8: "drop the token to unregister").
    pub fn monitor(&self, module_id: impl Into<String>, operation_name: impl Into<String>) -> OperationToken {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let thread_name = thread::current().name().unwrap_or("unnamed").to_string();
        let record = Arc::new(OperationRecord {
            module_id: module_id.into(),
            operation_name: operation_name.into(),
            started_at_ms: self.inner.time.monotonic_millis(),
            thread_name,
            reported: AtomicBool::new(false),
        });
        self.inner.operations.insert(id, record);
        OperationToken {
            id,
            watchdog: self.inner.clone(),
        }
    }

    pub fn heartbeat(&self, module_id: impl Into<String>) {
        let now = self.inner.time.monotonic_millis();
        self.inner
            .heartbeats
            .entry(module_id.into())
            .or_insert_with(|| AtomicI64::new(now))
            .store(now, Ordering::Release);
    }

    pub fn open_operation_count(&self) -> usize {
        self.inner.operations.len()
    }

    /// Stops tracking a module's heartbeat (spec §4.10 unload step 5,
    /// "watchdog stopMonitoring"). Open operation tokens are unaffected;
    /// they unregister individually when dropped.
    pub fn stop_monitoring(&self, module_id: &str) {
        self.inner.heartbeats.remove(module_id);
    }

    pub fn start(&self) -> Result<(), crate::error::KernelError> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(crate::error::KernelError::AlreadyRunning);
        }
        self.inner.stop_requested.store(false, Ordering::Release);
        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name("furrow-watchdog".into())
            .spawn(move || watchdog_loop(inner))
            .expect("spawn watchdog thread");
        *self.inner.thread.lock() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.stop_requested.store(true, Ordering::Release);
        if let Some(handle) = self.inner.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

fn watchdog_loop(inner: Arc<WatchdogInner>) {
    let hang_ms = inner.hang_threshold.as_millis() as i64;
    loop {
        thread::sleep(inner.check_interval);
        if inner.stop_requested.load(Ordering::Acquire) {
            break;
        }
        scan_hangs(&inner, hang_ms);
        scan_missed_heartbeats(&inner, hang_ms);
    }
}

fn scan_hangs(inner: &Arc<WatchdogInner>, hang_ms: i64) {
    let now = inner.time.monotonic_millis();
    let hung: Vec<Arc<OperationRecord>> = inner
        .operations
        .iter()
        .filter(|entry| now - entry.value().started_at_ms > hang_ms)
        .map(|entry| entry.value().clone())
        .collect();

    for record in hung {
        if record.reported.swap(true, Ordering::AcqRel) {
            continue;
        }
        let duration_ms = (now - record.started_at_ms).max(0) as u64;
        tracing::warn!(
            module = %record.module_id,
            operation = %record.operation_name,
            duration_ms,
            "watchdog detected a hung operation"
        );
        if let Err(err) = inner.bus.publish(ModuleHangDetected {
            module_id: record.module_id.clone(),
            operation_name: record.operation_name.clone(),
            duration_ms,
            thread_name: record.thread_name.clone(),
        }) {
            tracing::warn!(error = %err, "failed to publish ModuleHangDetected");
        }
    }
}

fn scan_missed_heartbeats(inner: &Arc<WatchdogInner>, hang_ms: i64) {
    let now = inner.time.monotonic_millis();
    let silence_threshold = hang_ms * 2;
    for entry in inner.heartbeats.iter() {
        let last = entry.value().load(Ordering::Acquire);
        if now - last > silence_threshold {
            tracing::warn!(
                module = %entry.key(),
                silent_ms = now - last,
                "module has not sent a heartbeat recently"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConfig;
    use crate::time::SimulatedClock;

    fn make_watchdog(clock: Arc<SimulatedClock>, config: WatchdogConfig) -> Watchdog {
        let bus = MessageBus::new(clock.clone(), BusConfig::default());
        Watchdog::new(bus, clock, config)
    }

    #[test]
    fn hang_is_reported_exactly_once() {
        let clock = Arc::new(SimulatedClock::new());
        let watchdog = make_watchdog(
            clock.clone(),
            WatchdogConfig {
                hang_threshold: Duration::from_millis(500),
                check_interval: Duration::from_millis(100),
            },
        );
        let _token = watchdog.monitor("gps", "read_frame");
        clock.advance(Duration::from_millis(600));
        scan_hangs(&watchdog.inner, 500);
        scan_hangs(&watchdog.inner, 500);
        assert_eq!(watchdog.inner.operations.len(), 1);
        assert!(watchdog
            .inner
            .operations
            .iter()
            .next()
            .unwrap()
            .value()
            .reported
            .load(Ordering::Acquire));
    }

    #[test]
    fn dropping_the_token_unregisters_the_operation() {
        let clock = Arc::new(SimulatedClock::new());
        let watchdog = make_watchdog(clock, WatchdogConfig::default());
        {
            let _token = watchdog.monitor("gps", "read_frame");
            assert_eq!(watchdog.open_operation_count(), 1);
        }
        assert_eq!(watchdog.open_operation_count(), 0);
    }
}
