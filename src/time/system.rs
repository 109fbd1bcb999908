use super::{Sleep, TimeSource, WallTime};
use std::thread;
use std::time::{Duration, Instant};

/// OS wall-clock / monotonic-instant backed time source.
///
/// `delay` spawns a one-shot timer thread that completes the sleep after `d`
/// elapses; this keeps the implementation dependency-free (no async runtime)
/// at the cost of one thread per outstanding delay, acceptable given the
/// kernel's delay volume (module backoffs, not hot-path messaging).
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn utc_now(&self) -> WallTime {
        WallTime::from_system_time(std::time::SystemTime::now())
    }

    fn monotonic_millis(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }

    fn delay(&self, d: Duration) -> Sleep {
        if d.is_zero() {
            return Sleep::ready();
        }
        let (sleep, completer) = Sleep::new();
        thread::Builder::new()
            .name("furrow-timer".into())
            .spawn(move || {
                thread::sleep(d);
                completer.complete();
            })
            .expect("spawn timer thread");
        sleep
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
