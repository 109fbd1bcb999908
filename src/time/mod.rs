//! Time Source (spec §4.1): an abstract clock with a monotonic millisecond
//! stream, wall-clock UTC, and a future-returning `delay`.
//!
//! Two implementations are provided, [`SystemClock`] and [`SimulatedClock`],
//! selected behind the single [`TimeSource`] trait object so the rest of the
//! kernel never needs to know which one it was built with. The `delay` future
//! is a small hand-rolled waker, grounded on
//! `spark-core::platform::time::clock::MockClock`'s `Sleep` type — this crate
//! does not pull in an async runtime to drive it; callers poll it themselves
//! or hand it to the scheduler's `runRealTime`/`runSimulation` loops.

mod simulated;
mod sleep;
mod system;

pub use simulated::SimulatedClock;
pub use sleep::Sleep;
pub use system::SystemClock;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock time expressed as milliseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WallTime(pub i64);

impl WallTime {
    pub fn from_system_time(t: SystemTime) -> Self {
        let ms = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        WallTime(ms)
    }

    pub fn checked_add(self, d: Duration) -> Self {
        WallTime(self.0 + d.as_millis() as i64)
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Abstract time source backing the scheduler and the bus's monotonic stamps.
///
/// Invariants (spec §4.1): `monotonic_millis` is strictly non-decreasing;
/// `utc_now` is monotonically non-decreasing across a process lifetime.
pub trait TimeSource: Send + Sync + 'static {
    fn utc_now(&self) -> WallTime;
    fn monotonic_millis(&self) -> i64;
    fn delay(&self, d: Duration) -> Sleep;

    /// Lets callers that hold only a `SharedTimeSource` recover the concrete
    /// clock type — used by the scheduler's `runRealTime` to find a
    /// [`SimulatedClock`] underneath and apply its `timeScale` (spec §4.4).
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Type-erased handle to whichever time source the kernel was built with.
pub type SharedTimeSource = Arc<dyn TimeSource>;
