//! A no-op waker for cooperatively polling futures without an async runtime.
//!
//! Grounded on `spark-core`'s own contract-test support module
//! (`tests/contracts/support/async.rs`), which hand-rolls the same
//! `RawWakerVTable` rather than depend on a real executor. Futures polled with
//! this waker must make progress some other way (here, the scheduler
//! re-polls every pending future once per tick/event, after a clock advance
//! may have completed one of its delays) since `wake` is a no-op.
use std::task::{RawWaker, RawWakerVTable, Waker};

fn raw_waker() -> RawWaker {
    fn clone(_: *const ()) -> RawWaker {
        raw_waker()
    }
    fn wake(_: *const ()) {}
    fn wake_by_ref(_: *const ()) {}
    fn drop(_: *const ()) {}
    const VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);
    RawWaker::new(std::ptr::null(), &VTABLE)
}

/// Builds a [`Waker`] whose `wake`/`wake_by_ref` do nothing.
///
/// Safety: the vtable's functions never dereference the null data pointer,
/// so the contract `Waker::from_raw` asks for (the vtable matching the data
/// pointer's type) holds trivially.
pub(crate) fn noop_waker() -> Waker {
    unsafe { Waker::from_raw(raw_waker()) }
}
