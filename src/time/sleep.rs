//! Hand-rolled delay future, shared by both time source implementations.
//!
//! Grounded on `spark-core::platform::time::clock::MockClock`: a shared,
//! mutex-protected deadline flag plus a registered [`Waker`]. `SystemClock`
//! completes it from a background timer thread; `SimulatedClock` completes it
//! when `advance`/`set_time` crosses the deadline.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

#[derive(Default)]
struct SleepState {
    done: bool,
    waker: Option<Waker>,
}

/// A future that resolves once its deadline has been reached or the sleep was
/// cancelled. Completing it twice is a no-op (spec §3 `PendingDelay` invariant).
pub struct Sleep {
    state: Arc<Mutex<SleepState>>,
}

impl Sleep {
    pub(crate) fn new() -> (Self, SleepCompleter) {
        let state = Arc::new(Mutex::new(SleepState::default()));
        (
            Sleep {
                state: state.clone(),
            },
            SleepCompleter { state },
        )
    }

    /// A `Sleep` that is already resolved, used for zero/negative durations.
    pub(crate) fn ready() -> Self {
        let state = Arc::new(Mutex::new(SleepState {
            done: true,
            waker: None,
        }));
        Sleep { state }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut guard = self.state.lock().unwrap();
        if guard.done {
            Poll::Ready(())
        } else {
            guard.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// The completion side of a [`Sleep`], held by whichever clock created it.
#[derive(Clone)]
pub(crate) struct SleepCompleter {
    state: Arc<Mutex<SleepState>>,
}

impl SleepCompleter {
    pub(crate) fn complete(&self) {
        let waker = {
            let mut guard = self.state.lock().unwrap();
            if guard.done {
                return;
            }
            guard.done = true;
            guard.waker.take()
        };
        if let Some(w) = waker {
            w.wake();
        }
    }
}
