//! Message Queue (spec §4.3): a per-module FIFO of deferred envelopes, drained
//! on the consumer's own thread so it never races with the publisher.

use crate::bus::dispatch::invoke_handler;
use std::collections::VecDeque;
use std::sync::Mutex;

type Envelope = Box<dyn FnOnce() -> Result<(), String> + Send + 'static>;

/// Single-consumer FIFO holding `(payload, handler)` thunks produced by
/// deferred subscriptions. The spec recommends (but does not require) a
/// single consumer per queue; concurrent `drain` calls interleave safely
/// because each envelope is popped under the lock before being invoked.
#[derive(Default)]
pub struct MessageQueue {
    inner: Mutex<VecDeque<Envelope>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        MessageQueue {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn enqueue(&self, envelope: Envelope) {
        self.inner.lock().unwrap().push_back(envelope);
    }

    /// Invokes every queued envelope in FIFO order on the caller's thread.
    /// A panicking or error-returning handler is logged and does not abort
    /// the drain. Returns the number of envelopes drained.
    pub fn drain(&self) -> usize {
        let batch: Vec<Envelope> = {
            let mut guard = self.inner.lock().unwrap();
            guard.drain(..).collect()
        };
        let count = batch.len();
        for envelope in batch {
            if let Err(message) = invoke_handler(move || envelope()) {
                tracing::warn!(error = %message, "deferred handler failed during drain");
            }
        }
        count
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn drain_runs_fifo_and_survives_failures() {
        let q = MessageQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            q.enqueue(Box::new(move || {
                order.lock().unwrap().push(i);
                if i == 1 {
                    Err("boom".to_string())
                } else {
                    Ok(())
                }
            }));
        }
        assert_eq!(q.size(), 3);
        let drained = q.drain();
        assert_eq!(drained, 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn clear_drops_pending_without_running_them() {
        let q = MessageQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        q.enqueue(Box::new(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        q.clear();
        assert_eq!(q.size(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
