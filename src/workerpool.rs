//! Module Worker Pool (spec §4.6): a small fixed-size thread pool dedicated
//! to one module, so lifecycle callbacks and a module's own CPU-bound work
//! never block or starve another module's (spec §5).

use crate::error::panic_message;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const DEFAULT_THREADS: usize = 2;
const DEFAULT_SHUTDOWN_BUDGET: Duration = Duration::from_secs(2);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A small dedicated thread pool. One of these lives inside every
/// `ModuleRegistration`.
pub struct ModulePool {
    name: String,
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ModulePool {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self::with_threads(module_name, DEFAULT_THREADS)
    }

    pub fn with_threads(module_name: impl Into<String>, threads: usize) -> Self {
        let name = module_name.into();
        let threads = threads.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..threads)
            .map(|i| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("furrow-worker-{name}-{i}"))
                    .spawn(move || loop {
                        let job = {
                            let guard = receiver.lock().expect("worker pool mutex poisoned");
                            guard.recv()
                        };
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    })
                    .expect("spawn module worker thread")
            })
            .collect();

        ModulePool {
            name,
            sender: Some(sender),
            workers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submits synchronous work and returns a handle the caller can block on.
    pub fn submit<T, F>(&self, work: F) -> WorkHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(work));
            let _ = tx.send(result);
        });
        match &self.sender {
            Some(sender) => {
                if sender.send(job).is_err() {
                    tracing::warn!(pool = %self.name, "worker pool channel closed, job dropped");
                }
            }
            None => tracing::warn!(pool = %self.name, "submit called on a shut-down worker pool"),
        }
        WorkHandle { rx }
    }

    /// Stops accepting new work and joins every worker thread, waiting up to
    /// `DEFAULT_SHUTDOWN_BUDGET` per thread (spec §4.6).
    pub fn shutdown(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let deadline = Instant::now() + DEFAULT_SHUTDOWN_BUDGET;
            while !worker.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if !worker.is_finished() {
                tracing::warn!(pool = %self.name, "worker thread did not exit within its shutdown budget");
            }
            let _ = worker.join();
        }
    }
}

impl Drop for ModulePool {
    fn drop(&mut self) {
        if self.sender.is_some() {
            self.shutdown();
        }
    }
}

/// Handle to a unit of work submitted to a [`ModulePool`].
pub struct WorkHandle<T> {
    rx: mpsc::Receiver<std::thread::Result<T>>,
}

impl<T> WorkHandle<T> {
    /// Blocks until the work completes, returning its panic message (if any)
    /// as a plain string so callers don't need to handle `Box<dyn Any>`.
    pub fn join(self) -> Result<T, String> {
        match self.rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(panic_message(payload)),
            Err(_) => Err("worker pool dropped the job before it completed".to_string()),
        }
    }

    /// Blocks until the work completes or `timeout` elapses. Returns `None`
    /// on timeout; the work itself keeps running (the pool does not support
    /// hard cancellation, per spec §4.7 "hard kill is not attempted").
    pub fn join_timeout(self, timeout: Duration) -> Option<Result<T, String>> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(value)) => Some(Ok(value)),
            Ok(Err(payload)) => Some(Err(panic_message(payload))),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(Err("worker pool dropped the job before it completed".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_runs_work_and_returns_its_value() {
        let pool = ModulePool::new("test");
        let handle = pool.submit(|| 2 + 2);
        assert_eq!(handle.join().unwrap(), 4);
    }

    #[test]
    fn panic_is_reported_as_a_failure_not_a_crash() {
        let pool = ModulePool::new("test");
        let handle: WorkHandle<()> = pool.submit(|| panic!("boom"));
        assert!(handle.join().is_err());
    }

    #[test]
    fn one_modules_blocking_work_does_not_starve_another_pool() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Barrier;

        let pool_a = ModulePool::with_threads("a", 1);
        let pool_b = ModulePool::new("b");

        let barrier = Arc::new(Barrier::new(2));
        let barrier_a = barrier.clone();
        let blocked = Arc::new(AtomicBool::new(true));
        let blocked_a = blocked.clone();
        let _blocker = pool_a.submit(move || {
            barrier_a.wait();
            while blocked_a.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(1));
            }
        });
        barrier.wait();

        let handle = pool_b.submit(|| 1 + 1);
        assert_eq!(handle.join_timeout(Duration::from_secs(1)), Some(Ok(2)));
        blocked.store(false, Ordering::Relaxed);
    }
}
