//! Cooperative cancellation primitive (spec §5: "the kernel holds an
//! application cancellation signal. Each module's scoped context holds a
//! child signal, so canceling the parent cancels all modules").
//!
//! Grounded on `spark-core::contract::Cancellation`'s atomic-flag-plus-`Arc`
//! shape, generalized so `child()` derives a one-way link instead of sharing
//! the same flag: cancelling a child never cancels its parent, but
//! cancelling the parent is visible through every descendant.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation token. Cheap to clone; clones observe the same flag.
#[derive(Clone, Debug)]
pub struct Cancellation {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    flag: AtomicBool,
    parent: Option<Cancellation>,
}

impl Cancellation {
    pub fn new() -> Self {
        Cancellation {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// True if this token or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
            || self
                .inner
                .parent
                .as_ref()
                .map(Cancellation::is_cancelled)
                .unwrap_or(false)
    }

    /// Marks this token cancelled. Returns `true` the first time; later
    /// calls return `false`. Never affects the parent.
    pub fn cancel(&self) -> bool {
        self.inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Derives a child token: cancelling `self` cancels the child, but
    /// cancelling the child leaves `self` untouched.
    pub fn child(&self) -> Self {
        Cancellation {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_cancellation_is_visible_to_children() {
        let parent = Cancellation::new();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_cancellation_does_not_affect_parent() {
        let parent = Cancellation::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn cancel_reports_only_the_first_caller() {
        let token = Cancellation::new();
        assert!(token.cancel());
        assert!(!token.cancel());
    }
}
