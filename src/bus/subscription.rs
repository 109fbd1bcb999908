use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque, globally unique subscription identifier (spec §3 `Subscription.id`).
///
/// Delegate/reference-equality removal (the source language's approach) is
/// replaced by this handle, per the design note in spec §9.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        SubscriptionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Whether a subscriber runs inline during `publish` or on its own queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    Immediate,
    Deferred,
}
