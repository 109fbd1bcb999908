//! Typed pub/sub bus (spec §4.2) plus its supporting cache, failure tracker,
//! and per-module deferred queue (spec §4.3).

mod cache;
pub(crate) mod dispatch;
mod failure;
mod queue;
mod stats;
mod subscription;

pub use dispatch::{BusConfig, Message, MessageBus, SubscriptionHandle};
pub use queue::MessageQueue;
pub use stats::BusStatistics;
pub use subscription::{DispatchMode, SubscriptionId};
