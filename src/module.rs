//! Module contract (spec §6 "Interfaces exposed to modules") and the
//! per-module [`ModuleContext`] injected at `initialize` time (spec §3).

use crate::bus::{Message, MessageBus, MessageQueue, SubscriptionHandle};
use crate::cancellation::Cancellation;
use crate::error::Result;
use crate::model::HealthStatus;
use crate::model::ModuleCategory;
use crate::scheduler::EventScheduler;
use crate::time::SharedTimeSource;
use std::sync::Arc;

/// Formats a `(major, minor, patch)` triple the way `model::module_id`
/// expects its version half (spec §4.10 step 1).
pub fn format_version((major, minor, patch): (u32, u32, u32)) -> String {
    format!("{major}.{minor}.{patch}")
}

/// The scoped view of kernel services handed to a module on `initialize`
/// (spec §3 `ModuleContext`). Every subscribe call made through it is
/// implicitly tagged with the module's own id, so `unsubscribeScope` at
/// unload time revokes exactly what this module registered.
#[derive(Clone)]
pub struct ModuleContext {
    module_id: String,
    bus: MessageBus,
    time: SharedTimeSource,
    scheduler: Option<EventScheduler>,
    cancellation: Cancellation,
}

impl ModuleContext {
    pub(crate) fn new(
        module_id: impl Into<String>,
        bus: MessageBus,
        time: SharedTimeSource,
        scheduler: Option<EventScheduler>,
        cancellation: Cancellation,
    ) -> Self {
        ModuleContext {
            module_id: module_id.into(),
            bus,
            time,
            scheduler,
            cancellation,
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn time(&self) -> &SharedTimeSource {
        &self.time
    }

    /// `None` when the kernel was built without a scheduler (spec §6
    /// `Core.UseScheduler = false`).
    pub fn scheduler(&self) -> Option<&EventScheduler> {
        self.scheduler.as_ref()
    }

    /// Cancelled when the application shuts down, or when this module is
    /// individually unloaded (spec §5: "each module's scoped context holds
    /// a child signal").
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn subscribe<T, F>(&self, handler: F, priority: i32) -> SubscriptionHandle
    where
        T: Message,
        F: Fn(&T) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.bus.subscribe(handler, priority, Some(&self.module_id))
    }

    pub fn subscribe_deferred<T, F>(
        &self,
        handler: F,
        queue: Arc<MessageQueue>,
    ) -> SubscriptionHandle
    where
        T: Message,
        F: Fn(&T) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.bus
            .subscribe_deferred(handler, queue, Some(&self.module_id))
    }

    pub fn publish<T: Message>(&self, value: T) -> Result<()> {
        self.bus.publish(value)
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }
}

/// The module lifecycle contract (spec §6). Implementors are handed to
/// [`crate::lifecycle::LifecycleManager::load`] as a boxed trait object.
/// `name`/`version`/`category`/`dependencies` are read before `initialize`
/// to compute `moduleId` and resolve load order, so they must be stable for
/// the lifetime of the instance.
pub trait Module: Send + 'static {
    fn name(&self) -> &str;
    fn version(&self) -> (u32, u32, u32);

    /// Advisory; used by the resolver as a secondary sort key and by
    /// shutdown ordering (spec §4.10). Defaults to `Integration`.
    fn category(&self) -> ModuleCategory {
        ModuleCategory::Integration
    }

    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// `Some(rate)` registers `tick` with the kernel's scheduler at
    /// approximately `rate` Hz (spec §6 `TickRateHz`); `None` (the default)
    /// means this module is not scheduled.
    fn tick_rate_hz(&self) -> Option<f64> {
        None
    }

    fn initialize(&mut self, ctx: &ModuleContext) -> std::result::Result<(), String>;
    fn start(&mut self) -> std::result::Result<(), String>;
    fn stop(&mut self) -> std::result::Result<(), String>;
    fn shutdown(&mut self) -> std::result::Result<(), String>;

    fn get_health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    /// Fixed-rate callback (spec §6 `tick(globalTick, monotonicMs)`). The
    /// default body does nothing; override alongside `tick_rate_hz`.
    fn tick(&mut self, global_tick: i64, monotonic_ms: i64) {
        let _ = (global_tick, monotonic_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_version_matches_dotted_convention() {
        assert_eq!(format_version((1, 2, 3)), "1.2.3");
    }
}
