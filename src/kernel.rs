//! Application Kernel (spec §4.11): wires C1–C10 together, discovers
//! modules from an externally provided registry, publishes the two
//! application-wide lifecycle events, and exposes the control surface of
//! spec §6.

use crate::bus::{BusConfig, BusStatistics, MessageBus};
use crate::cancellation::Cancellation;
use crate::config::KernelConfig;
use crate::dependency::{self, ModuleSpec};
use crate::error::Result;
use crate::events::{ApplicationStarted, ApplicationStopping};
use crate::lifecycle::{HealthReport, LifecycleManager, ModuleState, ModuleSummary};
use crate::memory::{MemoryConfig, MemoryMonitor};
use crate::model::normalize;
use crate::module::Module;
use crate::scheduler::{EventScheduler, SchedulerStats};
use crate::time::SharedTimeSource;
use crate::watchdog::{Watchdog, WatchdogConfig};
use std::collections::HashMap;

/// Owns the single instances of the bus, scheduler, watchdog, and memory
/// monitor, plus the lifecycle manager that drives every module against
/// them (spec §3 "Ownership": "the Application Kernel owns the single
/// instances of C1–C4, C8, C9, C10").
pub struct ApplicationKernel {
    bus: MessageBus,
    time: SharedTimeSource,
    scheduler: Option<EventScheduler>,
    watchdog: Watchdog,
    memory: MemoryMonitor,
    lifecycle: LifecycleManager,
    cancellation: Cancellation,
    config: KernelConfig,
}

impl ApplicationKernel {
    /// Constructs the kernel and starts the watchdog and memory monitor's
    /// background timers. The scheduler, if configured, is started
    /// separately by [`Self::start`] (spec §4.11 step 4).
    pub fn new(config: KernelConfig, time: SharedTimeSource) -> Result<Self> {
        let bus = MessageBus::new(
            time.clone(),
            BusConfig {
                max_last_messages: config.bus_max_last_messages as usize,
                last_message_ttl: config.bus_last_message_ttl,
                max_failures_before_removal: config.bus_max_failures_before_removal as u32,
            },
        );

        let scheduler = if config.use_scheduler {
            Some(EventScheduler::new(config.scheduler_base_rate_hz, time.clone())?)
        } else {
            None
        };

        let watchdog = Watchdog::new(
            bus.clone(),
            time.clone(),
            WatchdogConfig {
                hang_threshold: config.watchdog_hang_threshold,
                check_interval: config.watchdog_check_interval,
            },
        );
        watchdog.start()?;

        let memory = MemoryMonitor::new(
            bus.clone(),
            MemoryConfig {
                sample_interval: config.memory_check_interval,
                per_module_soft_limit_mb: config.memory_per_module_soft_limit_mb,
                global_warn_threshold_mb: config.memory_global_warn_threshold_mb,
            },
        );
        memory.start()?;

        let cancellation = Cancellation::new();
        let lifecycle = LifecycleManager::new(
            bus.clone(),
            time.clone(),
            scheduler.clone(),
            watchdog.clone(),
            memory.clone(),
            config.clone(),
            cancellation.clone(),
        );

        Ok(ApplicationKernel {
            bus,
            time,
            scheduler,
            watchdog,
            memory,
            lifecycle,
            cancellation,
            config,
        })
    }

    /// Computes a dependency-respecting load order for `modules`, loads each
    /// in turn (a per-module failure is logged and does not abort the
    /// others), starts the scheduler if configured, and publishes
    /// `ApplicationStarted` (spec §4.11 `startAsync`).
    pub fn start(&self, modules: Vec<Box<dyn Module>>) -> Result<()> {
        let specs: Vec<ModuleSpec> = modules
            .iter()
            .map(|m| ModuleSpec::new(m.name(), m.dependencies(), m.category()))
            .collect();
        let order = dependency::resolve(&specs)?;

        let mut by_name: HashMap<String, Box<dyn Module>> = modules
            .into_iter()
            .map(|m| (normalize(m.name()), m))
            .collect();

        for name in order {
            let Some(module) = by_name.remove(&normalize(&name)) else {
                continue;
            };
            if let Err(err) = self.lifecycle.load(module) {
                tracing::error!(module = %name, error = %err, "module failed to load during application start");
            }
        }

        if let Some(scheduler) = &self.scheduler {
            scheduler.start()?;
        }

        self.bus.publish(ApplicationStarted {
            timestamp_ms: self.time.monotonic_millis(),
        })?;
        Ok(())
    }

    /// Publishes `ApplicationStopping`, stops the scheduler, unloads every
    /// module (reverse load order), then disposes the watchdog, memory
    /// monitor, and bus (spec §4.11 `stopAsync`).
    pub fn stop(&self) -> Result<()> {
        self.bus.publish(ApplicationStopping {
            timestamp_ms: self.time.monotonic_millis(),
        })?;

        if let Some(scheduler) = &self.scheduler {
            scheduler.stop()?;
        }

        self.lifecycle.shutdown_all();
        self.cancellation.cancel();
        self.watchdog.stop();
        self.memory.stop();
        self.bus.close();
        Ok(())
    }

    pub fn load(&self, module: Box<dyn Module>) -> Result<String> {
        self.lifecycle.load(module)
    }

    pub fn unload(&self, module_id: &str) -> Result<()> {
        self.lifecycle.unload(module_id)
    }

    pub fn reload(&self, module_id: &str) -> Result<String> {
        self.lifecycle.reload(module_id)
    }

    pub fn list_modules(&self) -> Vec<ModuleSummary> {
        self.lifecycle.list_modules()
    }

    pub fn get_state(&self, module_id: &str) -> Option<ModuleState> {
        self.lifecycle.get_state(module_id)
    }

    pub fn health_check_all(&self) -> Vec<HealthReport> {
        self.lifecycle.health_check_all()
    }

    pub fn scheduler_statistics(&self) -> Option<SchedulerStats> {
        self.scheduler.as_ref().map(|s| s.statistics())
    }

    pub fn bus_statistics(&self) -> BusStatistics {
        self.bus.statistics()
    }

    pub fn memory_info(&self, module_id: &str) -> MemoryInfo {
        MemoryInfo {
            last_sampled_mb: self.memory.last_sampled_mb(),
            warning_count: self.memory.warning_count(module_id),
        }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn time(&self) -> &SharedTimeSource {
        &self.time
    }

    pub fn scheduler(&self) -> Option<&EventScheduler> {
        self.scheduler.as_ref()
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }
}

/// Snapshot returned by `memoryInfo(moduleId)` (spec §6 control surface).
#[derive(Clone, Copy, Debug)]
pub struct MemoryInfo {
    pub last_sampled_mb: u64,
    pub warning_count: u32,
}
