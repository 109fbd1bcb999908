//! Lifecycle Manager (spec §4.10): load/start/stop/unload with dependency
//! resolution, per-module worker pool, timeout-protected lifecycle calls,
//! hot reload, and cascade safety. Every public operation here is serialized
//! through a single lifecycle mutex (spec §5), so a module can never observe
//! its own `stop` while still inside `start`.

use crate::bus::MessageBus;
use crate::cancellation::Cancellation;
use crate::config::KernelConfig;
use crate::error::{KernelError, OperationResult, Result};
use crate::events::{ModuleLoaded, ModuleUnloaded};
use crate::executor::{self, ModuleFault};
use crate::memory::MemoryMonitor;
use crate::model::{self, module_id, HealthStatus, ModuleCategory};
use crate::module::{format_version, Module, ModuleContext};
use crate::scheduler::{EventScheduler, ScheduledMethodHandle};
use crate::time::SharedTimeSource;
use crate::watchdog::Watchdog;
use crate::workerpool::ModulePool;
use parking_lot::Mutex as PlMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A module's position in the state machine of spec §3 `ModuleRegistration`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModuleState {
    Loading,
    Initializing,
    Starting,
    Running,
    Stopping,
    ShuttingDown,
    Unloaded,
    Failed,
}

/// Point-in-time view of one registered module, for `listModules()`.
#[derive(Clone, Debug)]
pub struct ModuleSummary {
    pub module_id: String,
    pub name: String,
    pub version: String,
    pub category: ModuleCategory,
    pub dependencies: Vec<String>,
    pub state: ModuleState,
    pub loaded_at_ms: i64,
}

/// Result of `healthCheckAll()` for a single module (spec §4.10).
#[derive(Clone, Debug)]
pub struct HealthReport {
    pub module_id: String,
    pub health: HealthStatus,
    pub state: ModuleState,
    pub last_error: Option<String>,
}

struct ModuleRegistration {
    module_id: String,
    name: String,
    version: String,
    category: ModuleCategory,
    dependencies: Vec<String>,
    state: PlMutex<ModuleState>,
    loaded_at_ms: i64,
    load_sequence: u64,
    last_error: PlMutex<Option<String>>,
    cancellation: Cancellation,
    pool: PlMutex<Option<ModulePool>>,
    module: Arc<PlMutex<Box<dyn Module>>>,
    tick_handle: PlMutex<Option<ScheduledMethodHandle>>,
}

/// Owns the module registry and drives every module through
/// Load → Initialize → Start → Run → Stop → Shutdown (spec §4.10).
pub struct LifecycleManager {
    bus: MessageBus,
    time: SharedTimeSource,
    scheduler: Option<EventScheduler>,
    watchdog: Watchdog,
    memory: MemoryMonitor,
    config: KernelConfig,
    app_cancellation: Cancellation,
    lock: PlMutex<()>,
    registry: PlMutex<HashMap<String, Arc<ModuleRegistration>>>,
    load_sequence: AtomicU64,
}

impl LifecycleManager {
    pub fn new(
        bus: MessageBus,
        time: SharedTimeSource,
        scheduler: Option<EventScheduler>,
        watchdog: Watchdog,
        memory: MemoryMonitor,
        config: KernelConfig,
        app_cancellation: Cancellation,
    ) -> Self {
        LifecycleManager {
            bus,
            time,
            scheduler,
            watchdog,
            memory,
            config,
            app_cancellation,
            lock: PlMutex::new(()),
            registry: PlMutex::new(HashMap::new()),
            load_sequence: AtomicU64::new(0),
        }
    }

    /// Loads, initializes, and starts `module` (spec §4.10 `load`).
    pub fn load(&self, module: Box<dyn Module>) -> Result<String> {
        let _guard = self.lock.lock();
        self.load_locked(module)
    }

    fn load_locked(&self, module: Box<dyn Module>) -> Result<String> {
        let name = module.name().to_string();
        let version = format_version(module.version());
        let id = module_id(&name, &version);

        if self.registry.lock().contains_key(&id) {
            return Err(KernelError::AlreadyLoaded { module_id: id });
        }

        let deps = module.dependencies();
        let missing: Vec<String> = {
            let registry = self.registry.lock();
            deps.iter()
                .filter(|dep| {
                    !registry.values().any(|reg| {
                        model::names_eq(&reg.name, dep) && *reg.state.lock() == ModuleState::Running
                    })
                })
                .cloned()
                .collect()
        };
        if !missing.is_empty() {
            return Err(KernelError::MissingDependencies {
                module: name,
                missing,
            });
        }

        let category = module.category();
        let tick_rate = module.tick_rate_hz();
        let child_cancellation = self.app_cancellation.child();
        let context = ModuleContext::new(
            id.clone(),
            self.bus.clone(),
            self.time.clone(),
            self.scheduler.clone(),
            child_cancellation.clone(),
        );

        self.memory.register(&id);
        self.watchdog.heartbeat(&id);

        let registration = Arc::new(ModuleRegistration {
            module_id: id.clone(),
            name: name.clone(),
            version,
            category,
            dependencies: deps,
            state: PlMutex::new(ModuleState::Loading),
            loaded_at_ms: self.time.monotonic_millis(),
            load_sequence: self.load_sequence.fetch_add(1, Ordering::Relaxed),
            last_error: PlMutex::new(None),
            cancellation: child_cancellation,
            pool: PlMutex::new(Some(ModulePool::new(id.clone()))),
            module: Arc::new(PlMutex::new(module)),
            tick_handle: PlMutex::new(None),
        });

        // Visible to listModules/getState/healthCheckAll from this point on,
        // including if initialize or start below leaves it in `Failed`
        // (spec §3 invariant (c): "from Failed, only unload/remove is
        // permitted", which only makes sense if the registration stays put).
        self.registry.lock().insert(id.clone(), registration.clone());

        *registration.state.lock() = ModuleState::Initializing;
        let init = self.invoke(&registration, "initialize", self.config.lifecycle_init_timeout, {
            let context = context.clone();
            move |module| module.initialize(&context)
        });
        if let Some(message) = self.fail_phase(&registration, "initialize", init) {
            self.purge(&registration);
            return Err(KernelError::LifecycleFailed {
                module_id: id,
                phase: "initialize".into(),
                message,
            });
        }

        *registration.state.lock() = ModuleState::Starting;
        let start = self.invoke(&registration, "start", self.config.lifecycle_start_timeout, |module| {
            module.start()
        });
        if let Some(message) = self.fail_phase(&registration, "start", start) {
            // Symmetric cleanup plus a best-effort shutdown (spec §4.10 step 7).
            let _ = self.invoke(&registration, "shutdown", self.config.lifecycle_shutdown_timeout, |module| {
                module.shutdown()
            });
            self.purge(&registration);
            return Err(KernelError::LifecycleFailed {
                module_id: id,
                phase: "start".into(),
                message,
            });
        }

        *registration.state.lock() = ModuleState::Running;

        if let (Some(scheduler), Some(rate)) = (&self.scheduler, tick_rate) {
            let module = registration.module.clone();
            let watchdog = self.watchdog.clone();
            let time = self.time.clone();
            let reg_id = id.clone();
            match scheduler.schedule(id.clone(), rate, move |tick, _call| {
                watchdog.heartbeat(&reg_id);
                module.lock().tick(tick, time.monotonic_millis());
            }) {
                Ok(handle) => *registration.tick_handle.lock() = Some(handle),
                Err(err) => tracing::warn!(module = %id, error = %err, "failed to schedule module tick"),
            }
        }

        let version = registration.version.clone();

        self.bus
            .publish(ModuleLoaded {
                module_id: id.clone(),
                name,
                version,
                timestamp_ms: self.time.monotonic_millis(),
            })
            .ok();

        Ok(id)
    }

    /// Unloads a previously loaded module (spec §4.10 `unload`).
    pub fn unload(&self, module_id: &str) -> Result<()> {
        let _guard = self.lock.lock();
        self.unload_locked(module_id).map(|_| ())
    }

    fn unload_locked(&self, module_id: &str) -> Result<Box<dyn Module>> {
        let registration = {
            let registry = self.registry.lock();
            registry
                .get(module_id)
                .cloned()
                .ok_or_else(|| KernelError::NotFound(module_id.to_string()))?
        };

        let dependents: Vec<String> = self
            .registry
            .lock()
            .values()
            .filter(|reg| {
                reg.module_id != module_id
                    && *reg.state.lock() == ModuleState::Running
                    && reg
                        .dependencies
                        .iter()
                        .any(|dep| model::names_eq(dep, &registration.name))
            })
            .map(|reg| reg.module_id.clone())
            .collect();
        if !dependents.is_empty() {
            return Err(KernelError::HasDependents {
                module_id: module_id.to_string(),
                dependents,
            });
        }

        *registration.state.lock() = ModuleState::Stopping;
        let stop = self.invoke(&registration, "stop", self.config.lifecycle_stop_timeout, |module| {
            module.stop()
        });
        if let OperationResult::Failure { message, .. } = &stop {
            tracing::warn!(module = %module_id, error = %message, "module stop failed during unload, continuing");
        }

        *registration.state.lock() = ModuleState::ShuttingDown;
        let shutdown = self.invoke(&registration, "shutdown", self.config.lifecycle_shutdown_timeout, |module| {
            module.shutdown()
        });
        if let OperationResult::Failure { message, .. } = &shutdown {
            tracing::warn!(module = %module_id, error = %message, "module shutdown failed during unload, continuing");
        }

        self.purge(&registration);
        *registration.state.lock() = ModuleState::Unloaded;
        self.registry.lock().remove(module_id);

        self.bus
            .publish(ModuleUnloaded {
                module_id: module_id.to_string(),
                name: registration.name.clone(),
                timestamp_ms: self.time.monotonic_millis(),
            })
            .ok();

        let registration = Arc::try_unwrap(registration).map_err(|_| {
            KernelError::ContractViolation(format!(
                "module {module_id} is still referenced elsewhere; cannot reclaim the instance"
            ))
        })?;
        Arc::try_unwrap(registration.module).map(PlMutex::into_inner).map_err(|_| {
            KernelError::ContractViolation(format!(
                "module {module_id} is still in use (a lifecycle call has not returned); cannot reclaim the instance"
            ))
        })
    }

    /// `unload` then `load` with the same instance (spec §4.10 `reload`).
    pub fn reload(&self, module_id: &str) -> Result<String> {
        let _guard = self.lock.lock();
        let module = self.unload_locked(module_id)?;
        self.load_locked(module)
    }

    /// Signals the application cancellation, then unloads every registered
    /// module in the reverse of its load order (spec §4.11 `stopAsync`).
    pub fn shutdown_all(&self) {
        let _guard = self.lock.lock();
        self.app_cancellation.cancel();

        let mut ordered: Vec<(u64, String)> = self
            .registry
            .lock()
            .values()
            .map(|reg| (reg.load_sequence, reg.module_id.clone()))
            .collect();
        ordered.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, id) in ordered {
            if let Err(err) = self.unload_locked(&id) {
                tracing::warn!(module = %id, error = %err, "module failed to unload during shutdownAll");
            }
        }
    }

    pub fn list_modules(&self) -> Vec<ModuleSummary> {
        let _guard = self.lock.lock();
        self.registry
            .lock()
            .values()
            .map(|reg| ModuleSummary {
                module_id: reg.module_id.clone(),
                name: reg.name.clone(),
                version: reg.version.clone(),
                category: reg.category,
                dependencies: reg.dependencies.clone(),
                state: *reg.state.lock(),
                loaded_at_ms: reg.loaded_at_ms,
            })
            .collect()
    }

    pub fn get_state(&self, module_id: &str) -> Option<ModuleState> {
        let _guard = self.lock.lock();
        self.registry.lock().get(module_id).map(|reg| *reg.state.lock())
    }

    /// Calls `getHealth()` on every registered module via the safe executor
    /// (spec §4.10 `healthCheckAll`).
    pub fn health_check_all(&self) -> Vec<HealthReport> {
        let _guard = self.lock.lock();
        let registrations: Vec<Arc<ModuleRegistration>> =
            self.registry.lock().values().cloned().collect();

        registrations
            .into_iter()
            .map(|reg| {
                let result = self.invoke(&reg, "getHealth", self.config.lifecycle_health_timeout, |module| {
                    Ok(module.get_health())
                });
                let (health, error) = match result {
                    OperationResult::Success(health) => (health, None),
                    OperationResult::Cancelled => (HealthStatus::Unknown, Some("cancelled".to_string())),
                    OperationResult::Failure { message, .. } => (HealthStatus::Unhealthy, Some(message)),
                };
                if let Some(message) = &error {
                    *reg.last_error.lock() = Some(message.clone());
                }
                HealthReport {
                    module_id: reg.module_id.clone(),
                    health,
                    state: *reg.state.lock(),
                    last_error: reg.last_error.lock().clone(),
                }
            })
            .collect()
    }

    /// Runs `f` on `registration`'s module through its worker pool, with a
    /// watchdog token open for the duration and the configured per-phase
    /// timeout (spec §4.7, §4.8).
    fn invoke<T, F>(
        &self,
        registration: &ModuleRegistration,
        op: &str,
        timeout: Duration,
        f: F,
    ) -> OperationResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Module) -> std::result::Result<T, String> + Send + 'static,
    {
        let module = registration.module.clone();
        let cancellation = registration.cancellation.clone();
        let _token = self.watchdog.monitor(registration.module_id.clone(), op.to_string());

        let pool_guard = registration.pool.lock();
        let pool = match pool_guard.as_ref() {
            Some(pool) => pool,
            None => {
                return OperationResult::Failure {
                    message: "worker pool already shut down".to_string(),
                    fatal: false,
                }
            }
        };

        let cancel_check = cancellation.clone();
        executor::run_with_timeout(pool, &cancellation, timeout, op, &registration.module_id, move || {
            if cancel_check.is_cancelled() {
                return Err(ModuleFault::Cancelled);
            }
            let mut guard = module.lock();
            f(&mut **guard).map_err(ModuleFault::Expected)
        })
    }

    /// Extracts a failure message from an `OperationResult`, recording it on
    /// the registration's `lastError` (spec §3 `ModuleRegistration.lastError`).
    fn fail_phase<T>(&self, registration: &ModuleRegistration, phase: &str, result: OperationResult<T>) -> Option<String> {
        match result {
            OperationResult::Success(_) => None,
            OperationResult::Cancelled => {
                let message = format!("{phase} was cancelled");
                *registration.last_error.lock() = Some(message.clone());
                Some(message)
            }
            OperationResult::Failure { message, .. } => {
                *registration.last_error.lock() = Some(message.clone());
                Some(message)
            }
        }
    }

    /// Reverses everything `load` set up short of removing the registry
    /// entry: scoped subscriptions, watchdog heartbeat tracking, memory
    /// registration, the tick schedule, and the worker pool (spec §4.10
    /// `load` failure cleanup and `unload` step 5).
    fn purge(&self, registration: &ModuleRegistration) {
        *registration.state.lock() = ModuleState::Failed;
        self.bus.unsubscribe_scope(&registration.module_id);
        self.watchdog.stop_monitoring(&registration.module_id);
        self.memory.unregister(&registration.module_id);
        registration.tick_handle.lock().take();
        if let Some(mut pool) = registration.pool.lock().take() {
            pool.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConfig;
    use crate::memory::MemoryConfig;
    use crate::time::SimulatedClock;
    use crate::watchdog::WatchdogConfig;

    struct StubModule {
        name: String,
        dependencies: Vec<String>,
        fail_initialize: bool,
        fail_start: bool,
        health: HealthStatus,
    }

    impl StubModule {
        fn new(name: &str) -> Self {
            StubModule {
                name: name.to_string(),
                dependencies: Vec::new(),
                fail_initialize: false,
                fail_start: false,
                health: HealthStatus::Healthy,
            }
        }

        fn depending_on(mut self, dep: &str) -> Self {
            self.dependencies.push(dep.to_string());
            self
        }

        fn failing_initialize(mut self) -> Self {
            self.fail_initialize = true;
            self
        }

        fn failing_start(mut self) -> Self {
            self.fail_start = true;
            self
        }
    }

    impl Module for StubModule {
        fn name(&self) -> &str {
            &self.name
        }

        fn version(&self) -> (u32, u32, u32) {
            (1, 0, 0)
        }

        fn dependencies(&self) -> Vec<String> {
            self.dependencies.clone()
        }

        fn initialize(&mut self, _ctx: &ModuleContext) -> std::result::Result<(), String> {
            if self.fail_initialize {
                Err("boom during initialize".to_string())
            } else {
                Ok(())
            }
        }

        fn start(&mut self) -> std::result::Result<(), String> {
            if self.fail_start {
                Err("boom during start".to_string())
            } else {
                Ok(())
            }
        }

        fn stop(&mut self) -> std::result::Result<(), String> {
            Ok(())
        }

        fn shutdown(&mut self) -> std::result::Result<(), String> {
            Ok(())
        }

        fn get_health(&self) -> HealthStatus {
            self.health
        }
    }

    fn make_manager() -> LifecycleManager {
        let clock = Arc::new(SimulatedClock::new());
        let bus = MessageBus::new(clock.clone(), BusConfig::default());
        let watchdog = Watchdog::new(bus.clone(), clock.clone(), WatchdogConfig::default());
        let memory = MemoryMonitor::new(
            bus.clone(),
            MemoryConfig {
                sample_interval: Duration::from_secs(10),
                per_module_soft_limit_mb: 500,
                global_warn_threshold_mb: 2048,
            },
        );
        LifecycleManager::new(bus, clock, None, watchdog, memory, KernelConfig::default(), Cancellation::new())
    }

    #[test]
    fn load_transitions_to_running_and_is_listed() {
        let manager = make_manager();
        let id = manager.load(Box::new(StubModule::new("gps"))).unwrap();
        assert_eq!(manager.get_state(&id), Some(ModuleState::Running));
        let summaries = manager.list_modules();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "gps");
    }

    #[test]
    fn loading_the_same_module_twice_is_rejected() {
        let manager = make_manager();
        manager.load(Box::new(StubModule::new("gps"))).unwrap();
        let err = manager.load(Box::new(StubModule::new("gps"))).unwrap_err();
        assert!(matches!(err, KernelError::AlreadyLoaded { .. }));
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let manager = make_manager();
        let err = manager
            .load(Box::new(StubModule::new("nav").depending_on("gps")))
            .unwrap_err();
        assert!(matches!(err, KernelError::MissingDependencies { .. }));
    }

    #[test]
    fn a_dependency_must_already_be_running() {
        let manager = make_manager();
        manager.load(Box::new(StubModule::new("gps"))).unwrap();
        let id = manager
            .load(Box::new(StubModule::new("nav").depending_on("gps")))
            .unwrap();
        assert_eq!(manager.get_state(&id), Some(ModuleState::Running));
    }

    #[test]
    fn failed_initialize_leaves_the_module_visible_in_failed_state() {
        let manager = make_manager();
        let err = manager
            .load(Box::new(StubModule::new("gps").failing_initialize()))
            .unwrap_err();
        assert!(matches!(err, KernelError::LifecycleFailed { ref phase, .. } if phase.as_str() == "initialize"));
        let summaries = manager.list_modules();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].state, ModuleState::Failed);
    }

    #[test]
    fn failed_start_is_reported_as_such() {
        let manager = make_manager();
        let err = manager
            .load(Box::new(StubModule::new("gps").failing_start()))
            .unwrap_err();
        assert!(matches!(err, KernelError::LifecycleFailed { ref phase, .. } if phase.as_str() == "start"));
    }

    #[test]
    fn unload_is_refused_while_a_dependent_is_running() {
        let manager = make_manager();
        manager.load(Box::new(StubModule::new("gps"))).unwrap();
        manager
            .load(Box::new(StubModule::new("nav").depending_on("gps")))
            .unwrap();
        let gps_id = module_id("gps", "1.0.0");
        let err = manager.unload(&gps_id).unwrap_err();
        assert!(matches!(err, KernelError::HasDependents { .. }));
    }

    #[test]
    fn unload_removes_the_module_from_the_registry() {
        let manager = make_manager();
        let id = manager.load(Box::new(StubModule::new("gps"))).unwrap();
        manager.unload(&id).unwrap();
        assert_eq!(manager.get_state(&id), None);
    }

    #[test]
    fn reload_brings_the_module_back_up_under_the_same_id() {
        let manager = make_manager();
        let id = manager.load(Box::new(StubModule::new("gps"))).unwrap();
        let reloaded = manager.reload(&id).unwrap();
        assert_eq!(reloaded, id);
        assert_eq!(manager.get_state(&id), Some(ModuleState::Running));
    }

    #[test]
    fn health_check_all_reports_each_modules_self_reported_health() {
        let manager = make_manager();
        manager.load(Box::new(StubModule::new("gps"))).unwrap();
        let reports = manager.health_check_all();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].health, HealthStatus::Healthy);
    }

    #[test]
    fn shutdown_all_unloads_every_module() {
        let manager = make_manager();
        manager.load(Box::new(StubModule::new("gps"))).unwrap();
        manager
            .load(Box::new(StubModule::new("nav").depending_on("gps")))
            .unwrap();
        manager.shutdown_all();
        assert!(manager.list_modules().is_empty());
    }
}
