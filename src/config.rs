//! Configuration (spec §6): a read-only key/value surface external hosts
//! provide, resolved here into the strongly-typed settings every component
//! actually needs.
//!
//! **[EXPANDED]** grounded on `spark-core::configuration`'s layered
//! resolution idea, scoped down to the read-only subset this crate needs: a
//! small trait implementers adapt to whatever config system they already
//! have, plus a `HashMap`-backed [`StaticConfig`] for tests and minimal
//! hosts (in the style of `spark-core::test_stubs`).

use std::collections::HashMap;
use std::time::Duration;

/// A read-only configuration source. Keys are the dotted names in spec §6
/// (`"Bus.MaxLastMessages"`, `"Watchdog.HangThreshold"`, ...).
pub trait ConfigSource: Send + Sync {
    fn get_bool(&self, key: &str) -> Option<bool>;
    fn get_u64(&self, key: &str) -> Option<u64>;
    fn get_f64(&self, key: &str) -> Option<f64>;
    fn get_duration(&self, key: &str) -> Option<Duration>;
    fn get_str(&self, key: &str) -> Option<String>;
}

/// A fixed, in-memory [`ConfigSource`]. Suitable for tests and hosts that
/// don't need live reconfiguration.
#[derive(Clone, Debug, Default)]
pub struct StaticConfig {
    bools: HashMap<String, bool>,
    u64s: HashMap<String, u64>,
    f64s: HashMap<String, f64>,
    durations: HashMap<String, Duration>,
    strings: HashMap<String, String>,
}

impl StaticConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.bools.insert(key.into(), value);
        self
    }

    pub fn with_u64(mut self, key: impl Into<String>, value: u64) -> Self {
        self.u64s.insert(key.into(), value);
        self
    }

    pub fn with_f64(mut self, key: impl Into<String>, value: f64) -> Self {
        self.f64s.insert(key.into(), value);
        self
    }

    pub fn with_duration(mut self, key: impl Into<String>, value: Duration) -> Self {
        self.durations.insert(key.into(), value);
        self
    }

    pub fn with_str(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.strings.insert(key.into(), value.into());
        self
    }
}

impl ConfigSource for StaticConfig {
    fn get_bool(&self, key: &str) -> Option<bool> {
        self.bools.get(key).copied()
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.u64s.get(key).copied()
    }

    fn get_f64(&self, key: &str) -> Option<f64> {
        self.f64s.get(key).copied()
    }

    fn get_duration(&self, key: &str) -> Option<Duration> {
        self.durations.get(key).copied()
    }

    fn get_str(&self, key: &str) -> Option<String> {
        self.strings.get(key).cloned()
    }
}

/// The fully resolved settings the kernel was built with: every key from
/// spec §6, with its documented default substituted wherever `source`
/// didn't provide one.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    pub use_scheduler: bool,
    pub scheduler_base_rate_hz: f64,
    pub module_directory: Option<String>,
    pub bus_max_last_messages: u64,
    pub bus_last_message_ttl: Duration,
    pub bus_max_failures_before_removal: u64,
    pub watchdog_check_interval: Duration,
    pub watchdog_hang_threshold: Duration,
    pub memory_check_interval: Duration,
    pub memory_per_module_soft_limit_mb: u64,
    pub memory_global_warn_threshold_mb: u64,
    pub lifecycle_init_timeout: Duration,
    pub lifecycle_start_timeout: Duration,
    pub lifecycle_stop_timeout: Duration,
    pub lifecycle_shutdown_timeout: Duration,
    pub lifecycle_health_timeout: Duration,
}

impl KernelConfig {
    pub fn resolve(source: &dyn ConfigSource) -> Self {
        KernelConfig {
            use_scheduler: source.get_bool("Core.UseScheduler").unwrap_or(true),
            scheduler_base_rate_hz: source.get_f64("Core.SchedulerBaseRateHz").unwrap_or(100.0),
            module_directory: source.get_str("Core.ModuleDirectory"),
            bus_max_last_messages: source.get_u64("Bus.MaxLastMessages").unwrap_or(100),
            bus_last_message_ttl: source
                .get_duration("Bus.LastMessageTtl")
                .unwrap_or(Duration::from_secs(3600)),
            bus_max_failures_before_removal: source
                .get_u64("Bus.MaxFailuresBeforeRemoval")
                .unwrap_or(10),
            watchdog_check_interval: source
                .get_duration("Watchdog.CheckInterval")
                .unwrap_or(Duration::from_secs(5)),
            watchdog_hang_threshold: source
                .get_duration("Watchdog.HangThreshold")
                .unwrap_or(Duration::from_secs(60)),
            memory_check_interval: source
                .get_duration("Memory.CheckInterval")
                .unwrap_or(Duration::from_secs(10)),
            memory_per_module_soft_limit_mb: source
                .get_u64("Memory.PerModuleSoftLimitMB")
                .unwrap_or(500),
            memory_global_warn_threshold_mb: source
                .get_u64("Memory.GlobalWarnThresholdMB")
                .unwrap_or(2048),
            lifecycle_init_timeout: source
                .get_duration("Lifecycle.InitTimeout")
                .unwrap_or(Duration::from_secs(30)),
            lifecycle_start_timeout: source
                .get_duration("Lifecycle.StartTimeout")
                .unwrap_or(Duration::from_secs(30)),
            lifecycle_stop_timeout: source
                .get_duration("Lifecycle.StopTimeout")
                .unwrap_or(Duration::from_secs(10)),
            lifecycle_shutdown_timeout: source
                .get_duration("Lifecycle.ShutdownTimeout")
                .unwrap_or(Duration::from_secs(10)),
            lifecycle_health_timeout: source
                .get_duration("Lifecycle.HealthTimeout")
                .unwrap_or(Duration::from_secs(5)),
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig::resolve(&StaticConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_keys_fall_back_to_documented_defaults() {
        let config = KernelConfig::resolve(&StaticConfig::new());
        assert_eq!(config.scheduler_base_rate_hz, 100.0);
        assert_eq!(config.bus_max_last_messages, 100);
        assert_eq!(config.watchdog_hang_threshold, Duration::from_secs(60));
        assert_eq!(config.lifecycle_init_timeout, Duration::from_secs(30));
    }

    #[test]
    fn explicit_values_override_defaults() {
        let source = StaticConfig::new()
            .with_f64("Core.SchedulerBaseRateHz", 50.0)
            .with_bool("Core.UseScheduler", false);
        let config = KernelConfig::resolve(&source);
        assert_eq!(config.scheduler_base_rate_hz, 50.0);
        assert!(!config.use_scheduler);
    }
}
