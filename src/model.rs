//! Small shared vocabulary types used across the resolver, lifecycle
//! manager, and kernel control surface (spec §3).

use std::fmt;

/// Advisory grouping used by the dependency resolver as a secondary sort key
/// and by the lifecycle manager's shutdown ordering (spec §4.10).
///
/// **[EXPANDED]** `Ord`/`PartialOrd` are derived in declaration order,
/// mirroring how `spark-core::kernel` orders its own small closed enums, so
/// "category ascending" in the resolver is a direct comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModuleCategory {
    Io,
    DataProcessing,
    Navigation,
    Control,
    Visualization,
    Logging,
    Integration,
    Monitoring,
}

impl fmt::Display for ModuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleCategory::Io => "io",
            ModuleCategory::DataProcessing => "data-processing",
            ModuleCategory::Navigation => "navigation",
            ModuleCategory::Control => "control",
            ModuleCategory::Visualization => "visualization",
            ModuleCategory::Logging => "logging",
            ModuleCategory::Integration => "integration",
            ModuleCategory::Monitoring => "monitoring",
        };
        f.write_str(s)
    }
}

/// Result of a `healthCheckAll()` call against a single module (spec §4.10).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Normalizes a module name/version pair into the canonical `moduleId`
/// (spec §4.10 step 1: `fmt("{name}:{version}")`, whitespace normalized).
pub fn module_id(name: &str, version: &str) -> String {
    format!("{}:{}", name.trim(), version.trim())
}

/// Case-insensitive name comparison, used throughout the resolver (spec
/// §4.5: "all names are case-insensitive").
pub fn names_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

pub(crate) fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
