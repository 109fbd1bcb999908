//! Lifecycle event payloads published on the bus (spec §6 "Events").

use crate::bus::Message;

/// Published once by the Application Kernel after every configured module
/// has been given a chance to load and the scheduler (if configured) has
/// started (spec §4.11).
#[derive(Clone, Debug, PartialEq)]
pub struct ApplicationStarted {
    pub timestamp_ms: i64,
}

impl Message for ApplicationStarted {}

/// Published once, before `shutdownAll` begins.
#[derive(Clone, Debug, PartialEq)]
pub struct ApplicationStopping {
    pub timestamp_ms: i64,
}

impl Message for ApplicationStopping {}

#[derive(Clone, Debug, PartialEq)]
pub struct ModuleLoaded {
    pub module_id: String,
    pub name: String,
    pub version: String,
    pub timestamp_ms: i64,
}

impl Message for ModuleLoaded {}

#[derive(Clone, Debug, PartialEq)]
pub struct ModuleUnloaded {
    pub module_id: String,
    pub name: String,
    pub timestamp_ms: i64,
}

impl Message for ModuleUnloaded {}

/// Raised by the watchdog when an open operation's age exceeds
/// `hangThreshold` and has not already been reported (spec §4.8).
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleHangDetected {
    pub module_id: String,
    pub operation_name: String,
    pub duration_ms: u64,
    pub thread_name: String,
}

impl Message for ModuleHangDetected {}

/// Raised by the memory monitor when a module's heuristically attributed
/// share of process RSS crosses `perModuleSoftLimitMB` (spec §4.9).
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleMemoryExceeded {
    pub module_id: String,
    pub estimated_mb: u64,
    pub limit_mb: u64,
    pub warning_count: u32,
}

impl Message for ModuleMemoryExceeded {}
