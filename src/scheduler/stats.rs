//! Scheduler-wide statistics snapshot (spec §4.4 `statistics()`).

use super::method::MethodStats;

#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerStats {
    pub global_tick: i64,
    pub base_rate_hz: f64,
    pub running: bool,
    pub methods: Vec<MethodStats>,
}
