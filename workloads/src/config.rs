use serde::Deserialize;
use std::time::Duration;

/// Timing of the per-tenant refresh cycle.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RefreshConfig {
    /// Period of the background refresh task.
    pub interval_secs: u64,
    /// Cached workloads younger than this are served without a fetch.
    pub freshness_secs: u64,
    /// Idle tenants past this threshold are logged as winding down.
    pub idle_warning_secs: u64,
    /// Idle tenants past this threshold with nothing in flight are evicted.
    pub idle_eviction_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            interval_secs: 60,
            freshness_secs: 60,
            idle_warning_secs: 60,
            idle_eviction_secs: 180,
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }

    pub fn idle_warning(&self) -> Duration {
        Duration::from_secs(self.idle_warning_secs)
    }

    pub fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }
}
