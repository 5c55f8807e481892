//! System snapshot - the only impure input of the timeout estimator
//!
//! Captured once per request by the caller and passed down by value.

use serde::{Deserialize, Serialize};
use std::path::Path;
use sysinfo::System;

/// Load, core count and cache presence at request time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// One-minute load average
    pub load_avg: f64,
    pub cpu_count: usize,
    /// A per-user Nix cache directory exists
    pub has_local_cache: bool,
    /// Nixmate has never written state on this machine
    pub first_run: bool,
}

impl Default for SystemSnapshot {
    /// Idle machine with a warm cache
    fn default() -> Self {
        Self {
            load_avg: 0.0,
            cpu_count: 1,
            has_local_cache: true,
            first_run: false,
        }
    }
}

impl SystemSnapshot {
    pub fn capture() -> Self {
        let load = System::load_average();
        let cache_dir = dirs::cache_dir().map(|d| d.join("nix"));
        let state_dir = crate::config::state_dir();

        Self {
            load_avg: load.one,
            cpu_count: num_cpus::get().max(1),
            has_local_cache: cache_dir.as_deref().map(Path::exists).unwrap_or(false),
            first_run: !state_dir.as_deref().map(Path::exists).unwrap_or(false),
        }
    }

    /// Load average above 80% of the cores
    pub fn is_under_load(&self) -> bool {
        self.load_avg > 0.8 * self.cpu_count.max(1) as f64
    }

    /// Downloads will start cold
    pub fn is_cold(&self) -> bool {
        !self.has_local_cache || self.first_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_threshold() {
        let mut snap = SystemSnapshot {
            load_avg: 3.0,
            cpu_count: 4,
            ..Default::default()
        };
        assert!(!snap.is_under_load());
        snap.load_avg = 3.3;
        assert!(snap.is_under_load());
    }

    #[test]
    fn test_cold_cache() {
        let snap = SystemSnapshot::default();
        assert!(!snap.is_cold());
        let first = SystemSnapshot {
            first_run: true,
            ..Default::default()
        };
        assert!(first.is_cold());
    }

    #[test]
    fn test_capture_reports_cores() {
        let snap = SystemSnapshot::capture();
        assert!(snap.cpu_count >= 1);
        assert!(snap.load_avg >= 0.0);
    }
}
