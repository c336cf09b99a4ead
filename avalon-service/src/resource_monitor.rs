use std::time::{
    Duration,
    Instant,
};

use sysinfo::System;

/// Caches CPU and memory usage, since sampling is relatively expensive; refreshed at most once
/// per `refresh_interval`, matching the "observes CPU and memory every ~60s" cadence of
/// `spec.md` §4.6 (grounded on the polling `Health` struct pattern of a production web server).
pub struct ResourceMonitor {
    system: System,
    last_refresh: Instant,
    refresh_interval: Duration,
}

impl ResourceMonitor {
    pub fn new(refresh_interval: Duration) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system,
            last_refresh: Instant::now(),
            refresh_interval,
        }
    }

    /// Fraction of CPU in use, 0.0 to 1.0.
    pub fn cpu_usage(&mut self) -> f32 {
        self.refresh_if_stale();
        self.system.global_cpu_usage() / 100.0
    }

    /// Fraction of memory in use, 0.0 to 1.0.
    pub fn memory_usage(&mut self) -> f32 {
        self.refresh_if_stale();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        self.system.used_memory() as f32 / total as f32
    }

    fn refresh_if_stale(&mut self) {
        if self.last_refresh.elapsed() < self.refresh_interval {
            return;
        }
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.last_refresh = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_fractions_are_bounded() {
        let mut monitor = ResourceMonitor::new(Duration::from_secs(60));
        let cpu = monitor.cpu_usage();
        let mem = monitor.memory_usage();
        assert!((0.0..=1.5).contains(&cpu), "{cpu}");
        assert!((0.0..=1.0).contains(&mem), "{mem}");
    }
}
