use std::time::Instant;

use sysinfo::{MINIMUM_CPU_UPDATE_INTERVAL, System};

/// Source of system-wide CPU utilization samples, in percent
pub trait CpuSampler: Send + 'static {
    /// `None` when no meaningful reading is available yet
    fn sample(&mut self) -> Option<f32>;
}

impl CpuSampler for Box<dyn CpuSampler> {
    fn sample(&mut self) -> Option<f32> {
        (**self).sample()
    }
}

/// Samples global CPU usage through `sysinfo`
pub struct SysinfoSampler {
    system: System,
    last_refresh: Instant,
}

impl SysinfoSampler {
    #[must_use]
    pub fn new() -> Self {
        let mut system = System::new();
        // Usage is computed between two refreshes; prime the first one
        system.refresh_cpu_usage();
        Self {
            system,
            last_refresh: Instant::now(),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SysinfoSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoSampler")
            .field("last_refresh", &self.last_refresh)
            .finish_non_exhaustive()
    }
}

impl CpuSampler for SysinfoSampler {
    fn sample(&mut self) -> Option<f32> {
        if self.last_refresh.elapsed() < MINIMUM_CPU_UPDATE_INTERVAL {
            return None;
        }
        self.system.refresh_cpu_usage();
        self.last_refresh = Instant::now();
        Some(self.system.global_cpu_usage())
    }
}
