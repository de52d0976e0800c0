//! CPU pressure monitoring for batch admission control
//!
//! [`ResourceMonitor`] samples system CPU utilization on a background task and exposes a
//! [`ThrottleSignal`] that the scheduler consults before admitting new work. The signal is
//! advisory: nothing already running is paused.

mod hysteresis;
mod sampler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub use hysteresis::{Hysteresis, Transition};
pub use sampler::{CpuSampler, SysinfoSampler};

pub const DEFAULT_THRESHOLD: f32 = 85.0;
pub const DEFAULT_RECOVERY_MARGIN: f32 = 10.0;
pub const DEFAULT_RECOVERY_SAMPLES: u32 = 3;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorConfig {
    /// Percentage above which the signal is raised
    pub threshold: f32,
    /// Percentage the load must stay below before the signal clears
    pub recovery_threshold: f32,
    /// Consecutive samples below `recovery_threshold` needed to clear
    pub recovery_samples: u32,
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            recovery_threshold: DEFAULT_THRESHOLD - DEFAULT_RECOVERY_MARGIN,
            recovery_samples: DEFAULT_RECOVERY_SAMPLES,
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// Shared throttle flag; one writer (the monitor), any number of readers
#[derive(Debug, Clone, Default)]
pub struct ThrottleSignal(Arc<AtomicBool>);

impl ThrottleSignal {
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, throttled: bool) {
        self.0.store(throttled, Ordering::Release);
    }
}

/// Running CPU statistics over every sample taken
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuStats {
    pub samples: u64,
    sum: f64,
    pub peak: f32,
}

impl CpuStats {
    pub fn record(&mut self, cpu: f32) {
        self.samples += 1;
        self.sum += f64::from(cpu);
        if cpu > self.peak {
            self.peak = cpu;
        }
    }

    /// Mean utilization, or `None` before the first sample
    #[must_use]
    pub fn average(&self) -> Option<f32> {
        (self.samples > 0).then(|| (self.sum / self.samples as f64) as f32)
    }

    #[must_use]
    pub fn peak(&self) -> Option<f32> {
        (self.samples > 0).then_some(self.peak)
    }
}

/// Background CPU sampler driving a [`ThrottleSignal`].
///
/// Must be started inside a tokio runtime. [`stop`](Self::stop) ends the loop and waits for
/// it; dropping a running monitor aborts the task instead.
#[derive(Debug)]
pub struct ResourceMonitor {
    signal: ThrottleSignal,
    stats: Arc<Mutex<CpuStats>>,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ResourceMonitor {
    pub fn start<S: CpuSampler>(config: MonitorConfig, sampler: S) -> Self {
        let signal = ThrottleSignal::default();
        let stats = Arc::new(Mutex::new(CpuStats::default()));
        let (stop_tx, stop_rx) = watch::channel(false);

        tracing::debug!(
            threshold = config.threshold,
            recovery_threshold = config.recovery_threshold,
            recovery_samples = config.recovery_samples,
            interval_ms = config.interval.as_millis() as u64,
            "Starting resource monitor"
        );
        let task = tokio::spawn(sample_loop(
            config,
            sampler,
            signal.clone(),
            Arc::clone(&stats),
            stop_rx,
        ));

        Self {
            signal,
            stats,
            stop_tx,
            task: Some(task),
        }
    }

    /// Monitor with the default sysinfo-backed sampler
    pub fn start_system(config: MonitorConfig) -> Self {
        Self::start(config, SysinfoSampler::new())
    }

    #[must_use]
    pub fn signal(&self) -> ThrottleSignal {
        self.signal.clone()
    }

    #[must_use]
    pub fn is_throttled(&self) -> bool {
        self.signal.is_throttled()
    }

    #[must_use]
    pub fn stats(&self) -> CpuStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop sampling, wait for the loop to exit, and return the final statistics
    pub async fn stop(mut self) -> CpuStats {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && !e.is_cancelled()
        {
            tracing::warn!(error = %e, "Resource monitor task ended abnormally");
        }
        self.signal.set(false);
        self.stats()
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn sample_loop<S: CpuSampler>(
    config: MonitorConfig,
    mut sampler: S,
    signal: ThrottleSignal,
    stats: Arc<Mutex<CpuStats>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut hysteresis = Hysteresis::new(config);
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(cpu) = sampler.sample() else {
                    continue;
                };
                stats.lock().unwrap_or_else(PoisonError::into_inner).record(cpu);

                match hysteresis.observe(cpu) {
                    Some(Transition::Throttled) => {
                        signal.set(true);
                        tracing::warn!(cpu, threshold = config.threshold, "CPU pressure high; throttling admission");
                    }
                    Some(Transition::Recovered) => {
                        signal.set(false);
                        tracing::info!(cpu, "CPU pressure recovered; resuming admission");
                    }
                    None => {
                        tracing::trace!(cpu, throttled = hysteresis.is_throttled(), "CPU sample");
                    }
                }
            }
        }
    }
    tracing::debug!("Resource monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Instant;

    /// Replays a fixed script, then repeats the last value
    struct Scripted {
        values: VecDeque<f32>,
        last: f32,
    }

    impl Scripted {
        fn new(values: &[f32]) -> Self {
            Self {
                values: values.iter().copied().collect(),
                last: 0.0,
            }
        }
    }

    impl CpuSampler for Scripted {
        fn sample(&mut self) -> Option<f32> {
            if let Some(v) = self.values.pop_front() {
                self.last = v;
            }
            Some(self.last)
        }
    }

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_millis(5),
            ..MonitorConfig::default()
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        false
    }

    #[test]
    fn test_stats_average_and_peak() {
        let mut stats = CpuStats::default();
        assert_eq!(stats.average(), None);
        assert_eq!(stats.peak(), None);
        for cpu in [10.0, 50.0, 30.0] {
            stats.record(cpu);
        }
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.average(), Some(30.0));
        assert_eq!(stats.peak(), Some(50.0));
    }

    #[tokio::test]
    async fn test_signal_raises_under_load_and_clears_after_recovery() {
        let sampler = Scripted::new(&[
            20.0, 95.0, 95.0, 95.0, 95.0, 95.0, 95.0, 95.0, 95.0, 95.0, 95.0, 60.0, 60.0, 60.0, 10.0,
        ]);
        let monitor = ResourceMonitor::start(fast_config(), sampler);
        let signal = monitor.signal();

        // The script ends well below the recovery threshold, so it must end clear after
        // having been raised
        let mut seen_throttled = false;
        let cleared = wait_until(|| {
            seen_throttled |= signal.is_throttled();
            seen_throttled && !signal.is_throttled()
        })
        .await;
        assert!(seen_throttled, "signal never raised");
        assert!(cleared, "signal never cleared");

        let stats = monitor.stop().await;
        assert!(stats.samples >= 15);
        assert_eq!(stats.peak(), Some(95.0));
    }

    #[tokio::test]
    async fn test_sustained_load_keeps_signal_raised() {
        let monitor = ResourceMonitor::start(fast_config(), Scripted::new(&[99.0]));
        assert!(wait_until(|| monitor.is_throttled()).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(monitor.is_throttled());
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_prompt_and_clears_signal() {
        let config = MonitorConfig {
            interval: Duration::from_secs(3600),
            ..MonitorConfig::default()
        };
        let monitor = ResourceMonitor::start(config, Scripted::new(&[99.0]));
        let signal = monitor.signal();
        // First tick fires immediately
        assert!(wait_until(|| signal.is_throttled()).await);

        let started = Instant::now();
        let stats = monitor.stop().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(stats.samples, 1);
        assert!(!signal.is_throttled());
    }

    #[tokio::test]
    async fn test_missing_samples_are_skipped() {
        struct Silent;
        impl CpuSampler for Silent {
            fn sample(&mut self) -> Option<f32> {
                None
            }
        }

        let monitor = ResourceMonitor::start(fast_config(), Silent);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!monitor.is_throttled());
        let stats = monitor.stop().await;
        assert_eq!(stats.samples, 0);
        assert_eq!(stats.average(), None);
    }

    #[tokio::test]
    async fn test_drop_aborts_sampling_task() {
        let monitor = ResourceMonitor::start(fast_config(), Scripted::new(&[10.0]));
        let stats = Arc::clone(&monitor.stats);
        drop(monitor);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_drop = stats.lock().unwrap().samples;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(stats.lock().unwrap().samples, after_drop);
    }
}
