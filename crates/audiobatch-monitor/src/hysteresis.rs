use crate::MonitorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Throttled,
    Recovered,
}

/// Throttle state machine.
///
/// A sample above `threshold` raises the flag. Once raised, it clears only after
/// `recovery_samples` consecutive samples strictly below `recovery_threshold`; any sample at
/// or above it resets the count.
#[derive(Debug, Clone)]
pub struct Hysteresis {
    threshold: f32,
    recovery_threshold: f32,
    recovery_samples: u32,
    throttled: bool,
    calm_streak: u32,
}

impl Hysteresis {
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            threshold: config.threshold,
            recovery_threshold: config.recovery_threshold,
            recovery_samples: config.recovery_samples.max(1),
            throttled: false,
            calm_streak: 0,
        }
    }

    #[must_use]
    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    /// Feed one sample; returns the transition it caused, if any
    pub fn observe(&mut self, cpu: f32) -> Option<Transition> {
        if !self.throttled {
            if cpu > self.threshold {
                self.throttled = true;
                self.calm_streak = 0;
                return Some(Transition::Throttled);
            }
            return None;
        }

        if cpu < self.recovery_threshold {
            self.calm_streak += 1;
            if self.calm_streak >= self.recovery_samples {
                self.throttled = false;
                self.calm_streak = 0;
                return Some(Transition::Recovered);
            }
        } else {
            self.calm_streak = 0;
        }
        None
    }
}
