//! Running pipeline phases as child processes
//!
//! A phase is an external executable. [`PhaseRunner::resolve`] finds it on disk (or takes an
//! explicit command from configuration) and [`PhaseRunner::invoke`] runs it with the standard
//! argument contract, enforcing the timeout and retrying failures with capped exponential
//! backoff. Invocation never returns an error; every failure is a [`PhaseOutcome`].

mod chunk_log;
mod invoke;
mod resolve;

use std::sync::Arc;

use audiobatch_config::PhaseSettings;
use audiobatch_runner::{NativeRunner, ProcessRunner};

pub use chunk_log::chunk_log_path;
pub use invoke::{InvokeRequest, PhaseOutcome, PhaseResult, TAIL_BYTES, retry_delay};
pub use resolve::{PhaseTarget, TargetKind};

pub const ENV_FILE_ID: &str = "AUDIOBATCH_FILE_ID";
pub const ENV_PHASE: &str = "AUDIOBATCH_PHASE";
pub const ENV_STATE: &str = "AUDIOBATCH_STATE";

/// Resolves and invokes phase executables under one set of [`PhaseSettings`]
#[derive(Clone)]
pub struct PhaseRunner {
    settings: PhaseSettings,
    runner: Arc<dyn ProcessRunner>,
}

impl PhaseRunner {
    #[must_use]
    pub fn new(settings: PhaseSettings) -> Self {
        Self::with_runner(settings, Arc::new(NativeRunner))
    }

    #[must_use]
    pub fn with_runner(settings: PhaseSettings, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { settings, runner }
    }

    #[must_use]
    pub fn settings(&self) -> &PhaseSettings {
        &self.settings
    }
}

impl std::fmt::Debug for PhaseRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseRunner")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
