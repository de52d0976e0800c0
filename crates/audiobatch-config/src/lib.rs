//! Configuration for audiobatch
//!
//! Values are layered with precedence CLI > config file > built-in defaults. The config file
//! is `.audiobatch/config.toml`, found by walking up from the working directory, or named
//! explicitly with `--config`. Every effective value remembers which layer it came from so
//! `audiobatch config` can explain itself.

mod discovery;
pub mod model;
mod sources;
mod validation;

use std::collections::HashMap;

pub use discovery::{CONFIG_DIR, CONFIG_FILE};
pub use model::{
    BatchConfig, CliArgs, ConfigSource, MonitorSettings, OrchestratorConfig, PhaseSettings,
};

/// Effective, validated configuration plus source attribution
#[derive(Debug, Clone)]
pub struct Config {
    pub batch: BatchConfig,
    pub source_attribution: HashMap<String, ConfigSource>,
}

impl Config {
    #[must_use]
    pub fn batch_config(&self) -> &BatchConfig {
        &self.batch
    }

    #[must_use]
    pub fn into_batch_config(self) -> BatchConfig {
        self.batch
    }

    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        self.batch.orchestrator_config()
    }
}
