use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use audiobatch_utils::PhaseId;

pub const DEFAULT_STATE_PATH: &str = "pipeline.json";
pub const DEFAULT_INPUT_DIR: &str = "input";
pub const DEFAULT_PHASES_ROOT: &str = "phases";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_EXTENSIONS: [&str; 5] = ["pdf", "epub", "txt", "md", "docx"];
pub const DEFAULT_MAX_WORKERS: usize = 2;
pub const DEFAULT_CPU_THRESHOLD: f32 = 85.0;
pub const DEFAULT_THROTTLE_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_THROTTLE_MAX_CHECKS: u32 = 60;
pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(1800);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_CHUNK_ABORT_RATIO: f64 = 0.5;
pub const DEFAULT_INTERPRETER: &str = "python3";
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RECOVERY_SAMPLES: u32 = 3;
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(30);
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Where an effective configuration value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    ConfigFile(PathBuf),
    Default,
}

/// CLI overrides; `None` means "not given on the command line"
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub input_dir: Option<PathBuf>,
    pub state_path: Option<PathBuf>,
    pub max_workers: Option<usize>,
    pub cpu_threshold: Option<f32>,
    pub throttle_delay_secs: Option<f64>,
    pub resume: Option<bool>,
    pub dry_run: Option<bool>,
    pub batch_size: Option<usize>,
    pub phases: Option<Vec<PhaseId>>,
    pub phase_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub phases_root: Option<PathBuf>,
    pub orchestrator: Option<PathBuf>,
}

/// How phases are located, invoked and retried
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSettings {
    /// Ordered phase list for this run
    pub enabled: Vec<PhaseId>,
    pub root: PathBuf,
    pub timeout: Duration,
    /// Total attempts per invocation, including the first
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Concurrent synthesis chunks per file
    pub chunk_workers: usize,
    /// Abandon remaining chunks once failures exceed this share of all chunks
    pub chunk_abort_ratio: f64,
    /// Fallback interpreter for script-only phases
    pub interpreter: String,
    pub log_dir: PathBuf,
    /// Explicit argv prefix per phase, bypassing discovery
    pub commands: BTreeMap<PhaseId, Vec<String>>,
    pub kill_grace: Duration,
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self {
            enabled: PhaseId::ALL.to_vec(),
            root: PathBuf::from(DEFAULT_PHASES_ROOT),
            timeout: DEFAULT_PHASE_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            chunk_workers: 1,
            chunk_abort_ratio: DEFAULT_CHUNK_ABORT_RATIO,
            interpreter: DEFAULT_INTERPRETER.to_string(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            commands: BTreeMap::new(),
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSettings {
    pub sample_interval: Duration,
    /// Throttle clears only after `recovery_samples` consecutive samples below this
    pub recovery_threshold: f32,
    pub recovery_samples: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            recovery_threshold: DEFAULT_CPU_THRESHOLD - 10.0,
            recovery_samples: DEFAULT_RECOVERY_SAMPLES,
        }
    }
}

/// Validated, immutable settings for one batch run
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub input_dir: PathBuf,
    pub state_path: Utf8PathBuf,
    pub max_workers: usize,
    /// CPU percentage above which admission is throttled
    pub cpu_threshold: f32,
    pub throttle_delay: Duration,
    /// Admission re-checks before a file is admitted despite pressure
    pub throttle_max_checks: u32,
    pub resume: bool,
    pub dry_run: bool,
    pub batch_size: Option<usize>,
    /// Lowercase extension allow-list for discovery
    pub extensions: Vec<String>,
    /// Program launched per file; `None` means the current executable
    pub orchestrator: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub phases: PhaseSettings,
    pub monitor: MonitorSettings,
    pub lock_wait: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from(DEFAULT_INPUT_DIR),
            state_path: Utf8PathBuf::from(DEFAULT_STATE_PATH),
            max_workers: DEFAULT_MAX_WORKERS,
            cpu_threshold: DEFAULT_CPU_THRESHOLD,
            throttle_delay: DEFAULT_THROTTLE_DELAY,
            throttle_max_checks: DEFAULT_THROTTLE_MAX_CHECKS,
            resume: true,
            dry_run: false,
            batch_size: None,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| (*s).to_string()).collect(),
            orchestrator: None,
            config_file: None,
            phases: PhaseSettings::default(),
            monitor: MonitorSettings::default(),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }
}

/// Settings for driving a single file through its phases
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub state_path: Utf8PathBuf,
    pub resume: bool,
    pub phases: PhaseSettings,
    pub lock_wait: Duration,
}

impl BatchConfig {
    /// The per-file view handed to each orchestrator
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            state_path: self.state_path.clone(),
            resume: self.resume,
            phases: self.phases.clone(),
            lock_wait: self.lock_wait,
        }
    }
}

/// `.audiobatch/config.toml` as written on disk
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TomlConfig {
    pub batch: Option<TomlBatch>,
    pub phases: Option<TomlPhases>,
    pub monitor: Option<TomlMonitor>,
    pub state: Option<TomlState>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TomlBatch {
    pub input_dir: Option<PathBuf>,
    pub state_path: Option<PathBuf>,
    pub max_workers: Option<usize>,
    pub cpu_threshold: Option<f32>,
    pub throttle_delay_secs: Option<f64>,
    pub throttle_max_checks: Option<u32>,
    pub resume: Option<bool>,
    pub batch_size: Option<usize>,
    pub extensions: Option<Vec<String>>,
    pub orchestrator: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TomlPhases {
    pub enabled: Option<Vec<String>>,
    pub root: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub chunk_workers: Option<usize>,
    pub chunk_abort_ratio: Option<f64>,
    pub interpreter: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub kill_grace_secs: Option<u64>,
    pub commands: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TomlMonitor {
    pub sample_interval_ms: Option<u64>,
    pub recovery_threshold: Option<f32>,
    pub recovery_samples: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TomlState {
    pub lock_wait_secs: Option<u64>,
}
