//! audiobatch - resumable, resource-aware batch orchestration for audiobook pipelines
//!
//! A source document becomes an audiobook by passing through five external phase programs:
//! validation, extraction, segmentation, synthesis and enhancement. audiobatch drives many
//! files through those phases concurrently and resumably:
//!
//! - `audiobatch run <file>` walks one file through the enabled phases, skipping phases a
//!   previous run already completed.
//! - `audiobatch batch` runs every input in a directory, one isolated `run` child per file,
//!   under a worker bound and CPU-aware admission control.
//! - `audiobatch status` and `audiobatch config` report on the shared state document and the
//!   effective configuration.
//!
//! All progress lives in one JSON state document shared with the phase programs. Every write
//! goes through [`PipelineStateStore::transact`], which serializes writers with a
//! cross-process lease and replaces the file atomically.
//!
//! # Library use
//!
//! ```no_run
//! use audiobatch::{BatchConfig, BatchScheduler};
//!
//! # async fn demo() -> Result<(), audiobatch::AudiobatchError> {
//! let config = BatchConfig {
//!     input_dir: "books".into(),
//!     ..BatchConfig::default()
//! };
//! let summary = BatchScheduler::new(config)?.run().await?;
//! println!("{}", summary.render_table());
//! # Ok(())
//! # }
//! ```

pub mod cli;

pub use audiobatch_batch::{
    BatchScheduler, BatchSummary, FileLauncher, InputFile, ProcessLauncher, discover_inputs,
};
pub use audiobatch_config::{BatchConfig, CliArgs, Config, OrchestratorConfig, PhaseSettings};
pub use audiobatch_monitor::{CpuSampler, MonitorConfig, ResourceMonitor, ThrottleSignal};
pub use audiobatch_orchestrator::{FileOrchestrator, run_file};
pub use audiobatch_state::{
    BatchRunRecord, FileResult, PhaseFileRecord, PipelineState, PipelineStateStore,
};
pub use audiobatch_utils::{AudiobatchError, BatchStatus, ExitCode, FileStatus, PhaseId};
