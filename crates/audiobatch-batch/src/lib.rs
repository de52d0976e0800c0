//! Batch scheduling of per-file orchestrators
//!
//! [`BatchScheduler`] discovers input files, skips ones a previous run already finished when
//! resuming, and launches the rest through a [`FileLauncher`] (by default a child
//! `audiobatch run` process per file) under a worker bound and CPU-aware admission. Each run
//! appends a [`BatchRunRecord`](audiobatch_state::BatchRunRecord) to the state document.

mod discovery;
mod launcher;
mod scheduler;
mod summary;

pub use discovery::{InputFile, discover_inputs};
pub use launcher::{DEFAULT_FILE_TIMEOUT, FileLauncher, ProcessLauncher};
pub use scheduler::{BatchScheduler, INTERRUPTED, SKIP_ALREADY_COMPLETED, SKIP_DRY_RUN};
pub use summary::{BatchSummary, aggregate_status};
