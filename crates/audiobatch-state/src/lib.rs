//! Pipeline state document for audiobatch
//!
//! One JSON document records what every phase has done for every file plus a history of
//! batch runs. [`PipelineStateStore`] is its only writer inside this workspace.

pub mod document;
pub mod records;
pub mod store;

pub use document::{BATCH_RUNS_KEY, PIPELINE_SECTION, PipelineState};
pub use records::{BatchCounts, BatchRunRecord, FileResult, PhaseFileRecord, Timestamps};
pub use store::PipelineStateStore;
