//! Drives one input file through the configured phases
//!
//! The orchestrator is a small state machine: `pending → running → {success, partial,
//! failed}`. Phases run strictly in order; the first failure stops the file. Progress is
//! committed to the pipeline state document after every completed phase and every finished
//! synthesis chunk, so a rerun with `resume` picks up from the last durable point.
//!
//! [`FileOrchestrator::run`] never returns an error. Every failure, including state-store
//! trouble, ends up in the returned [`FileResult`].

mod progress;
mod synthesis;

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::Instrument;

use audiobatch_config::OrchestratorConfig;
use audiobatch_phases::{InvokeRequest, PhaseRunner};
use audiobatch_state::{FileResult, PhaseFileRecord, PipelineStateStore};
use audiobatch_utils::logging::{
    file_span, log_phase_complete, log_phase_error, log_phase_start, phase_span,
};
use audiobatch_utils::{FileStatus, PhaseId, file_id_for};

/// Runs files through phases against one state document
#[derive(Debug, Clone)]
pub struct FileOrchestrator {
    config: OrchestratorConfig,
    phases: PhaseRunner,
    store: PipelineStateStore,
    /// Extra base for phase discovery: the directory holding the state document
    file_root: Option<PathBuf>,
}

impl FileOrchestrator {
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        let phases = PhaseRunner::new(config.phases.clone());
        Self::with_phase_runner(config, phases)
    }

    /// Use a caller-supplied phase runner (tests substitute the process layer this way)
    #[must_use]
    pub fn with_phase_runner(config: OrchestratorConfig, phases: PhaseRunner) -> Self {
        let store = PipelineStateStore::new(config.state_path.clone())
            .with_lock_wait(config.lock_wait)
            .with_holder(format!("audiobatch orchestrator (pid {})", std::process::id()));
        let file_root = config
            .state_path
            .parent()
            .filter(|p| !p.as_str().is_empty())
            .map(|p| p.as_std_path().to_path_buf());
        Self {
            config,
            phases,
            store,
            file_root,
        }
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Drive `file_path` through every configured phase
    pub async fn run(&self, file_path: &Path) -> FileResult {
        let file_id = file_id_for(file_path);
        self.run_file(&file_id, file_path)
            .instrument(file_span(&file_id))
            .await
    }

    async fn run_file(&self, file_id: &str, file_path: &Path) -> FileResult {
        let started = Instant::now();
        let mut errors = Vec::new();
        let enabled = &self.config.phases.enabled;

        let record = self.begin(file_id, &mut errors).await;
        let mut completed = record.phases_completed;
        tracing::info!(
            input = %file_path.display(),
            resume = self.config.resume,
            already_completed = completed.len(),
            "Processing file"
        );

        for &phase in enabled {
            if completed.contains(&phase) {
                tracing::debug!(phase = %phase, "Phase already completed; skipping");
                continue;
            }

            let outcome = if phase.is_chunked() {
                self.run_chunked(phase, file_id, file_path, &mut errors).await
            } else {
                self.run_phase(phase, file_id, file_path).await
            };

            match outcome {
                Ok(()) => {
                    completed.push(phase);
                    self.commit(file_id, &mut errors, move |record| {
                        record.mark_completed(phase);
                    })
                    .await;
                }
                Err(phase_errors) => {
                    errors.extend(phase_errors);
                    let skipped = enabled.iter().skip_while(|p| **p != phase).skip(1).count();
                    if skipped > 0 {
                        tracing::info!(phase = %phase, skipped, "Skipping remaining phases");
                    }
                    break;
                }
            }
        }

        let phases_completed: Vec<PhaseId> = enabled
            .iter()
            .copied()
            .filter(|p| completed.contains(p))
            .collect();
        let status = final_status(enabled, &phases_completed, errors.is_empty());
        let duration = started.elapsed();

        self.finish(file_id, status, &phases_completed, &mut errors, duration).await;

        if status == FileStatus::Success {
            tracing::info!(
                duration_ms = duration.as_millis() as u64,
                "File completed"
            );
        } else {
            tracing::warn!(
                status = status.as_str(),
                errors = errors.len(),
                "File did not complete"
            );
        }

        FileResult {
            status,
            phases_completed,
            errors,
            duration_secs: duration.as_secs_f64(),
            ..FileResult::new(file_id, file_path.display().to_string())
        }
    }

    fn request(&self, file_id: &str, file_path: &Path) -> InvokeRequest {
        InvokeRequest::new(file_id, self.config.state_path.as_std_path()).with_input(file_path)
    }

    /// A single, non-chunked phase invocation
    async fn run_phase(
        &self,
        phase: PhaseId,
        file_id: &str,
        file_path: &Path,
    ) -> Result<(), Vec<String>> {
        async {
            log_phase_start(file_id, phase.as_str());
            let started = Instant::now();

            let target = match self.phases.resolve(phase, self.file_root.as_deref()) {
                Ok(target) => target,
                Err(e) => {
                    let message = e.to_string();
                    let elapsed = started.elapsed().as_millis();
                    log_phase_error(file_id, phase.as_str(), &message, elapsed);
                    return Err(vec![message]);
                }
            };

            let result = self.phases.invoke(&target, &self.request(file_id, file_path)).await;
            match result.error_message() {
                None => {
                    log_phase_complete(file_id, phase.as_str(), result.duration.as_millis());
                    Ok(())
                }
                Some(message) => {
                    let elapsed = result.duration.as_millis();
                    log_phase_error(file_id, phase.as_str(), &message, elapsed);
                    Err(vec![message])
                }
            }
        }
        .instrument(phase_span(file_id, phase.as_str(), None))
        .await
    }
}

/// Drive `file_path` with a fresh orchestrator for `config`
pub async fn run_file(file_path: &Path, config: &OrchestratorConfig) -> FileResult {
    FileOrchestrator::new(config.clone()).run(file_path).await
}

/// `success` needs every configured phase and no recorded errors; `failed` means nothing
/// completed; anything in between is `partial`
fn final_status(enabled: &[PhaseId], completed: &[PhaseId], clean: bool) -> FileStatus {
    if completed.is_empty() {
        FileStatus::Failed
    } else if clean && enabled.iter().all(|p| completed.contains(p)) {
        FileStatus::Success
    } else {
        FileStatus::Partial
    }
}

/// Keep only what a fresh run should carry over from a previous record
fn restart_record(mut record: PhaseFileRecord) -> PhaseFileRecord {
    record.status = FileStatus::Running;
    record.errors.clear();
    record.timestamps.end = None;
    record.timestamps.duration = None;
    record
}
