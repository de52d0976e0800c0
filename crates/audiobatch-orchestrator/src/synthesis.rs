use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use audiobatch_phases::PhaseResult;
use audiobatch_utils::logging::{log_phase_complete, log_phase_error, log_phase_start, phase_span};
use audiobatch_utils::{PhaseError, PhaseId};

use crate::FileOrchestrator;

/// Running tally for one fan-out
#[derive(Debug, Default)]
struct FanOut {
    succeeded: usize,
    failed: usize,
    errors: Vec<String>,
}

impl FanOut {
    fn should_abort(&self, total: usize, ratio: f64) -> bool {
        self.failed as f64 > ratio * total as f64
    }
}

impl FileOrchestrator {
    /// Fan a chunked phase out into one invocation per chunk.
    ///
    /// The chunk count comes from the segmentation record. Chunks already recorded as done
    /// are skipped. Each successful chunk is committed as it finishes. Once failures exceed
    /// `chunk_abort_ratio` of all chunks no further chunks are started. Any failed chunk fails
    /// the phase.
    pub(crate) async fn run_chunked(
        &self,
        phase: PhaseId,
        file_id: &str,
        file_path: &Path,
        errors: &mut Vec<String>,
    ) -> Result<(), Vec<String>> {
        log_phase_start(file_id, phase.as_str());
        let started = Instant::now();
        let fail = |message: String| {
            log_phase_error(file_id, phase.as_str(), &message, started.elapsed().as_millis());
            Err(vec![message])
        };

        let target = match self.phases.resolve(phase, self.file_root.as_deref()) {
            Ok(target) => target,
            Err(e) => return fail(e.to_string()),
        };

        let state = self.store.read_async().await;
        let total = match state.chunk_count(file_id) {
            Some(n) if n > 0 => n,
            _ => {
                return fail(
                    PhaseError::NoChunks {
                        file_id: file_id.to_string(),
                    }
                    .to_string(),
                );
            }
        };
        let Ok(total_u32) = u32::try_from(total) else {
            return fail(format!("{phase}: chunk count {total} is out of range"));
        };

        let done: BTreeSet<u32> = state
            .pipeline_record(file_id)
            .map(|r| r.chunks_completed.into_iter().filter(|c| *c < total_u32).collect())
            .unwrap_or_default();
        let pending: Vec<u32> = (0..total_u32).filter(|c| !done.contains(c)).collect();
        tracing::info!(
            phase = %phase,
            total,
            already_done = done.len(),
            pending = pending.len(),
            "Fanning out chunks"
        );

        let settings = self.phases.settings();
        let workers = settings.chunk_workers.max(1);
        let ratio = settings.chunk_abort_ratio;
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks: JoinSet<(u32, PhaseResult)> = JoinSet::new();
        let mut tally = FanOut {
            succeeded: done.len(),
            ..FanOut::default()
        };
        let mut abandoned = 0;

        for (position, &chunk) in pending.iter().enumerate() {
            // A slot frees only when a task finishes, so reap before admitting
            while semaphore.available_permits() == 0 {
                match tasks.join_next().await {
                    Some(joined) => self.record_chunk(file_id, joined, &mut tally, errors).await,
                    None => break,
                }
            }
            while let Some(joined) = tasks.try_join_next() {
                self.record_chunk(file_id, joined, &mut tally, errors).await;
            }

            if tally.should_abort(total, ratio) {
                abandoned = pending.len() - position;
                tracing::warn!(
                    phase = %phase,
                    failed = tally.failed,
                    total,
                    abandoned,
                    "Too many chunk failures; abandoning remaining chunks"
                );
                break;
            }

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let runner = self.phases.clone();
            let target = target.clone();
            let request = self.request(file_id, file_path).with_chunk(chunk);
            tasks.spawn(
                async move {
                    let _permit = permit;
                    (chunk, runner.invoke(&target, &request).await)
                }
                .instrument(phase_span(file_id, phase.as_str(), Some(chunk))),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            self.record_chunk(file_id, joined, &mut tally, errors).await;
        }

        let elapsed = started.elapsed().as_millis();
        tracing::debug!(
            succeeded = tally.succeeded,
            failed = tally.failed,
            abandoned,
            "Chunk fan-out finished"
        );
        if tally.failed == 0 && abandoned == 0 {
            log_phase_complete(file_id, phase.as_str(), elapsed);
            return Ok(());
        }

        let mut phase_errors = tally.errors;
        let mut summary = format!("{phase}: {} of {total} chunks failed", tally.failed);
        if abandoned > 0 {
            let _ = write!(summary, ", {abandoned} abandoned");
        }
        log_phase_error(file_id, phase.as_str(), &summary, elapsed);
        phase_errors.push(summary);
        Err(phase_errors)
    }

    async fn record_chunk(
        &self,
        file_id: &str,
        joined: Result<(u32, PhaseResult), JoinError>,
        tally: &mut FanOut,
        errors: &mut Vec<String>,
    ) {
        match joined {
            Ok((chunk, result)) => match result.error_message() {
                None => {
                    tally.succeeded += 1;
                    tracing::debug!(chunk, attempts = result.attempts, "Chunk completed");
                    self.commit(file_id, errors, move |record| {
                        record.mark_chunk_completed(chunk);
                    })
                    .await;
                }
                Some(message) => {
                    tally.failed += 1;
                    tally.errors.push(message);
                }
            },
            Err(e) => {
                tally.failed += 1;
                tally.errors.push(format!("chunk task failed: {e}"));
            }
        }
    }
}
