use std::time::Duration;

use chrono::Utc;

use audiobatch_state::{PIPELINE_SECTION, PhaseFileRecord};
use audiobatch_utils::{FileStatus, PhaseId};

use crate::{FileOrchestrator, restart_record};

impl FileOrchestrator {
    /// Mark the file `running` and return the record to resume from.
    ///
    /// Without `resume` the previous record is discarded first. If the store cannot be
    /// committed, work continues from whatever could be read.
    pub(crate) async fn begin(&self, file_id: &str, errors: &mut Vec<String>) -> PhaseFileRecord {
        let id = file_id.to_string();
        let resume = self.config.resume;
        let committed = self
            .store
            .transact_async(move |state| {
                if !resume {
                    state.remove_file_record(PIPELINE_SECTION, &id);
                }
                let mut record = restart_record(state.pipeline_record(&id).unwrap_or_default());
                record.timestamps.start = Some(Utc::now());
                state.upsert_file_record(PIPELINE_SECTION, &id, &record);
            })
            .await;

        match committed {
            Ok(state) => state.pipeline_record(file_id).unwrap_or_default(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to mark file as running");
                errors.push(format!("state commit failed: {e}"));
                if resume {
                    self.store
                        .read_async()
                        .await
                        .pipeline_record(file_id)
                        .map(restart_record)
                        .unwrap_or_default()
                } else {
                    PhaseFileRecord::default()
                }
            }
        }
    }

    /// Apply `update` to the file's pipeline record under the store lease.
    ///
    /// A failed commit is logged and added to `errors`; the run carries on.
    pub(crate) async fn commit<F>(&self, file_id: &str, errors: &mut Vec<String>, update: F)
    where
        F: FnOnce(&mut PhaseFileRecord) + Send + 'static,
    {
        let id = file_id.to_string();
        let result = self
            .store
            .transact_async(move |state| {
                let mut record = state.pipeline_record(&id).unwrap_or_default();
                update(&mut record);
                state.upsert_file_record(PIPELINE_SECTION, &id, &record);
            })
            .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to commit progress");
            errors.push(format!("state commit failed: {e}"));
        }
    }

    /// Record the terminal status, errors and timing.
    ///
    /// `phases_completed` replaces the stored list so it matches this run's phase list,
    /// dropping phases a previous run completed but this one no longer enables.
    pub(crate) async fn finish(
        &self,
        file_id: &str,
        status: FileStatus,
        phases_completed: &[PhaseId],
        errors: &mut Vec<String>,
        duration: Duration,
    ) {
        let recorded = errors.clone();
        let completed = phases_completed.to_vec();
        self.commit(file_id, errors, move |record| {
            record.status = status;
            record.phases_completed = completed;
            record.errors = recorded;
            record.timestamps.end = Some(Utc::now());
            record.timestamps.duration = Some(duration.as_secs_f64());
        })
        .await;
    }
}
