use std::fmt::Write as _;

use serde::Serialize;

use audiobatch_state::{BatchCounts, BatchRunRecord};
use audiobatch_utils::{BatchStatus, ExitCode};

/// Overall status from per-file counts.
///
/// Files skipped as already completed count on the success side, so a rerun over a finished
/// batch is a success.
#[must_use]
pub fn aggregate_status(counts: &BatchCounts, interrupted: bool) -> BatchStatus {
    if interrupted {
        BatchStatus::Interrupted
    } else if counts.failed == 0 && counts.partial == 0 {
        BatchStatus::Success
    } else if counts.succeeded + counts.partial + counts.skipped > 0 {
        BatchStatus::Partial
    } else {
        BatchStatus::Failed
    }
}

/// What a batch run reports back: the persisted record plus whether persisting worked
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    #[serde(flatten)]
    pub record: BatchRunRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<String>,
}

impl BatchSummary {
    #[must_use]
    pub fn status(&self) -> BatchStatus {
        self.record.status
    }

    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.record.status)
    }

    /// Human-readable report for the terminal
    #[must_use]
    pub fn render_table(&self) -> String {
        let r = &self.record;
        let c = &r.counts;
        let mut out = String::new();

        let mode = if r.dry_run { " [dry run]" } else { "" };
        let _ = writeln!(
            out,
            "Batch {}{mode}: {} in {:.1}s",
            r.run_id,
            r.status.as_str(),
            r.duration_secs
        );
        let _ = writeln!(
            out,
            "  {} files: {} succeeded, {} partial, {} failed, {} skipped",
            c.total, c.succeeded, c.partial, c.failed, c.skipped
        );
        if let (Some(avg), Some(peak)) = (r.avg_cpu, r.peak_cpu) {
            let _ = writeln!(out, "  CPU: {avg:.1}% average, {peak:.1}% peak");
        }
        if !r.files.is_empty() {
            let id_width = r
                .files
                .iter()
                .map(|f| f.file_id.chars().count())
                .max()
                .unwrap_or(0)
                .max("FILE".len());
            let _ = writeln!(
                out,
                "\n  {:<id_width$}  {:<9}  {:>6}  {:>9}  DETAIL",
                "FILE", "STATUS", "PHASES", "DURATION"
            );
            for file in &r.files {
                let detail = file
                    .errors
                    .last()
                    .cloned()
                    .or_else(|| file.skip_reason.clone())
                    .unwrap_or_default();
                let phases = format!("{}/{}", file.phases_completed.len(), r.phases.len());
                let _ = writeln!(
                    out,
                    "  {:<id_width$}  {:<9}  {:>6}  {:>8.1}s  {}",
                    file.file_id,
                    file.status.as_str(),
                    phases,
                    file.duration_secs,
                    first_line(&detail)
                );
            }
        }
        if let Some(e) = &self.persist_error {
            let _ = writeln!(out, "\n  warning: batch record was not saved: {e}");
        }
        out
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
