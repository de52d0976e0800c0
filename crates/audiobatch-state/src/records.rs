use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use audiobatch_utils::{BatchStatus, FileStatus, PhaseId};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timestamps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// One file's record inside a phase section (or the orchestrator's `pipeline` section).
///
/// Invariants maintained by the orchestrator: `success` implies `phases_completed` equals the
/// configured phase list, and `failed` implies it is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseFileRecord {
    #[serde(default)]
    pub status: FileStatus,
    #[serde(default)]
    pub phases_completed: Vec<PhaseId>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub timestamps: Timestamps,
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Phase-specific numbers; opaque to the orchestrator
    #[serde(default)]
    pub metrics: Map<String, Value>,
    /// Synthesis chunk indices already finished, sorted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks_completed: Vec<u32>,
}

impl PhaseFileRecord {
    #[must_use]
    pub fn has_completed(&self, phase: PhaseId) -> bool {
        self.phases_completed.contains(&phase)
    }

    /// Record a phase as finished, keeping the list in the order phases complete
    pub fn mark_completed(&mut self, phase: PhaseId) {
        if !self.has_completed(phase) {
            self.phases_completed.push(phase);
        }
    }

    pub fn mark_chunk_completed(&mut self, chunk: u32) {
        if let Err(pos) = self.chunks_completed.binary_search(&chunk) {
            self.chunks_completed.insert(pos, chunk);
        }
    }
}

/// Outcome of driving one file through its phases.
///
/// Produced by the orchestrator, printed as JSON by `audiobatch run --json`, and stored per
/// file inside each [`BatchRunRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResult {
    pub file_id: String,
    pub input_path: String,
    pub status: FileStatus,
    #[serde(default)]
    pub phases_completed: Vec<PhaseId>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub duration_secs: f64,
    /// Why no work was done (`already completed`, `dry run`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
}

impl FileResult {
    #[must_use]
    pub fn new(file_id: impl Into<String>, input_path: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            input_path: input_path.into(),
            status: FileStatus::Pending,
            phases_completed: Vec::new(),
            errors: Vec::new(),
            duration_secs: 0.0,
            skip_reason: None,
            dry_run: false,
        }
    }

    #[must_use]
    pub fn skipped(
        file_id: impl Into<String>,
        input_path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            status: FileStatus::Skipped,
            skip_reason: Some(reason.into()),
            ..Self::new(file_id, input_path)
        }
    }

    #[must_use]
    pub fn failed(
        file_id: impl Into<String>,
        input_path: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: FileStatus::Failed,
            errors: vec![error.into()],
            ..Self::new(file_id, input_path)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub total: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchCounts {
    #[must_use]
    pub fn tally(files: &[FileResult]) -> Self {
        let mut counts = Self {
            total: files.len(),
            ..Self::default()
        };
        for file in files {
            match file.status {
                FileStatus::Success => counts.succeeded += 1,
                FileStatus::Partial => counts.partial += 1,
                FileStatus::Skipped => counts.skipped += 1,
                FileStatus::Failed | FileStatus::Pending | FileStatus::Running => {
                    counts.failed += 1;
                }
            }
        }
        counts
    }
}

/// One batch invocation, appended to `batch_runs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRunRecord {
    pub run_id: String,
    pub status: BatchStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_secs: f64,
    #[serde(default)]
    pub counts: BatchCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_cpu: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_cpu: Option<f32>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub phases: Vec<PhaseId>,
    #[serde(default)]
    pub files: Vec<FileResult>,
}

impl BatchRunRecord {
    #[must_use]
    pub fn file(&self, file_id: &str) -> Option<&FileResult> {
        self.files.iter().find(|f| f.file_id == file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_completed_is_idempotent_and_ordered() {
        let mut record = PhaseFileRecord::default();
        record.mark_completed(PhaseId::Extraction);
        record.mark_completed(PhaseId::Validation);
        record.mark_completed(PhaseId::Extraction);
        assert_eq!(
            record.phases_completed,
            vec![PhaseId::Extraction, PhaseId::Validation]
        );
    }

    #[test]
    fn test_chunks_completed_stay_sorted_and_unique() {
        let mut record = PhaseFileRecord::default();
        for chunk in [4, 1, 3, 1, 0] {
            record.mark_chunk_completed(chunk);
        }
        assert_eq!(record.chunks_completed, vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_lenient_record_decoding() {
        let value = serde_json::json!({
            "status": "partial",
            "phases_completed": ["validation"],
            "custom_field": {"kept": true}
        });
        let record: PhaseFileRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record.status, FileStatus::Partial);
        assert!(record.errors.is_empty());
        assert!(record.chunks_completed.is_empty());
    }

    #[test]
    fn test_tally_counts_every_status() {
        let files = vec![
            FileResult {
                status: FileStatus::Success,
                ..FileResult::new("a", "a.pdf")
            },
            FileResult::failed("b", "b.pdf", "boom"),
            FileResult {
                status: FileStatus::Partial,
                ..FileResult::new("c", "c.pdf")
            },
            FileResult::skipped("d", "d.pdf", "already completed"),
        ];
        let counts = BatchCounts::tally(&files);
        assert_eq!(
            counts,
            BatchCounts {
                total: 4,
                succeeded: 1,
                partial: 1,
                failed: 1,
                skipped: 1
            }
        );
    }

    #[test]
    fn test_file_result_json_omits_empty_optionals() {
        let json = serde_json::to_value(FileResult::new("a", "in/a.pdf")).unwrap();
        assert!(json.get("skip_reason").is_none());
        assert!(json.get("dry_run").is_none());
        assert_eq!(json["status"], "pending");
    }
}
