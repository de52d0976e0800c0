//! In-memory view of the pipeline state document
//!
//! The document is held as raw JSON so keys written by phase executables (or by newer
//! versions of this tool) survive a read-modify-write untouched. Typed access decodes
//! leniently: a record that does not fit the expected shape reads as absent instead of
//! poisoning the whole document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use audiobatch_utils::{FileStatus, PhaseId};

use crate::records::{BatchRunRecord, PhaseFileRecord};

/// Section holding the orchestrator's own per-file progress
pub const PIPELINE_SECTION: &str = "pipeline";
pub const BATCH_RUNS_KEY: &str = "batch_runs";
const FILES_KEY: &str = "files";
const STATUS_KEY: &str = "status";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineState(Map<String, Value>);

impl PipelineState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw top-level value for `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Replace a raw top-level value
    pub fn insert_raw(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Raw entry for `file_id` under `<section>.files`
    #[must_use]
    pub fn file_entry(&self, section: &str, file_id: &str) -> Option<&Value> {
        self.0.get(section)?.get(FILES_KEY)?.get(file_id)
    }

    /// Typed record for `file_id` in `section`, if present and well-formed
    #[must_use]
    pub fn file_record(&self, section: &str, file_id: &str) -> Option<PhaseFileRecord> {
        let entry = self.file_entry(section, file_id)?;
        match serde_json::from_value(entry.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!(section, file_id, error = %e, "Ignoring malformed file record");
                None
            }
        }
    }

    /// The orchestrator's record for `file_id`
    #[must_use]
    pub fn pipeline_record(&self, file_id: &str) -> Option<PhaseFileRecord> {
        self.file_record(PIPELINE_SECTION, file_id)
    }

    /// Merge `record` into `<section>.files.<file_id>`, preserving keys it does not own
    pub fn upsert_file_record(&mut self, section: &str, file_id: &str, record: &PhaseFileRecord) {
        let Some(files) = self.files_map_mut(section) else {
            return;
        };
        let entry = files
            .entry(file_id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }

        if let (Some(target), Ok(Value::Object(fields))) =
            (entry.as_object_mut(), serde_json::to_value(record))
        {
            for (key, value) in fields {
                target.insert(key, value);
            }
            // Serialization skips an empty chunk list; clear any stale one
            if record.chunks_completed.is_empty() {
                target.remove("chunks_completed");
            }
        }
    }

    /// Drop `<section>.files.<file_id>` entirely
    pub fn remove_file_record(&mut self, section: &str, file_id: &str) -> bool {
        self.0
            .get_mut(section)
            .and_then(|s| s.get_mut(FILES_KEY))
            .and_then(Value::as_object_mut)
            .is_some_and(|files| files.remove(file_id).is_some())
    }

    /// Set the phase-level aggregate status of a section
    pub fn set_section_status(&mut self, section: &str, status: FileStatus) {
        if let Some(section) = self.section_mut(section) {
            section.insert(
                STATUS_KEY.to_string(),
                Value::String(status.as_str().to_string()),
            );
        }
    }

    #[must_use]
    pub fn section_status(&self, section: &str) -> Option<FileStatus> {
        let raw = self.0.get(section)?.get(STATUS_KEY)?.clone();
        serde_json::from_value(raw).ok()
    }

    /// Every file id that has a record in `section`
    #[must_use]
    pub fn file_ids(&self, section: &str) -> Vec<String> {
        self.0
            .get(section)
            .and_then(|s| s.get(FILES_KEY))
            .and_then(Value::as_object)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of synthesis chunks the segmentation phase produced for `file_id`.
    ///
    /// Reads the length of the record's `artifacts` list, falling back to `chunk_paths`.
    #[must_use]
    pub fn chunk_count(&self, file_id: &str) -> Option<usize> {
        let entry = self.file_entry(PhaseId::Segmentation.as_str(), file_id)?;
        ["artifacts", "chunk_paths"]
            .iter()
            .find_map(|key| entry.get(*key).and_then(Value::as_array))
            .map(Vec::len)
    }

    /// Decodable batch-run records, oldest first
    #[must_use]
    pub fn batch_runs(&self) -> Vec<BatchRunRecord> {
        self.0
            .get(BATCH_RUNS_KEY)
            .and_then(Value::as_array)
            .map(|runs| {
                runs.iter()
                    .filter_map(|run| serde_json::from_value(run.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn latest_batch_run(&self) -> Option<BatchRunRecord> {
        self.batch_runs().pop()
    }

    /// Append `record`, or replace the existing entry with the same `run_id`
    pub fn upsert_batch_run(&mut self, record: &BatchRunRecord) {
        let Ok(value) = serde_json::to_value(record) else {
            return;
        };
        let runs = self
            .0
            .entry(BATCH_RUNS_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !runs.is_array() {
            *runs = Value::Array(Vec::new());
        }
        if let Some(runs) = runs.as_array_mut() {
            let existing = runs
                .iter()
                .position(|r| r.get("run_id").and_then(Value::as_str) == Some(record.run_id.as_str()));
            match existing {
                Some(idx) => runs[idx] = value,
                None => runs.push(value),
            }
        }
    }

    /// Status `file_id` reached in the most recent real batch run that processed it.
    ///
    /// Dry runs and `skipped` entries carry no new information and are looked through.
    #[must_use]
    pub fn last_batch_status(&self, file_id: &str) -> Option<FileStatus> {
        self.batch_runs()
            .iter()
            .rev()
            .filter(|run| !run.dry_run)
            .filter_map(|run| run.file(file_id))
            .map(|file| file.status)
            .find(|status| *status != FileStatus::Skipped)
    }

    fn section_mut(&mut self, section: &str) -> Option<&mut Map<String, Value>> {
        object_at(&mut self.0, section)
    }

    fn files_map_mut(&mut self, section: &str) -> Option<&mut Map<String, Value>> {
        object_at(self.section_mut(section)?, FILES_KEY)
    }
}

/// Object stored under `key`, replacing a missing or non-object value with `{}`
fn object_at<'a>(map: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Map<String, Value>> {
    let value = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    value.as_object_mut()
}
