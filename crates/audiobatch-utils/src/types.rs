//! Shared identifiers and status values

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Production pipeline phases, in canonical execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseId {
    Validation,
    Extraction,
    Segmentation,
    Synthesis,
    Enhancement,
}

impl PhaseId {
    pub const ALL: [PhaseId; 5] = [
        PhaseId::Validation,
        PhaseId::Extraction,
        PhaseId::Segmentation,
        PhaseId::Synthesis,
        PhaseId::Enhancement,
    ];

    /// Canonical name, also the state-document section key
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PhaseId::Validation => "validation",
            PhaseId::Extraction => "extraction",
            PhaseId::Segmentation => "segmentation",
            PhaseId::Synthesis => "synthesis",
            PhaseId::Enhancement => "enhancement",
        }
    }

    /// Legacy numeric alias (`phase1`..`phase5`)
    #[must_use]
    pub const fn alias(&self) -> &'static str {
        match self {
            PhaseId::Validation => "phase1",
            PhaseId::Extraction => "phase2",
            PhaseId::Segmentation => "phase3",
            PhaseId::Synthesis => "phase4",
            PhaseId::Enhancement => "phase5",
        }
    }

    /// Invoked once per chunk instead of once per file
    #[must_use]
    pub const fn is_chunked(&self) -> bool {
        matches!(self, PhaseId::Synthesis)
    }

    /// Receives the raw input path in addition to the file id
    #[must_use]
    pub const fn takes_input_path(&self) -> bool {
        matches!(self, PhaseId::Validation)
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown phase '{0}' (expected one of validation, extraction, segmentation, synthesis, enhancement or phase1..phase5)")]
pub struct UnknownPhase(pub String);

impl FromStr for PhaseId {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        PhaseId::ALL
            .into_iter()
            .find(|p| p.as_str() == needle || p.alias() == needle)
            .ok_or_else(|| UnknownPhase(s.to_string()))
    }
}

/// Parse a comma-separated phase list such as `validation,phase2`
pub fn parse_phase_list(input: &str) -> Result<Vec<PhaseId>, UnknownPhase> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Status of one file, either per phase or overall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Pending,
    Running,
    Success,
    Partial,
    Failed,
    Skipped,
}

impl FileStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Running => "running",
            FileStatus::Success => "success",
            FileStatus::Partial => "partial",
            FileStatus::Failed => "failed",
            FileStatus::Skipped => "skipped",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Success | FileStatus::Partial | FileStatus::Failed | FileStatus::Skipped
        )
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall outcome of one batch invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Success,
    Partial,
    Failed,
    Interrupted,
}

impl BatchStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Success => "success",
            BatchStatus::Partial => "partial",
            BatchStatus::Failed => "failed",
            BatchStatus::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable key for an input file: its base name without the final extension.
///
/// `/in/My Book.v2.pdf` becomes `My Book.v2`.
#[must_use]
pub fn file_id_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
