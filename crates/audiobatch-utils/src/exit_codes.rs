//! Process exit codes for audiobatch.
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Everything succeeded (or dry-run / nothing to do) |
//! | 1 | `FAILURE` | Nothing succeeded, or a fatal startup error |
//! | 2 | `PARTIAL` | Some work succeeded and some failed |
//! | 130 | `INTERRUPTED` | Stopped by SIGINT / Ctrl-C |

use crate::types::{BatchStatus, FileStatus};

/// Type-safe exit code. The numeric values are part of the CLI contract.
///
/// ```rust
/// use audiobatch_utils::exit_codes::ExitCode;
/// use audiobatch_utils::types::FileStatus;
///
/// assert_eq!(ExitCode::from(FileStatus::Partial).as_i32(), 2);
/// assert_eq!(ExitCode::from_i32(130), ExitCode::INTERRUPTED);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
    pub const PARTIAL: ExitCode = ExitCode(2);
    pub const INTERRUPTED: ExitCode = ExitCode(130);

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }

    /// Inverse of the file-status mapping, used when a child's JSON report is unavailable
    #[must_use]
    pub const fn to_file_status(self) -> FileStatus {
        match self.0 {
            0 => FileStatus::Success,
            2 => FileStatus::Partial,
            _ => FileStatus::Failed,
        }
    }
}

impl From<FileStatus> for ExitCode {
    fn from(status: FileStatus) -> Self {
        match status {
            FileStatus::Success | FileStatus::Skipped => ExitCode::SUCCESS,
            FileStatus::Partial => ExitCode::PARTIAL,
            FileStatus::Failed | FileStatus::Pending | FileStatus::Running => ExitCode::FAILURE,
        }
    }
}

impl From<BatchStatus> for ExitCode {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Success => ExitCode::SUCCESS,
            BatchStatus::Partial => ExitCode::PARTIAL,
            BatchStatus::Failed => ExitCode::FAILURE,
            BatchStatus::Interrupted => ExitCode::INTERRUPTED,
        }
    }
}
