pub mod atomic_write;
pub mod error;
pub mod exit_codes;
pub mod logging;
pub mod types;

pub use error::{
    AudiobatchError, ConfigError, DiscoveryError, ErrorCategory, PhaseError, StateError,
};
pub use exit_codes::ExitCode;
pub use types::{BatchStatus, FileStatus, PhaseId, UnknownPhase, file_id_for, parse_phase_list};
