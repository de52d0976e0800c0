//! Error taxonomy for audiobatch
//!
//! Library crates return the narrow enums below. Binaries fold them into
//! [`AudiobatchError`], which knows its [`ErrorCategory`], exit code, and remediation hints.

use std::fmt;
use thiserror::Error;

use audiobatch_lock::LockError;
use audiobatch_runner::RunnerError;

use crate::exit_codes::ExitCode;
use crate::types::PhaseId;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Configuration discovery failed: {reason}")]
    DiscoveryFailed { reason: String },
}

/// Failures committing to the pipeline state document.
///
/// A corrupt document is not an error: it is quarantined and treated as empty.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Failed to read state document {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Failed to serialize state document: {reason}")]
    SerializeFailed { reason: String },

    #[error("Failed to write state document {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Failed to quarantine corrupt state document {path}: {reason}")]
    QuarantineFailed { path: String, reason: String },

    #[error("State task failed: {reason}")]
    TaskFailed { reason: String },
}

#[derive(Error, Debug)]
pub enum PhaseError {
    #[error("No executable found for phase {phase}; searched: {}", searched.join(", "))]
    NotFound { phase: PhaseId, searched: Vec<String> },

    #[error("Invalid command configured for phase {phase}: {reason}")]
    InvalidCommand { phase: PhaseId, reason: String },

    #[error("No synthesis chunks recorded for {file_id}")]
    NoChunks { file_id: String },

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Input directory does not exist: {path}")]
    InputDirMissing { path: String },

    #[error("Failed to read input directory {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Input files {first} and {second} both map to file id '{file_id}'")]
    DuplicateFileId {
        file_id: String,
        first: String,
        second: String,
    },
}

/// Top-level error for the audiobatch binary
#[derive(Error, Debug)]
pub enum AudiobatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Phase error: {0}")]
    Phase(#[from] PhaseError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    PhaseExecution,
    FileSystem,
    Concurrency,
    Discovery,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::PhaseExecution => write!(f, "Phase Execution"),
            Self::FileSystem => write!(f, "File System"),
            Self::Concurrency => write!(f, "Concurrency"),
            Self::Discovery => write!(f, "Discovery"),
        }
    }
}

impl AudiobatchError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Configuration,
            Self::State(StateError::Lock(_)) => ErrorCategory::Concurrency,
            Self::State(_) | Self::Io(_) => ErrorCategory::FileSystem,
            Self::Phase(_) => ErrorCategory::PhaseExecution,
            Self::Discovery(_) => ErrorCategory::Discovery,
            Self::Other(_) => ErrorCategory::PhaseExecution,
        }
    }

    /// Every fatal error exits 1; partial and interrupted outcomes are not errors
    #[must_use]
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::FAILURE
    }

    /// Remediation hints printed under the error message
    #[must_use]
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Config(ConfigError::InvalidValue { key, .. }) => vec![format!(
                "Check '{key}' in .audiobatch/config.toml or the matching CLI flag"
            )],
            Self::Config(_) => vec![
                "Run `audiobatch config` to see the effective configuration".to_string(),
            ],
            Self::State(StateError::Lock(_)) => vec![
                "Another audiobatch process is committing to the same state file".to_string(),
                "Wait for it to finish or raise [state] lock_wait_secs".to_string(),
            ],
            Self::Phase(PhaseError::NotFound { phase, .. }) => vec![format!(
                "Install the {phase} phase under the phases root or set [phases.commands] {phase}"
            )],
            Self::Discovery(DiscoveryError::InputDirMissing { .. }) => {
                vec!["Pass --input-dir or set [batch] input_dir".to_string()]
            }
            _ => Vec::new(),
        }
    }
}
