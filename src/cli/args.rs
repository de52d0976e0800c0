//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// audiobatch - resumable batch orchestration for audiobook production pipelines
#[derive(Parser, Debug)]
#[command(name = "audiobatch")]
#[command(about = "Drive documents through audiobook phases, one file or a whole directory at a time")]
#[command(long_about = r#"
audiobatch runs every input document through the external phase programs
(validation, extraction, segmentation, synthesis, enhancement), recording
progress in a shared JSON state document so interrupted work resumes where it
stopped.

EXAMPLES:
  # Process every document under ./books with four workers
  audiobatch batch --input-dir books --max-workers 4

  # See what a batch would do without launching anything
  audiobatch batch --input-dir books --dry-run

  # Rerun a single file from scratch, only the first two phases
  audiobatch run books/moby-dick.pdf --no-resume --phases validation,extraction

  # Inspect the latest batch and per-file progress
  audiobatch status --json

CONFIGURATION:
  Precedence: CLI flags > config file > defaults
  The config file is .audiobatch/config.toml, discovered by walking up from
  the working directory, or given with --config.

EXIT CODES:
  0 success (including dry runs and all-skipped batches), 1 failure,
  2 partial success, 130 interrupted
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit log lines as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Settings shared by `run` and `batch`; each one overrides the config file
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct PhaseArgs {
    /// Pipeline state document
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Comma-separated phases to run, in order (e.g. `validation,extraction`)
    #[arg(long)]
    pub phases: Option<String>,

    /// Skip work a previous run completed (default)
    #[arg(long, overrides_with = "no_resume")]
    pub resume: bool,

    /// Start every file from scratch
    #[arg(long, overrides_with = "resume")]
    pub no_resume: bool,

    /// Attempts per phase invocation, including the first
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Hard timeout per phase invocation, in seconds
    #[arg(long)]
    pub phase_timeout: Option<u64>,

    /// Directory holding the phase programs
    #[arg(long)]
    pub phases_root: Option<PathBuf>,
}

impl PhaseArgs {
    /// `Some` only when a resume flag was given
    #[must_use]
    pub fn resume_override(&self) -> Option<bool> {
        if self.no_resume {
            Some(false)
        } else if self.resume {
            Some(true)
        } else {
            None
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive one input file through the enabled phases
    Run {
        /// Input document
        input: PathBuf,

        #[command(flatten)]
        phase: PhaseArgs,

        /// Print the file result as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Process every input document in a directory
    Batch {
        /// Directory to scan for input documents
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Files processed at the same time
        #[arg(long)]
        max_workers: Option<usize>,

        /// CPU percentage above which new files wait before starting
        #[arg(long)]
        cpu_threshold: Option<f32>,

        /// Seconds between admission re-checks while CPU is under pressure
        #[arg(long)]
        throttle_delay: Option<f64>,

        /// Report what would run without launching anything
        #[arg(long)]
        dry_run: bool,

        /// Process at most this many files (after sorting by name)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Program launched per file (defaults to this executable)
        #[arg(long)]
        orchestrator: Option<PathBuf>,

        #[command(flatten)]
        phase: PhaseArgs,

        /// Print the batch summary as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Show the latest batch run and per-file progress
    Status {
        /// Pipeline state document
        #[arg(long)]
        state: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration and where each value came from
    Config,
}

impl Commands {
    /// Name used in error reports
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Commands::Run { .. } => "run",
            Commands::Batch { .. } => "batch",
            Commands::Status { .. } => "status",
            Commands::Config => "config",
        }
    }
}
