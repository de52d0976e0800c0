use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use audiobatch_config::BatchConfig;
use audiobatch_runner::{CommandSpec, ExecOptions, NativeRunner, ProcessOutput, ProcessRunner, tail};
use audiobatch_state::FileResult;
use audiobatch_utils::{ExitCode, FileStatus};

use crate::discovery::InputFile;

/// Upper bound on one file's orchestrator process
pub const DEFAULT_FILE_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const STDERR_TAIL_BYTES: usize = 1024;

/// Runs one input file to completion in isolation.
///
/// Implementations never fail; every problem becomes a `failed` [`FileResult`].
#[async_trait]
pub trait FileLauncher: Send + Sync {
    async fn launch(&self, input: &InputFile) -> FileResult;
}

/// Launches `<program> run <file> ... --json` as a child process per file
pub struct ProcessLauncher {
    command: CommandSpec,
    runner: Arc<dyn ProcessRunner>,
    options: ExecOptions,
}

impl ProcessLauncher {
    /// Launcher for `program` mirroring the effective settings in `config`
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, config: &BatchConfig) -> Self {
        Self {
            command: base_command(program.into(), config),
            runner: Arc::new(NativeRunner),
            options: ExecOptions::with_timeout(DEFAULT_FILE_TIMEOUT),
        }
    }

    /// Launcher for the configured orchestrator, or this executable
    pub fn from_config(config: &BatchConfig) -> std::io::Result<Self> {
        let program = match &config.orchestrator {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };
        Ok(Self::new(program, config))
    }

    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    #[must_use]
    pub fn command_for(&self, input: &InputFile) -> CommandSpec {
        let mut cmd = self.command.clone();
        // `run <file>` leads; flags follow
        cmd.args.insert(0, "run".into());
        cmd.args.insert(1, input.path.clone().into_os_string());
        cmd
    }
}

impl std::fmt::Debug for ProcessLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessLauncher")
            .field("command", &self.command.to_string())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn base_command(program: PathBuf, config: &BatchConfig) -> CommandSpec {
    let phases = &config.phases;
    let phase_list = phases
        .enabled
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(",");

    let mut cmd = CommandSpec::new(program.into_os_string());
    if let Some(config_file) = &config.config_file {
        cmd = cmd.arg("--config").arg(config_file.as_os_str());
    }
    cmd.arg("--state")
        .arg(config.state_path.as_str())
        .arg("--phases")
        .arg(phase_list)
        .arg(if config.resume { "--resume" } else { "--no-resume" })
        .arg("--max-retries")
        .arg(phases.max_retries.to_string())
        .arg("--phase-timeout")
        .arg(phases.timeout.as_secs().max(1).to_string())
        .arg("--phases-root")
        .arg(phases.root.as_os_str())
        .arg("--json")
}

#[async_trait]
impl FileLauncher for ProcessLauncher {
    async fn launch(&self, input: &InputFile) -> FileResult {
        let cmd = self.command_for(input);
        tracing::debug!(command = %cmd, "Launching orchestrator");

        match self.runner.run(&cmd, &self.options).await {
            Ok(output) => interpret_output(input, &output),
            Err(e) => {
                tracing::error!(file_id = %input.file_id, error = %e, "Failed to launch orchestrator");
                failed(input, format!("failed to launch orchestrator: {e}"))
            }
        }
    }
}

fn failed(input: &InputFile, error: String) -> FileResult {
    FileResult::failed(&input.file_id, input.path.display().to_string(), error)
}

/// Prefer the child's JSON report; fall back to its exit code
pub(crate) fn interpret_output(input: &InputFile, output: &ProcessOutput) -> FileResult {
    if output.timed_out {
        return failed(input, "orchestrator timed out".to_string());
    }

    let reported = output
        .stdout
        .lines()
        .rev()
        .filter(|line| line.trim_start().starts_with('{'))
        .find_map(|line| serde_json::from_str::<FileResult>(line).ok());
    if let Some(mut result) = reported {
        if result.file_id != input.file_id {
            tracing::warn!(
                expected = %input.file_id,
                reported = %result.file_id,
                "Orchestrator reported a different file id"
            );
            result.file_id.clone_from(&input.file_id);
        }
        result.input_path = input.path.display().to_string();
        return result;
    }

    let stderr_tail = tail(&output.stderr, STDERR_TAIL_BYTES).trim();
    let Some(code) = output.exit_code else {
        return failed(input, "orchestrator was terminated by a signal".to_string());
    };
    let status = ExitCode::from_i32(code).to_file_status();
    tracing::warn!(
        file_id = %input.file_id,
        code,
        "Orchestrator produced no report; using exit code"
    );

    let mut result = FileResult::new(&input.file_id, input.path.display().to_string());
    result.status = status;
    result.duration_secs = output.duration.as_secs_f64();
    if status != FileStatus::Success {
        let mut message = format!("orchestrator exited with code {code}");
        if !stderr_tail.is_empty() {
            message.push_str(": ");
            message.push_str(stderr_tail);
        }
        result.errors.push(message);
    }
    result
}
