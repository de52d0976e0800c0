use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use audiobatch_runner::{CommandSpec, ExecOptions, ProcessOutput, tail};
use audiobatch_utils::PhaseId;

use crate::resolve::{PhaseTarget, absolute};
use crate::{ENV_FILE_ID, ENV_PHASE, ENV_STATE, PhaseRunner, chunk_log};

/// Trailing bytes of stdout/stderr kept with a failure
pub const TAIL_BYTES: usize = 2048;

/// Everything a single phase invocation needs besides the entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeRequest {
    pub file_id: String,
    pub state_path: PathBuf,
    /// Raw input file; passed only to phases that read it directly
    pub input_path: Option<PathBuf>,
    pub chunk: Option<u32>,
    pub extra_args: Vec<String>,
    /// Overrides the configured per-attempt timeout
    pub timeout: Option<Duration>,
}

impl InvokeRequest {
    #[must_use]
    pub fn new(file_id: impl Into<String>, state_path: impl Into<PathBuf>) -> Self {
        Self {
            file_id: file_id.into(),
            state_path: state_path.into(),
            input_path: None,
            chunk: None,
            extra_args: Vec::new(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_input(mut self, input_path: impl Into<PathBuf>) -> Self {
        self.input_path = Some(input_path.into());
        self
    }

    #[must_use]
    pub fn with_chunk(mut self, chunk: u32) -> Self {
        self.chunk = Some(chunk);
        self
    }

    #[must_use]
    pub fn with_extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Success,
    SubprocessFailure {
        /// `None` when the child was killed by a signal or never started
        exit_code: Option<i32>,
        stdout_tail: String,
        stderr_tail: String,
    },
    /// Killed by the hard timeout on the final attempt
    TimeoutFailure {
        timeout: Duration,
    },
}

impl PhaseOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    fn classify(output: &ProcessOutput, timeout: Duration) -> Self {
        if output.timed_out {
            return Self::TimeoutFailure { timeout };
        }
        if output.exit_code == Some(0) {
            return Self::Success;
        }
        Self::SubprocessFailure {
            exit_code: output.exit_code,
            stdout_tail: tail(&output.stdout, TAIL_BYTES).to_string(),
            stderr_tail: tail(&output.stderr, TAIL_BYTES).to_string(),
        }
    }
}

impl fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::TimeoutFailure { timeout } => {
                write!(f, "timeout: killed after {}", format_timeout(*timeout))
            }
            Self::SubprocessFailure {
                exit_code,
                stderr_tail,
                stdout_tail,
            } => {
                match exit_code {
                    Some(code) => write!(f, "exited with code {code}")?,
                    None => f.write_str("terminated without an exit code")?,
                }
                let last_line = [stderr_tail, stdout_tail]
                    .into_iter()
                    .find_map(|text| text.lines().rev().find(|l| !l.trim().is_empty()));
                if let Some(line) = last_line {
                    write!(f, ": {}", line.trim())?;
                }
                Ok(())
            }
        }
    }
}

/// Whole seconds when exact, milliseconds otherwise
fn format_timeout(timeout: Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_millis())
    }
}

/// Final result of a phase invocation after retries
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseResult {
    pub phase: PhaseId,
    pub chunk: Option<u32>,
    pub outcome: PhaseOutcome,
    pub attempts: u32,
    /// Wall-clock time across all attempts and backoff
    pub duration: Duration,
}

impl PhaseResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Error string recorded in state for a failed invocation
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        let subject = match self.chunk {
            Some(chunk) => format!("{} chunk {chunk}", self.phase),
            None => self.phase.to_string(),
        };
        let attempts = if self.attempts == 1 { "attempt" } else { "attempts" };
        Some(format!(
            "{subject} {} ({} {attempts})",
            self.outcome, self.attempts
        ))
    }
}

/// Delay before the attempt following failed attempt `attempt` (1-based):
/// `min(base * 2^(attempt - 1), max)`
#[must_use]
pub fn retry_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

impl PhaseRunner {
    /// Run `target` for one file (or one chunk of it), retrying failures.
    ///
    /// Timeouts and nonzero exits are retried up to `max_retries` total attempts; a child that
    /// cannot be spawned at all is not. After exhaustion the last failure is returned. A failed
    /// chunk invocation also leaves a diagnostic log under `log_dir`.
    pub async fn invoke(&self, target: &PhaseTarget, request: &InvokeRequest) -> PhaseResult {
        let started = Instant::now();
        let cmd = build_command(target, request);
        let timeout = request.timeout.unwrap_or(self.settings.timeout);
        let opts = ExecOptions {
            timeout,
            kill_grace: self.settings.kill_grace,
            ..ExecOptions::default()
        };
        let max_attempts = self.settings.max_retries.max(1);

        tracing::debug!(command = %cmd, timeout_ms = timeout.as_millis() as u64, "Invoking phase");

        let mut attempts = 0;
        let mut last_output = None;
        let outcome = loop {
            attempts += 1;
            let (outcome, retryable) = match self.runner.run(&cmd, &opts).await {
                Ok(output) => {
                    let outcome = PhaseOutcome::classify(&output, timeout);
                    last_output = Some(output);
                    (outcome, true)
                }
                Err(e) => {
                    let retryable = !e.is_spawn_failure();
                    let outcome = PhaseOutcome::SubprocessFailure {
                        exit_code: None,
                        stdout_tail: String::new(),
                        stderr_tail: e.to_string(),
                    };
                    (outcome, retryable)
                }
            };

            if outcome.is_success() || !retryable || attempts >= max_attempts {
                break outcome;
            }

            let delay = retry_delay(
                self.settings.retry_base_delay,
                self.settings.retry_max_delay,
                attempts,
            );
            tracing::warn!(
                file_id = %request.file_id,
                phase = %target.phase,
                chunk = request.chunk,
                attempt = attempts,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %outcome,
                "Phase attempt failed; retrying"
            );
            tokio::time::sleep(delay).await;
        };

        let result = PhaseResult {
            phase: target.phase,
            chunk: request.chunk,
            outcome,
            attempts,
            duration: started.elapsed(),
        };

        if let Some(chunk) = request.chunk
            && !result.is_success()
        {
            let path = chunk_log::chunk_log_path(
                &self.settings.log_dir,
                &request.file_id,
                target.phase,
                chunk,
            );
            chunk_log::write(&path, request, &cmd, &result, last_output.as_ref());
        }

        result
    }
}

/// Entry point, prefix args, then the standard contract, then extra args
fn build_command(target: &PhaseTarget, request: &InvokeRequest) -> CommandSpec {
    let state_path = absolute(&request.state_path);
    let mut cmd = CommandSpec::new(target.program.as_os_str())
        .args(&target.prefix_args)
        .args(["--file-id", request.file_id.as_str()])
        .arg("--state")
        .arg(state_path.as_os_str());

    if target.phase.takes_input_path()
        && let Some(input) = &request.input_path
    {
        cmd = cmd.arg("--input").arg(absolute(input).as_os_str());
    }
    if let Some(chunk) = request.chunk {
        cmd = cmd.arg("--chunk-index").arg(chunk.to_string());
    }
    cmd = cmd.args(&request.extra_args);

    if let Some(cwd) = &target.cwd {
        cmd = cmd.cwd(cwd);
    }
    cmd.env(ENV_FILE_ID, &request.file_id)
        .env(ENV_PHASE, target.phase.as_str())
        .env(ENV_STATE, state_path.as_os_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TargetKind;

    fn target(phase: PhaseId) -> PhaseTarget {
        PhaseTarget {
            phase,
            program: PathBuf::from("/phases/bin/run"),
            prefix_args: vec!["script.py".to_string()],
            cwd: Some(PathBuf::from("/phases")),
            kind: TargetKind::Venv,
        }
    }

    fn args_of(cmd: &CommandSpec) -> Vec<String> {
        cmd.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_retry_delay_is_capped_exponential() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        let delays: Vec<u64> = (1..=7)
            .map(|k| retry_delay(base, max, k).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(retry_delay(base, max, 200), max);
        assert_eq!(retry_delay(base, max, 0), base);
    }

    #[test]
    fn test_validation_receives_input_path() {
        let request = InvokeRequest::new("book", "/data/pipeline.json")
            .with_input("/in/book.pdf")
            .with_extra_args(["--strict"]);
        let cmd = build_command(&target(PhaseId::Validation), &request);
        assert_eq!(
            args_of(&cmd),
            vec![
                "script.py",
                "--file-id",
                "book",
                "--state",
                "/data/pipeline.json",
                "--input",
                "/in/book.pdf",
                "--strict"
            ]
        );
        assert_eq!(cmd.cwd, Some(PathBuf::from("/phases")));
    }

    #[test]
    fn test_other_phases_never_receive_input_path() {
        let request = InvokeRequest::new("book", "/data/pipeline.json").with_input("/in/book.pdf");
        let cmd = build_command(&target(PhaseId::Extraction), &request);
        assert!(!args_of(&cmd).contains(&"--input".to_string()));
    }

    #[test]
    fn test_synthesis_receives_chunk_index_and_env() {
        let request = InvokeRequest::new("book", "/data/pipeline.json").with_chunk(7);
        let cmd = build_command(&target(PhaseId::Synthesis), &request);
        let args = args_of(&cmd);
        assert_eq!(&args[args.len() - 2..], ["--chunk-index", "7"]);
        assert_eq!(cmd.env.get(std::ffi::OsStr::new(ENV_PHASE)).unwrap(), "synthesis");
        assert_eq!(cmd.env.get(std::ffi::OsStr::new(ENV_FILE_ID)).unwrap(), "book");
        assert_eq!(
            cmd.env.get(std::ffi::OsStr::new(ENV_STATE)).unwrap(),
            "/data/pipeline.json"
        );
    }

    #[test]
    fn test_relative_state_path_is_made_absolute() {
        let request = InvokeRequest::new("book", "pipeline.json");
        let cmd = build_command(&target(PhaseId::Extraction), &request);
        let state = PathBuf::from(&cmd.args[4]);
        assert!(state.is_absolute());
        assert!(state.ends_with("pipeline.json"));
    }

    #[test]
    fn test_failure_message_uses_last_diagnostic_line() {
        let result = PhaseResult {
            phase: PhaseId::Extraction,
            chunk: None,
            outcome: PhaseOutcome::SubprocessFailure {
                exit_code: Some(3),
                stdout_tail: "progress\n".to_string(),
                stderr_tail: "warning: x\nerror: bad pdf\n\n".to_string(),
            },
            attempts: 3,
            duration: Duration::ZERO,
        };
        assert_eq!(
            result.error_message().unwrap(),
            "extraction exited with code 3: error: bad pdf (3 attempts)"
        );

        let timeout = PhaseResult {
            phase: PhaseId::Synthesis,
            chunk: Some(2),
            outcome: PhaseOutcome::TimeoutFailure {
                timeout: Duration::from_secs(10),
            },
            attempts: 1,
            duration: Duration::ZERO,
        };
        assert_eq!(
            timeout.error_message().unwrap(),
            "synthesis chunk 2 timeout: killed after 10s (1 attempt)"
        );

        let short = PhaseResult {
            phase: PhaseId::Extraction,
            chunk: None,
            outcome: PhaseOutcome::TimeoutFailure {
                timeout: Duration::from_millis(250),
            },
            attempts: 2,
            duration: Duration::ZERO,
        };
        assert_eq!(
            short.error_message().unwrap(),
            "extraction timeout: killed after 250ms (2 attempts)"
        );
    }

    #[test]
    fn test_classify() {
        let timeout = Duration::from_secs(5);
        let ok = ProcessOutput {
            exit_code: Some(0),
            ..ProcessOutput::default()
        };
        assert_eq!(PhaseOutcome::classify(&ok, timeout), PhaseOutcome::Success);

        let killed = ProcessOutput {
            timed_out: true,
            ..ProcessOutput::default()
        };
        assert_eq!(
            PhaseOutcome::classify(&killed, timeout),
            PhaseOutcome::TimeoutFailure { timeout }
        );

        let noisy = ProcessOutput {
            exit_code: Some(1),
            stderr: "e".repeat(10_000),
            ..ProcessOutput::default()
        };
        match PhaseOutcome::classify(&noisy, timeout) {
            PhaseOutcome::SubprocessFailure { stderr_tail, .. } => {
                assert_eq!(stderr_tail.len(), TAIL_BYTES);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
