use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::error::RunnerError;
use crate::capture::OutputTail;
use crate::CommandSpec;

/// Default stdout capture ceiling (256 KiB)
pub const DEFAULT_STDOUT_CAP_BYTES: usize = 256 * 1024;
/// Default stderr capture ceiling (64 KiB)
pub const DEFAULT_STDERR_CAP_BYTES: usize = 64 * 1024;
/// Default wait between SIGTERM and SIGKILL on timeout
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8192;
const DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Execution limits for one child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    /// Hard wall-clock limit; the process group is killed when it elapses
    pub timeout: Duration,
    /// Time between SIGTERM and SIGKILL
    pub kill_grace: Duration,
    pub stdout_cap_bytes: usize,
    pub stderr_cap_bytes: usize,
}

impl ExecOptions {
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1800),
            kill_grace: DEFAULT_KILL_GRACE,
            stdout_cap_bytes: DEFAULT_STDOUT_CAP_BYTES,
            stderr_cap_bytes: DEFAULT_STDERR_CAP_BYTES,
        }
    }
}

/// Output from a finished (or killed) child process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    /// Whether the process was killed for exceeding its timeout
    pub timed_out: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration: Duration,
}

impl ProcessOutput {
    /// Exit code 0 and not timed out
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Async process execution seam.
///
/// Implementations MUST use argv-style APIs only. A non-zero exit or a timeout is a normal
/// `Ok(ProcessOutput)`; `Err` is reserved for failures to start or supervise the child.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, cmd: &CommandSpec, opts: &ExecOptions)
    -> Result<ProcessOutput, RunnerError>;
}

/// Runs commands as real child processes on the host
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeRunner;

#[async_trait]
impl ProcessRunner for NativeRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        opts: &ExecOptions,
    ) -> Result<ProcessOutput, RunnerError> {
        execute_native(cmd, opts).await
    }
}

/// Spawn `spec` in its own process group, capture output, and enforce the timeout.
///
/// On timeout the whole process group gets SIGTERM, then SIGKILL after `kill_grace`, so
/// grandchildren spawned by phase wrappers die with it.
pub async fn execute_native(
    spec: &CommandSpec,
    opts: &ExecOptions,
) -> Result<ProcessOutput, RunnerError> {
    let started = Instant::now();
    let mut cmd = spec.to_tokio_command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // On unix the process-group guard below owns teardown
        .kill_on_drop(cfg!(not(unix)));

    #[cfg(unix)]
    {
        #[allow(unused_imports)]
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }
    }

    let mut child = cmd.spawn().map_err(|e| RunnerError::SpawnFailed {
        program: spec.program.to_string_lossy().into_owned(),
        reason: e.to_string(),
    })?;
    let child_id = child.id();
    let mut group = GroupGuard::new(child_id, opts.kill_grace);

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| RunnerError::NativeExecutionFailed {
            reason: "Failed to capture stdout".to_string(),
        })?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| RunnerError::NativeExecutionFailed {
            reason: "Failed to capture stderr".to_string(),
        })?;

    let mut stdout_buffer = OutputTail::new(opts.stdout_cap_bytes);
    let mut stderr_buffer = OutputTail::new(opts.stderr_cap_bytes);

    let read_future = async {
        read_both(
            &mut stdout_pipe,
            &mut stderr_pipe,
            &mut stdout_buffer,
            &mut stderr_buffer,
        )
        .await?;
        child
            .wait()
            .await
            .map_err(|e| RunnerError::NativeExecutionFailed {
                reason: format!("Failed to wait for process: {e}"),
            })
    };
    let outcome = timeout(opts.timeout, read_future).await;

    let (status, timed_out): (Option<ExitStatus>, bool) = match outcome {
        Ok(status) => (Some(status?), false),
        Err(_) => {
            tracing::warn!(
                command = %spec,
                timeout_secs = opts.timeout.as_secs(),
                "Process exceeded timeout; terminating process group"
            );
            let status = terminate(&mut child, child_id, opts.kill_grace).await;
            let _ = timeout(
                DRAIN_TIMEOUT,
                read_both(
                    &mut stdout_pipe,
                    &mut stderr_pipe,
                    &mut stdout_buffer,
                    &mut stderr_buffer,
                ),
            )
            .await;
            (status, true)
        }
    };
    group.disarm();

    let stdout_truncated = stdout_buffer.truncated();
    let stderr_truncated = stderr_buffer.truncated();
    Ok(ProcessOutput {
        stdout: stdout_buffer.into_lossy_string(),
        stderr: stderr_buffer.into_lossy_string(),
        exit_code: if timed_out {
            None
        } else {
            status.and_then(|s| s.code())
        },
        timed_out,
        stdout_truncated,
        stderr_truncated,
        duration: started.elapsed(),
    })
}

/// Tears down the child's process group when supervision is dropped before the child is
/// reaped, e.g. when the awaiting task is aborted.
///
/// The group gets SIGTERM at once and SIGKILL from a helper thread after the grace period,
/// which gives a supervising child (such as a per-file orchestrator) time to stop its own
/// children.
struct GroupGuard {
    pgid: Option<u32>,
    grace: Duration,
}

impl GroupGuard {
    fn new(pgid: Option<u32>, grace: Duration) -> Self {
        Self { pgid, grace }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pgid.take() {
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;

            let pgid = Pid::from_raw(pid as i32);
            if killpg(pgid, Signal::SIGTERM).is_ok() {
                let grace = self.grace;
                std::thread::spawn(move || {
                    std::thread::sleep(grace);
                    let _ = killpg(pgid, Signal::SIGKILL);
                });
            }
        }
        #[cfg(not(unix))]
        let _ = (self.pgid.take(), self.grace);
    }
}

/// Read both pipes to EOF into their ring buffers
async fn read_both<O, E>(
    stdout_pipe: &mut O,
    stderr_pipe: &mut E,
    stdout_buffer: &mut OutputTail,
    stderr_buffer: &mut OutputTail,
) -> Result<(), RunnerError>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut stdout_buf = vec![0u8; READ_CHUNK];
    let mut stderr_buf = vec![0u8; READ_CHUNK];
    let mut stdout_done = false;
    let mut stderr_done = false;

    while !(stdout_done && stderr_done) {
        tokio::select! {
            result = stdout_pipe.read(&mut stdout_buf), if !stdout_done => match result {
                Ok(0) => stdout_done = true,
                Ok(n) => stdout_buffer.push(&stdout_buf[..n]),
                Err(e) => return Err(RunnerError::NativeExecutionFailed {
                    reason: format!("Failed to read stdout: {e}"),
                }),
            },
            result = stderr_pipe.read(&mut stderr_buf), if !stderr_done => match result {
                Ok(0) => stderr_done = true,
                Ok(n) => stderr_buffer.push(&stderr_buf[..n]),
                Err(e) => return Err(RunnerError::NativeExecutionFailed {
                    reason: format!("Failed to read stderr: {e}"),
                }),
            },
        }
    }
    Ok(())
}

/// SIGTERM the process group, wait `grace`, then SIGKILL whatever is left
async fn terminate(
    child: &mut tokio::process::Child,
    child_id: Option<u32>,
    grace: Duration,
) -> Option<ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child_id {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let pgid = Pid::from_raw(pid as i32);
        let _ = killpg(pgid, Signal::SIGTERM);
        if let Ok(Ok(status)) = timeout(grace, child.wait()).await {
            let _ = killpg(pgid, Signal::SIGKILL);
            return Some(status);
        }
        let _ = killpg(pgid, Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = (child_id, grace);

    let _ = child.start_kill();
    child.wait().await.ok()
}
