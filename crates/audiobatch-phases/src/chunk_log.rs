use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;

use audiobatch_runner::{CommandSpec, ProcessOutput};
use audiobatch_utils::PhaseId;
use audiobatch_utils::atomic_write::write_file_atomic;

use crate::invoke::{InvokeRequest, PhaseResult};

/// `<log_dir>/<file_id>/<phase>-chunk-<nnn>.log`
#[must_use]
pub fn chunk_log_path(log_dir: &Path, file_id: &str, phase: PhaseId, chunk: u32) -> PathBuf {
    log_dir
        .join(file_id)
        .join(format!("{}-chunk-{chunk:03}.log", phase.as_str()))
}

/// Best effort; a log that cannot be written is reported and otherwise ignored
pub(crate) fn write(
    path: &Path,
    request: &InvokeRequest,
    cmd: &CommandSpec,
    result: &PhaseResult,
    last_output: Option<&ProcessOutput>,
) {
    let Ok(path) = Utf8PathBuf::from_path_buf(path.to_path_buf()) else {
        tracing::warn!(path = %path.display(), "Chunk log path is not UTF-8; skipping");
        return;
    };

    let body = render(request, cmd, result, last_output);
    match write_file_atomic(&path, &body) {
        Ok(_) => tracing::info!(log = %path, "Wrote chunk failure log"),
        Err(e) => tracing::warn!(log = %path, error = %format!("{e:#}"), "Failed to write chunk log"),
    }
}

fn render(
    request: &InvokeRequest,
    cmd: &CommandSpec,
    result: &PhaseResult,
    last_output: Option<&ProcessOutput>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "file_id:  {}", request.file_id);
    let _ = writeln!(out, "phase:    {}", result.phase);
    if let Some(chunk) = result.chunk {
        let _ = writeln!(out, "chunk:    {chunk}");
    }
    let _ = writeln!(out, "command:  {cmd}");
    let _ = writeln!(out, "attempts: {}", result.attempts);
    let _ = writeln!(out, "duration: {:.3}s", result.duration.as_secs_f64());
    let _ = writeln!(out, "outcome:  {}", result.outcome);

    match last_output {
        Some(output) => {
            if let Some(code) = output.exit_code {
                let _ = writeln!(out, "exit:     {code}");
            }
            section(&mut out, "stdout", &output.stdout, output.stdout_truncated);
            section(&mut out, "stderr", &output.stderr, output.stderr_truncated);
        }
        None => {
            let _ = writeln!(out, "\n(no output captured)");
        }
    }
    out
}

fn section(out: &mut String, name: &str, text: &str, truncated: bool) {
    let note = if truncated { " (truncated, most recent output)" } else { "" };
    let _ = writeln!(out, "\n--- {name}{note} ---");
    out.push_str(text);
    if !text.ends_with('\n') {
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::PhaseOutcome;
    use std::time::Duration;

    #[test]
    fn test_chunk_log_path_is_zero_padded() {
        let path = chunk_log_path(Path::new("logs"), "book", PhaseId::Synthesis, 7);
        assert_eq!(path, PathBuf::from("logs/book/synthesis-chunk-007.log"));
        let path = chunk_log_path(Path::new("logs"), "book", PhaseId::Synthesis, 1234);
        assert!(path.ends_with("synthesis-chunk-1234.log"));
    }

    #[test]
    fn test_render_includes_outcome_and_streams() {
        let request = InvokeRequest::new("book", "/s.json").with_chunk(3);
        let cmd = CommandSpec::new("synth").arg("--chunk-index").arg("3");
        let result = PhaseResult {
            phase: PhaseId::Synthesis,
            chunk: Some(3),
            outcome: PhaseOutcome::SubprocessFailure {
                exit_code: Some(2),
                stdout_tail: String::new(),
                stderr_tail: "voice model missing".to_string(),
            },
            attempts: 3,
            duration: Duration::from_millis(1500),
        };
        let output = ProcessOutput {
            stdout: "loading".to_string(),
            stderr: "voice model missing\n".to_string(),
            exit_code: Some(2),
            stderr_truncated: true,
            ..ProcessOutput::default()
        };

        let text = render(&request, &cmd, &result, Some(&output));
        assert!(text.contains("chunk:    3"));
        assert!(text.contains("attempts: 3"));
        assert!(text.contains("duration: 1.500s"));
        assert!(text.contains("exited with code 2: voice model missing"));
        assert!(text.contains("--- stdout ---\nloading\n"));
        assert!(text.contains("--- stderr (truncated, most recent output) ---"));
    }
}
