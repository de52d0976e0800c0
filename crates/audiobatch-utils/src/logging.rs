//! Logging and observability infrastructure for audiobatch
//!
//! Logs always go to stderr so stdout stays reserved for machine-readable output
//! (`--json` summaries and the per-file report the batch driver parses).

use tracing::{Level, info, span, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Subscriber settings derived from the global CLI flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Raise the default filter to debug and include targets and span timings
    pub verbose: bool,
    /// Emit one JSON object per line instead of the compact human format
    pub json: bool,
}

fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "audiobatch=debug,info"
    } else {
        "audiobatch=info,warn"
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. Fails if a subscriber is already installed.
pub fn init_tracing(opts: LogOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(opts.verbose)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    if opts.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()?;
    } else if opts.verbose {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

/// Span covering one batch invocation
pub fn batch_span(run_id: &str) -> tracing::Span {
    span!(Level::INFO, "batch", run_id = %run_id)
}

/// Span covering one file's trip through its phases
pub fn file_span(file_id: &str) -> tracing::Span {
    span!(Level::INFO, "file", file_id = %file_id)
}

/// Span covering one phase invocation (chunk is set for synthesis fan-out)
pub fn phase_span(file_id: &str, phase: &str, chunk: Option<u32>) -> tracing::Span {
    match chunk {
        Some(chunk) => span!(Level::INFO, "phase", file_id = %file_id, phase = %phase, chunk),
        None => span!(Level::INFO, "phase", file_id = %file_id, phase = %phase),
    }
}

pub fn log_phase_start(file_id: &str, phase: &str) {
    info!(file_id = %file_id, phase = %phase, "Starting phase");
}

pub fn log_phase_complete(file_id: &str, phase: &str, duration_ms: u128) {
    info!(
        file_id = %file_id,
        phase = %phase,
        duration_ms = %duration_ms,
        "Phase completed"
    );
}

pub fn log_phase_error(file_id: &str, phase: &str, error: &str, duration_ms: u128) {
    warn!(
        file_id = %file_id,
        phase = %phase,
        error = %error,
        duration_ms = %duration_ms,
        "Phase failed"
    );
}
