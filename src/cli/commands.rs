//! Command implementations
//!
//! Each command returns the exit code it wants; errors are reported by the caller.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

use audiobatch_batch::{BatchScheduler, BatchSummary};
use audiobatch_config::Config;
use audiobatch_orchestrator::FileOrchestrator;
use audiobatch_state::{
    FileResult, PIPELINE_SECTION, PhaseFileRecord, PipelineState, PipelineStateStore,
};
use audiobatch_utils::ExitCode;

/// Resolves on Ctrl-C, or SIGTERM on unix (how a batch driver stops its per-file children)
async fn interrupted() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if result.is_err() {
                            term.recv().await;
                        }
                    }
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "Cannot listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl-C; interrupts are disabled");
        std::future::pending::<()>().await;
    }
}

/// `audiobatch run <file>`
pub async fn execute_run_command(input: &Path, json: bool, config: &Config) -> Result<ExitCode> {
    let orchestrator = FileOrchestrator::new(config.orchestrator_config());

    let result = tokio::select! {
        result = orchestrator.run(input) => result,
        () = interrupted() => {
            tracing::warn!(input = %input.display(), "Interrupted; progress so far is kept");
            return Ok(ExitCode::INTERRUPTED);
        }
    };

    if json {
        let body = serde_json::to_string(&result).context("Failed to serialize file result")?;
        println!("{body}");
    } else {
        print!("{}", render_file_result(&result));
    }
    Ok(ExitCode::from(result.status))
}

fn render_file_result(result: &FileResult) -> String {
    let mut out = String::new();
    let phases = result
        .phases_completed
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(
        out,
        "{}: {} in {:.1}s",
        result.file_id,
        result.status.as_str(),
        result.duration_secs
    );
    let _ = writeln!(
        out,
        "  Completed: {}",
        if phases.is_empty() { "-" } else { phases.as_str() }
    );
    for error in &result.errors {
        let _ = writeln!(out, "  ✗ {error}");
    }
    out
}

/// `audiobatch batch`
pub async fn execute_batch_command(json: bool, config: &Config) -> Result<ExitCode> {
    let scheduler = BatchScheduler::new(config.batch.clone())?;
    let summary = scheduler.run().await?;

    if json {
        let body =
            serde_json::to_string_pretty(&summary).context("Failed to serialize batch summary")?;
        println!("{body}");
    } else {
        print!("{}", summary.render_table());
    }
    Ok(summary.exit_code())
}

/// `audiobatch status`
pub fn execute_status_command(json: bool, config: &Config) -> Result<ExitCode> {
    let state_path = &config.batch.state_path;
    let state = PipelineStateStore::new(state_path.clone()).read();
    let files = pipeline_records(&state);
    let latest = state.latest_batch_run();

    if json {
        let body = serde_json::to_string_pretty(&json!({
            "state_path": state_path.as_str(),
            "latest_batch_run": latest,
            "files": files,
        }))
        .context("Failed to serialize status")?;
        println!("{body}");
        return Ok(ExitCode::SUCCESS);
    }

    println!("State: {state_path}");
    if state.is_empty() {
        println!("  No pipeline state recorded yet");
        return Ok(ExitCode::SUCCESS);
    }

    match latest {
        Some(record) => {
            let summary = BatchSummary {
                record,
                persist_error: None,
            };
            print!("\nLatest {}", summary.render_table());
        }
        None => println!("\nNo batch runs recorded"),
    }

    if !files.is_empty() {
        println!("\nFiles:");
        let width = files.keys().map(String::len).max().unwrap_or(0);
        for (file_id, record) in &files {
            let phases = record
                .phases_completed
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            println!(
                "  {file_id:<width$}  {:<8}  {}",
                record.status.as_str(),
                if phases.is_empty() { "-" } else { phases.as_str() }
            );
            if let Some(error) = record.errors.last() {
                println!("  {:<width$}  ✗ {error}", "");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn pipeline_records(state: &PipelineState) -> BTreeMap<String, PhaseFileRecord> {
    state
        .file_ids(PIPELINE_SECTION)
        .into_iter()
        .filter_map(|id| state.pipeline_record(&id).map(|record| (id, record)))
        .collect()
}

/// `audiobatch config`
pub fn execute_config_command(config: &Config) -> Result<ExitCode> {
    match &config.batch.config_file {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (none, using defaults)"),
    }
    println!();

    let effective = config.effective_config();
    let width = effective.keys().map(String::len).max().unwrap_or(0);
    for (key, (value, source)) in &effective {
        println!("  {key:<width$} = {value}  [{source}]");
    }
    Ok(ExitCode::SUCCESS)
}
