//! CLI entry point and dispatch
//!
//! `run()` owns all terminal output, errors included. It parses arguments, layers the
//! configuration, installs logging, builds the tokio runtime and hands off to one command.

use clap::Parser;

use audiobatch_config::{CliArgs, Config};
use audiobatch_utils::logging::{LogOptions, init_tracing};
use audiobatch_utils::{AudiobatchError, ConfigError, ExitCode, parse_phase_list};

use super::args::{Cli, Commands, PhaseArgs};
use super::commands;

/// Main CLI execution function.
///
/// Returns `Err(code)` for any non-zero outcome; main only maps it to the process exit.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(LogOptions {
        verbose: cli.verbose,
        json: cli.log_json,
    }) {
        eprintln!("warning: logging unavailable: {e}");
    }

    let operation = cli.command.operation();
    let config = match build_cli_args(&cli).and_then(|args| Config::discover(&args)) {
        Ok(config) => config,
        Err(err) => {
            let error = anyhow::Error::from(AudiobatchError::Config(err));
            return Err(report(&error, "config"));
        }
    };
    if let Some(path) = &config.batch.config_file {
        tracing::debug!(config_file = %path.display(), "Loaded configuration");
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::FAILURE);
        }
    };

    let result = rt.block_on(async {
        match &cli.command {
            Commands::Run { input, json, .. } => {
                commands::execute_run_command(input, *json, &config).await
            }
            Commands::Batch { json, .. } => commands::execute_batch_command(*json, &config).await,
            Commands::Status { json, .. } => commands::execute_status_command(*json, &config),
            Commands::Config => commands::execute_config_command(&config),
        }
    });

    match result {
        Ok(code) if code == ExitCode::SUCCESS => Ok(()),
        Ok(code) => Err(code),
        Err(error) => Err(report(&error, operation)),
    }
}

/// Flatten the parsed command line into the configuration overlay
pub(crate) fn build_cli_args(cli: &Cli) -> Result<CliArgs, ConfigError> {
    let mut args = CliArgs {
        config_path: cli.config.clone(),
        ..CliArgs::default()
    };

    match &cli.command {
        Commands::Run { phase, .. } => apply_phase_args(&mut args, phase)?,
        Commands::Batch {
            input_dir,
            max_workers,
            cpu_threshold,
            throttle_delay,
            dry_run,
            batch_size,
            orchestrator,
            phase,
            ..
        } => {
            args.input_dir = input_dir.clone();
            args.max_workers = *max_workers;
            args.cpu_threshold = *cpu_threshold;
            args.throttle_delay_secs = *throttle_delay;
            args.dry_run = dry_run.then_some(true);
            args.batch_size = *batch_size;
            args.orchestrator = orchestrator.clone();
            apply_phase_args(&mut args, phase)?;
        }
        Commands::Status { state, .. } => args.state_path = state.clone(),
        Commands::Config => {}
    }

    Ok(args)
}

fn apply_phase_args(args: &mut CliArgs, phase: &PhaseArgs) -> Result<(), ConfigError> {
    args.state_path = phase.state.clone();
    args.resume = phase.resume_override();
    args.max_retries = phase.max_retries;
    args.phase_timeout_secs = phase.phase_timeout;
    args.phases_root = phase.phases_root.clone();
    if let Some(list) = &phase.phases {
        let phases = parse_phase_list(list).map_err(|e| ConfigError::InvalidValue {
            key: "phases".to_string(),
            value: e.to_string(),
        })?;
        args.phases = Some(phases);
    }
    Ok(())
}

/// Print an error with its category and hints; returns the exit code to use
fn report(error: &anyhow::Error, operation: &str) -> ExitCode {
    let Some(err) = error.downcast_ref::<AudiobatchError>() else {
        eprintln!("✗ {operation} failed: {error:#}");
        eprintln!("\n  Run with --verbose for more detailed output");
        return ExitCode::FAILURE;
    };

    eprintln!("✗ {operation} failed: {err}");
    eprintln!("  Category: {}", err.category());
    let suggestions = err.suggestions();
    if !suggestions.is_empty() {
        eprintln!("\n  Suggestions:");
        for (i, suggestion) in suggestions.iter().enumerate() {
            eprintln!("    {}. {}", i + 1, suggestion);
        }
    }
    err.to_exit_code()
}
