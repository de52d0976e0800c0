use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use audiobatch_config::BatchConfig;
use audiobatch_monitor::{CpuSampler, CpuStats, MonitorConfig, ResourceMonitor, ThrottleSignal};
use audiobatch_state::{BatchCounts, BatchRunRecord, FileResult, PipelineState, PipelineStateStore};
use audiobatch_utils::logging::{batch_span, file_span};
use audiobatch_utils::{AudiobatchError, FileStatus};

use crate::discovery::{InputFile, discover_inputs};
use crate::launcher::{FileLauncher, ProcessLauncher};
use crate::summary::{BatchSummary, aggregate_status};

pub const SKIP_ALREADY_COMPLETED: &str = "already completed";
pub const SKIP_DRY_RUN: &str = "dry run";
pub const INTERRUPTED: &str = "interrupted";

/// Runs a whole input directory through per-file orchestrators.
///
/// Files are launched in isolation through a [`FileLauncher`], at most `max_workers` at a
/// time. Admission of each new file waits while the CPU monitor reports pressure. One
/// [`BatchRunRecord`] is appended to the state document per run.
pub struct BatchScheduler {
    config: BatchConfig,
    launcher: Arc<dyn FileLauncher>,
    sampler: Option<Box<dyn CpuSampler>>,
}

/// Files launched before an interrupt (or all of them) and whether one arrived
struct LaunchOutcome {
    results: Vec<FileResult>,
    interrupted: bool,
}

impl BatchScheduler {
    /// Scheduler that launches the configured orchestrator program per file
    pub fn new(config: BatchConfig) -> Result<Self, AudiobatchError> {
        let launcher = ProcessLauncher::from_config(&config)?;
        Ok(Self::with_launcher(config, Arc::new(launcher)))
    }

    #[must_use]
    pub fn with_launcher(config: BatchConfig, launcher: Arc<dyn FileLauncher>) -> Self {
        Self {
            config,
            launcher,
            sampler: None,
        }
    }

    /// Replace the system CPU sampler
    #[must_use]
    pub fn with_sampler(mut self, sampler: Box<dyn CpuSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run until every file finishes or Ctrl-C arrives
    pub async fn run(self) -> Result<BatchSummary, AudiobatchError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Cannot listen for Ctrl-C; interrupts are disabled");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until every file finishes or `shutdown` completes.
    ///
    /// Only discovery problems are errors. Everything after that is reported in the summary,
    /// including a failure to persist the batch record.
    pub async fn run_until<F>(self, shutdown: F) -> Result<BatchSummary, AudiobatchError>
    where
        F: Future<Output = ()>,
    {
        let run_id = format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            std::process::id()
        );
        let span = batch_span(&run_id);
        self.execute(run_id, shutdown).instrument(span).await
    }

    async fn execute<F>(mut self, run_id: String, shutdown: F) -> Result<BatchSummary, AudiobatchError>
    where
        F: Future<Output = ()>,
    {
        let started_at = Utc::now();
        let started = Instant::now();
        let config = &self.config;

        let inputs = discover_inputs(&config.input_dir, &config.extensions, config.batch_size)?;
        let store = PipelineStateStore::new(config.state_path.clone())
            .with_lock_wait(config.lock_wait)
            .with_holder(format!("audiobatch batch {run_id}"));

        tracing::info!(
            input_dir = %config.input_dir.display(),
            files = inputs.len(),
            max_workers = config.max_workers,
            resume = config.resume,
            dry_run = config.dry_run,
            "Starting batch"
        );

        let prior = if config.resume {
            store.read_async().await
        } else {
            PipelineState::new()
        };
        let (mut results, pending) = partition_completed(&prior, inputs, config.resume);

        let mut stats = CpuStats::default();
        let mut interrupted = false;
        if config.dry_run {
            for (position, input) in pending {
                tracing::info!(file_id = %input.file_id, input = %input.path.display(), "Would process");
                let mut result = skipped(&input, SKIP_DRY_RUN);
                result.dry_run = true;
                results.push((position, result));
            }
        } else if !pending.is_empty() {
            let monitor_config = self.monitor_config();
            let monitor = match self.sampler.take() {
                Some(sampler) => ResourceMonitor::start(monitor_config, sampler),
                None => ResourceMonitor::start_system(monitor_config),
            };
            let outcome = self.launch_all(&pending, monitor.signal(), shutdown).await;
            stats = monitor.stop().await;
            interrupted = outcome.interrupted;
            results.extend(pending.iter().map(|(p, _)| *p).zip(outcome.results));
        }

        results.sort_by_key(|(position, _)| *position);
        let files: Vec<FileResult> = results.into_iter().map(|(_, r)| r).collect();
        let counts = BatchCounts::tally(&files);
        let status = aggregate_status(&counts, interrupted);
        let config = &self.config;

        let record = BatchRunRecord {
            run_id,
            status,
            started_at,
            ended_at: Some(Utc::now()),
            duration_secs: started.elapsed().as_secs_f64(),
            counts,
            avg_cpu: stats.average(),
            peak_cpu: stats.peak(),
            dry_run: config.dry_run,
            interrupted,
            phases: config.phases.enabled.clone(),
            files,
        };

        let to_persist = record.clone();
        let persist_error = match store
            .transact_async(move |state| state.upsert_batch_run(&to_persist))
            .await
        {
            Ok(_) => None,
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist batch record");
                Some(e.to_string())
            }
        };

        tracing::info!(
            status = status.as_str(),
            total = counts.total,
            succeeded = counts.succeeded,
            partial = counts.partial,
            failed = counts.failed,
            skipped = counts.skipped,
            duration_secs = record.duration_secs,
            "Batch finished"
        );
        Ok(BatchSummary {
            record,
            persist_error,
        })
    }

    fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            threshold: self.config.cpu_threshold,
            recovery_threshold: self.config.monitor.recovery_threshold,
            recovery_samples: self.config.monitor.recovery_samples,
            interval: self.config.monitor.sample_interval,
        }
    }

    /// Launch `pending` under the worker bound and throttle, collecting one result per file
    /// in order. After `shutdown` fires, running launches are aborted and every unfinished
    /// file is reported as interrupted.
    async fn launch_all<F>(
        &self,
        pending: &[(usize, InputFile)],
        throttle: ThrottleSignal,
        shutdown: F,
    ) -> LaunchOutcome
    where
        F: Future<Output = ()>,
    {
        let config = &self.config;
        let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
        let mut tasks: JoinSet<(usize, FileResult)> = JoinSet::new();
        let mut task_index = HashMap::new();
        let mut slots: Vec<Option<FileResult>> = vec![None; pending.len()];
        let mut interrupted = false;
        tokio::pin!(shutdown);

        'admit: for (index, (_, input)) in pending.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = &mut shutdown => {
                    interrupted = true;
                    break 'admit;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break 'admit,
                },
            };

            let mut checks = 0;
            while throttle.is_throttled() {
                if checks >= config.throttle_max_checks {
                    tracing::warn!(
                        file_id = %input.file_id,
                        checks,
                        "CPU still under pressure; admitting anyway"
                    );
                    break;
                }
                checks += 1;
                tracing::info!(
                    file_id = %input.file_id,
                    delay_ms = config.throttle_delay.as_millis() as u64,
                    check = checks,
                    "CPU under pressure; delaying admission"
                );
                tokio::select! {
                    biased;
                    () = &mut shutdown => {
                        interrupted = true;
                        break 'admit;
                    }
                    () = tokio::time::sleep(config.throttle_delay) => {}
                }
            }

            let launcher = Arc::clone(&self.launcher);
            let input = input.clone();
            let span = file_span(&input.file_id);
            let handle = tasks.spawn(
                async move {
                    let _permit = permit;
                    (index, launcher.launch(&input).await)
                }
                .instrument(span),
            );
            task_index.insert(handle.id(), index);
        }

        if !interrupted {
            loop {
                tokio::select! {
                    biased;
                    () = &mut shutdown => {
                        interrupted = true;
                        break;
                    }
                    joined = tasks.join_next() => match joined {
                        Some(joined) => record_join(joined, &task_index, pending, &mut slots),
                        None => break,
                    },
                }
            }
        }

        if interrupted {
            tracing::warn!(running = tasks.len(), "Interrupted; stopping running files");
            tasks.abort_all();
            while let Some(joined) = tasks.join_next().await {
                record_join(joined, &task_index, pending, &mut slots);
            }
        }

        let results = pending
            .iter()
            .zip(slots)
            .map(|((_, input), slot)| {
                slot.unwrap_or_else(|| {
                    FileResult::failed(&input.file_id, input.path.display().to_string(), INTERRUPTED)
                })
            })
            .collect();
        LaunchOutcome {
            results,
            interrupted,
        }
    }
}

fn record_join(
    joined: Result<(usize, FileResult), tokio::task::JoinError>,
    task_index: &HashMap<tokio::task::Id, usize>,
    pending: &[(usize, InputFile)],
    slots: &mut [Option<FileResult>],
) {
    match joined {
        Ok((index, result)) => {
            tracing::info!(
                file_id = %result.file_id,
                status = result.status.as_str(),
                "File finished"
            );
            slots[index] = Some(result);
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => {
            let Some(&index) = task_index.get(&e.id()) else {
                tracing::error!(error = %e, "Untracked file task failed");
                return;
            };
            let input = &pending[index].1;
            tracing::error!(file_id = %input.file_id, error = %e, "File task panicked");
            slots[index] = Some(FileResult::failed(
                &input.file_id,
                input.path.display().to_string(),
                format!("file task failed: {e}"),
            ));
        }
    }
}

fn skipped(input: &InputFile, reason: &str) -> FileResult {
    FileResult::skipped(&input.file_id, input.path.display().to_string(), reason)
}

/// Split discovered inputs into skip results for files a previous run completed and the
/// files still to process, each tagged with its discovery position
fn partition_completed(
    prior: &PipelineState,
    inputs: Vec<InputFile>,
    resume: bool,
) -> (Vec<(usize, FileResult)>, Vec<(usize, InputFile)>) {
    let mut done = Vec::new();
    let mut pending = Vec::new();
    for (position, input) in inputs.into_iter().enumerate() {
        if resume && prior.last_batch_status(&input.file_id) == Some(FileStatus::Success) {
            tracing::info!(file_id = %input.file_id, "Already completed; skipping");
            let mut result = skipped(&input, SKIP_ALREADY_COMPLETED);
            if let Some(record) = prior.pipeline_record(&input.file_id) {
                result.phases_completed = record.phases_completed;
            }
            done.push((position, result));
        } else {
            pending.push((position, input));
        }
    }
    (done, pending)
}
