//! End-to-end behavior of the per-file state machine over a scripted process layer

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use serde_json::json;
use tempfile::TempDir;

use audiobatch_config::{OrchestratorConfig, PhaseSettings};
use audiobatch_orchestrator::FileOrchestrator;
use audiobatch_phases::{ENV_PHASE, PhaseRunner};
use audiobatch_runner::{CommandSpec, ExecOptions, ProcessOutput, ProcessRunner, RunnerError};
use audiobatch_state::{PIPELINE_SECTION, PipelineStateStore};
use audiobatch_utils::{FileStatus, PhaseId};

/// One recorded invocation: phase name and optional chunk index
type Call = (String, Option<u32>);

/// Exit code a `FakePhases` closure returns to simulate a hard-timeout kill
const TIMED_OUT: i32 = -1;

/// Decides each invocation's exit code from its phase and chunk
struct FakePhases {
    exit_code: Box<dyn Fn(&str, Option<u32>) -> i32 + Send + Sync>,
    calls: Mutex<Vec<Call>>,
}

impl FakePhases {
    fn new(exit_code: impl Fn(&str, Option<u32>) -> i32 + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            exit_code: Box::new(exit_code),
            calls: Mutex::default(),
        })
    }

    fn all_succeed() -> Arc<Self> {
        Self::new(|_, _| 0)
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn phases_called(&self) -> Vec<String> {
        let mut phases: Vec<String> = Vec::new();
        for (phase, _) in self.calls() {
            if phases.last() != Some(&phase) {
                phases.push(phase);
            }
        }
        phases
    }

    fn chunks_called(&self) -> Vec<u32> {
        let mut chunks: Vec<u32> = self.calls().into_iter().filter_map(|(_, c)| c).collect();
        chunks.sort_unstable();
        chunks
    }
}

#[async_trait]
impl ProcessRunner for FakePhases {
    async fn run(
        &self,
        cmd: &CommandSpec,
        _opts: &ExecOptions,
    ) -> Result<ProcessOutput, RunnerError> {
        let phase = cmd
            .env
            .get(std::ffi::OsStr::new(ENV_PHASE))
            .map(|v| v.to_string_lossy().into_owned())
            .unwrap_or_default();
        let args: Vec<String> = cmd
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let chunk = args
            .iter()
            .position(|a| a == "--chunk-index")
            .and_then(|i| args.get(i + 1))
            .and_then(|c| c.parse().ok());

        self.calls.lock().unwrap().push((phase.clone(), chunk));
        let code = (self.exit_code)(&phase, chunk);
        if code == TIMED_OUT {
            return Ok(ProcessOutput {
                timed_out: true,
                ..ProcessOutput::default()
            });
        }
        Ok(ProcessOutput {
            exit_code: Some(code),
            stderr: if code == 0 { String::new() } else { format!("{phase} broke\n") },
            ..ProcessOutput::default()
        })
    }
}

struct Fixture {
    dir: TempDir,
    input: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("book_01.pdf");
        std::fs::write(&input, "%PDF").unwrap();
        Self { dir, input }
    }

    fn state_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().join("pipeline.json")).unwrap()
    }

    fn store(&self) -> PipelineStateStore {
        PipelineStateStore::new(self.state_path())
    }

    fn settings(&self, enabled: &[PhaseId]) -> PhaseSettings {
        let mut settings = PhaseSettings {
            enabled: enabled.to_vec(),
            root: self.dir.path().join("no-phases-here"),
            max_retries: 1,
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(1),
            log_dir: self.dir.path().join("logs"),
            ..PhaseSettings::default()
        };
        for phase in enabled {
            settings
                .commands
                .insert(*phase, vec![format!("fake-{}", phase.as_str())]);
        }
        settings
    }

    fn orchestrator(
        &self,
        settings: PhaseSettings,
        resume: bool,
        fake: &Arc<FakePhases>,
    ) -> FileOrchestrator {
        let config = OrchestratorConfig {
            state_path: self.state_path(),
            resume,
            phases: settings.clone(),
            lock_wait: Duration::from_secs(5),
        };
        let runner: Arc<dyn ProcessRunner> = fake.clone();
        FileOrchestrator::with_phase_runner(config, PhaseRunner::with_runner(settings, runner))
    }

    fn seed_chunks(&self, count: usize) {
        let artifacts: Vec<String> = (0..count).map(|i| format!("chunk_{i:03}.txt")).collect();
        self.store()
            .transact(|state| {
                state.insert_raw(
                    "segmentation",
                    json!({"status": "success", "files": {"book_01": {"status": "success", "artifacts": artifacts}}}),
                );
            })
            .unwrap();
    }

    fn input(&self) -> &Path {
        &self.input
    }
}

#[tokio::test]
async fn test_all_phases_succeed() {
    let fx = Fixture::new();
    fx.seed_chunks(3);
    let fake = FakePhases::all_succeed();

    let result = fx
        .orchestrator(fx.settings(&PhaseId::ALL), true, &fake)
        .run(fx.input())
        .await;

    assert_eq!(result.status, FileStatus::Success, "{:?}", result.errors);
    assert_eq!(result.file_id, "book_01");
    assert_eq!(result.phases_completed, PhaseId::ALL.to_vec());
    assert!(result.errors.is_empty());
    assert_eq!(
        fake.phases_called(),
        vec!["validation", "extraction", "segmentation", "synthesis", "enhancement"]
    );
    assert_eq!(fake.chunks_called(), vec![0, 1, 2]);

    let record = fx.store().read().pipeline_record("book_01").unwrap();
    assert_eq!(record.status, FileStatus::Success);
    assert_eq!(record.phases_completed, PhaseId::ALL.to_vec());
    assert_eq!(record.chunks_completed, vec![0, 1, 2]);
    assert!(record.timestamps.start.is_some());
    assert!(record.timestamps.end.is_some());
}

#[tokio::test]
async fn test_mid_pipeline_failure_is_partial_and_stops() {
    let fx = Fixture::new();
    let fake = FakePhases::new(|phase, _| i32::from(phase == "extraction"));

    let result = fx
        .orchestrator(fx.settings(&PhaseId::ALL), true, &fake)
        .run(fx.input())
        .await;

    assert_eq!(result.status, FileStatus::Partial);
    assert_eq!(result.phases_completed, vec![PhaseId::Validation]);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("extraction exited with code 1"));
    assert_eq!(fake.phases_called(), vec!["validation", "extraction"]);

    let record = fx.store().read().pipeline_record("book_01").unwrap();
    assert_eq!(record.status, FileStatus::Partial);
    assert_eq!(record.errors, result.errors);
}

#[tokio::test]
async fn test_first_phase_failure_is_failed_with_nothing_completed() {
    let fx = Fixture::new();
    let fake = FakePhases::new(|_, _| 2);

    let result = fx
        .orchestrator(fx.settings(&PhaseId::ALL), true, &fake)
        .run(fx.input())
        .await;

    assert_eq!(result.status, FileStatus::Failed);
    assert!(result.phases_completed.is_empty());
    let record = fx.store().read().pipeline_record("book_01").unwrap();
    assert_eq!(record.status, FileStatus::Failed);
    assert!(record.phases_completed.is_empty());
}

#[tokio::test]
async fn test_resume_skips_completed_phases() {
    let fx = Fixture::new();
    let first = FakePhases::new(|phase, _| i32::from(phase == "segmentation"));
    let enabled = [PhaseId::Validation, PhaseId::Extraction, PhaseId::Segmentation];
    fx.orchestrator(fx.settings(&enabled), true, &first)
        .run(fx.input())
        .await;

    let second = FakePhases::all_succeed();
    let result = fx
        .orchestrator(fx.settings(&enabled), true, &second)
        .run(fx.input())
        .await;

    assert_eq!(result.status, FileStatus::Success);
    assert_eq!(second.phases_called(), vec!["segmentation"]);
    assert_eq!(result.phases_completed, enabled.to_vec());
    let record = fx.store().read().pipeline_record("book_01").unwrap();
    assert!(record.errors.is_empty());
}

#[tokio::test]
async fn test_without_resume_everything_reruns() {
    let fx = Fixture::new();
    let enabled = [PhaseId::Validation, PhaseId::Extraction];
    fx.orchestrator(fx.settings(&enabled), true, &FakePhases::all_succeed())
        .run(fx.input())
        .await;

    let again = FakePhases::all_succeed();
    let result = fx
        .orchestrator(fx.settings(&enabled), false, &again)
        .run(fx.input())
        .await;
    assert_eq!(result.status, FileStatus::Success);
    assert_eq!(again.phases_called(), vec!["validation", "extraction"]);
}

#[tokio::test]
async fn test_failed_chunk_fails_synthesis_and_keeps_finished_chunks() {
    let fx = Fixture::new();
    fx.seed_chunks(4);
    let enabled = [PhaseId::Synthesis, PhaseId::Enhancement];
    let fake = FakePhases::new(|_, chunk| i32::from(chunk == Some(2)));

    let result = fx
        .orchestrator(fx.settings(&enabled), true, &fake)
        .run(fx.input())
        .await;

    assert_eq!(result.status, FileStatus::Failed);
    assert_eq!(fake.chunks_called(), vec![0, 1, 2, 3]);
    assert!(!fake.phases_called().contains(&"enhancement".to_string()));
    assert!(result.errors.iter().any(|e| e.contains("synthesis chunk 2")));
    assert!(result.errors.iter().any(|e| e.contains("1 of 4 chunks failed")));

    let record = fx.store().read().pipeline_record("book_01").unwrap();
    assert_eq!(record.chunks_completed, vec![0, 1, 3]);

    // Only the failed chunk runs again on resume
    let retry = FakePhases::all_succeed();
    let result = fx
        .orchestrator(fx.settings(&enabled), true, &retry)
        .run(fx.input())
        .await;
    assert_eq!(result.status, FileStatus::Success);
    assert_eq!(retry.chunks_called(), vec![2]);
    assert_eq!(retry.phases_called(), vec!["synthesis", "enhancement"]);
}

#[tokio::test]
async fn test_chunk_fan_out_aborts_past_failure_ratio() {
    let fx = Fixture::new();
    fx.seed_chunks(6);
    let fake = FakePhases::new(|_, _| 1);

    let result = fx
        .orchestrator(fx.settings(&[PhaseId::Synthesis]), true, &fake)
        .run(fx.input())
        .await;

    assert_eq!(result.status, FileStatus::Failed);
    // 4 failures out of 6 exceed one half; the remaining 2 are never started
    assert_eq!(fake.calls().len(), 4);
    assert!(result.errors.iter().any(|e| e.contains("2 abandoned")));
}

#[tokio::test]
async fn test_parallel_chunks_all_complete() {
    let fx = Fixture::new();
    fx.seed_chunks(8);
    let fake = FakePhases::all_succeed();
    let settings = PhaseSettings {
        chunk_workers: 3,
        ..fx.settings(&[PhaseId::Synthesis])
    };

    let result = fx.orchestrator(settings, true, &fake).run(fx.input()).await;
    assert_eq!(result.status, FileStatus::Success);
    assert_eq!(fake.chunks_called(), (0..8).collect::<Vec<_>>());
    let record = fx.store().read().pipeline_record("book_01").unwrap();
    assert_eq!(record.chunks_completed, (0..8).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_missing_segmentation_record_means_no_chunks() {
    let fx = Fixture::new();
    let fake = FakePhases::all_succeed();

    let result = fx
        .orchestrator(fx.settings(&[PhaseId::Synthesis]), true, &fake)
        .run(fx.input())
        .await;

    assert_eq!(result.status, FileStatus::Failed);
    assert!(result.errors[0].contains("No synthesis chunks"));
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn test_unresolvable_phase_is_recorded_as_failure() {
    let fx = Fixture::new();
    let mut settings = fx.settings(&[PhaseId::Validation, PhaseId::Extraction]);
    settings.commands.remove(&PhaseId::Extraction);
    let fake = FakePhases::all_succeed();

    let result = fx.orchestrator(settings, true, &fake).run(fx.input()).await;

    assert_eq!(result.status, FileStatus::Partial);
    assert!(result.errors[0].contains("No executable found for phase extraction"));
}

#[tokio::test]
async fn test_foreign_sections_survive_orchestration() {
    let fx = Fixture::new();
    fx.store()
        .transact(|state| {
            state.insert_raw(
                "validation",
                json!({"files": {"book_01": {"status": "success", "metrics": {"pages": 12}}}}),
            );
            state.insert_raw("custom", json!({"owner": "someone else"}));
        })
        .unwrap();

    fx.orchestrator(
        fx.settings(&[PhaseId::Validation]),
        true,
        &FakePhases::all_succeed(),
    )
    .run(fx.input())
    .await;

    let state = fx.store().read();
    assert_eq!(state.get("custom"), Some(&json!({"owner": "someone else"})));
    assert_eq!(
        state.file_entry("validation", "book_01").unwrap()["metrics"]["pages"],
        12
    );
    assert_eq!(state.file_ids(PIPELINE_SECTION), vec!["book_01".to_string()]);
}

#[tokio::test]
async fn test_timed_out_phase_after_a_success_is_partial() {
    let fx = Fixture::new();
    let fake = FakePhases::new(|phase, _| if phase == "extraction" { TIMED_OUT } else { 0 });
    let settings = PhaseSettings {
        max_retries: 2,
        ..fx.settings(&PhaseId::ALL)
    };

    let result = fx.orchestrator(settings, true, &fake).run(fx.input()).await;

    assert_eq!(result.status, FileStatus::Partial);
    assert_eq!(result.phases_completed, vec![PhaseId::Validation]);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("extraction timeout"), "{:?}", result.errors);
    assert!(result.errors[0].ends_with("(2 attempts)"));
    let extraction_calls = fake.calls().iter().filter(|(p, _)| p == "extraction").count();
    assert_eq!(extraction_calls, 2);
    assert_eq!(fake.phases_called(), vec!["validation", "extraction"]);

    let record = fx.store().read().pipeline_record("book_01").unwrap();
    assert_eq!(record.status, FileStatus::Partial);
    assert_eq!(record.phases_completed, vec![PhaseId::Validation]);
    assert!(record.errors[0].contains("timeout"));
}

#[tokio::test]
async fn test_timed_out_first_phase_is_failed() {
    let fx = Fixture::new();
    let fake = FakePhases::new(|_, _| TIMED_OUT);

    let result = fx
        .orchestrator(fx.settings(&PhaseId::ALL), true, &fake)
        .run(fx.input())
        .await;

    assert_eq!(result.status, FileStatus::Failed);
    assert!(result.phases_completed.is_empty());
    assert!(result.errors[0].starts_with("validation timeout"));
    assert_eq!(fake.phases_called(), vec!["validation"]);

    let record = fx.store().read().pipeline_record("book_01").unwrap();
    assert_eq!(record.status, FileStatus::Failed);
    assert!(record.phases_completed.is_empty());
}

#[tokio::test]
async fn test_stored_progress_follows_the_current_phase_list() {
    let fx = Fixture::new();
    fx.orchestrator(
        fx.settings(&[PhaseId::Validation]),
        true,
        &FakePhases::all_succeed(),
    )
    .run(fx.input())
    .await;

    // Validation is no longer enabled and extraction fails: nothing of this run completed
    let failing = FakePhases::new(|_, _| 1);
    let result = fx
        .orchestrator(fx.settings(&[PhaseId::Extraction]), true, &failing)
        .run(fx.input())
        .await;
    assert_eq!(result.status, FileStatus::Failed);
    assert!(result.phases_completed.is_empty());
    let record = fx.store().read().pipeline_record("book_01").unwrap();
    assert_eq!(record.status, FileStatus::Failed);
    assert!(record.phases_completed.is_empty());

    let result = fx
        .orchestrator(
            fx.settings(&[PhaseId::Extraction]),
            true,
            &FakePhases::all_succeed(),
        )
        .run(fx.input())
        .await;
    assert_eq!(result.status, FileStatus::Success);
    let record = fx.store().read().pipeline_record("book_01").unwrap();
    assert_eq!(record.status, FileStatus::Success);
    assert_eq!(record.phases_completed, vec![PhaseId::Extraction]);
}
