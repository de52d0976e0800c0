use camino::Utf8PathBuf;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use audiobatch_utils::{ConfigError, PhaseId};

use crate::model::{BatchConfig, CliArgs, ConfigSource, TomlConfig};
use crate::Config;

/// Directory searched for while walking up from the start directory
pub const CONFIG_DIR: &str = ".audiobatch";
pub const CONFIG_FILE: &str = "config.toml";

fn set<T>(
    attribution: &mut HashMap<String, ConfigSource>,
    key: &str,
    slot: &mut T,
    value: Option<T>,
    source: &ConfigSource,
) {
    if let Some(value) = value {
        *slot = value;
        attribution.insert(key.to_string(), source.clone());
    }
}

fn parse_phase(key: &str, name: &str) -> Result<PhaseId, ConfigError> {
    name.parse().map_err(|e: audiobatch_utils::UnknownPhase| ConfigError::InvalidValue {
        key: key.to_string(),
        value: e.to_string(),
    })
}

fn secs_f64(key: &str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: format!("{secs} is not a valid non-negative number of seconds"),
    })
}

fn utf8_state_path(path: PathBuf) -> Result<Utf8PathBuf, ConfigError> {
    Utf8PathBuf::from_path_buf(path).map_err(|p| ConfigError::InvalidValue {
        key: "state_path".to_string(),
        value: format!("{} is not valid UTF-8", p.display()),
    })
}

impl Config {
    /// Discover and load configuration with precedence: CLI > file > defaults
    pub fn discover(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let start_dir = std::env::current_dir().map_err(|e| ConfigError::DiscoveryFailed {
            reason: format!("Failed to get current directory: {e}"),
        })?;
        Self::discover_from(&start_dir, cli_args)
    }

    /// Discover and load configuration starting from a specific directory.
    ///
    /// The path-driven variant keeps tests independent of the process working directory.
    pub fn discover_from(start_dir: &Path, cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut attribution = HashMap::new();
        let mut batch = BatchConfig::default();
        let mut recovery_threshold: Option<f32> = None;

        let config_path = match &cli_args.config_path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(ConfigError::NotFound {
                        path: explicit.display().to_string(),
                    });
                }
                Some(explicit.clone())
            }
            None => Self::discover_config_file_from(start_dir),
        };

        if let Some(path) = &config_path {
            let file = Self::load_config_file(path)?;
            let src = ConfigSource::ConfigFile(path.clone());
            let a = &mut attribution;

            if let Some(b) = file.batch {
                set(a, "input_dir", &mut batch.input_dir, b.input_dir, &src);
                if let Some(state_path) = b.state_path {
                    set(a, "state_path", &mut batch.state_path, Some(utf8_state_path(state_path)?), &src);
                }
                set(a, "max_workers", &mut batch.max_workers, b.max_workers, &src);
                set(a, "cpu_threshold", &mut batch.cpu_threshold, b.cpu_threshold, &src);
                if let Some(secs) = b.throttle_delay_secs {
                    let delay = secs_f64("throttle_delay_secs", secs)?;
                    set(a, "throttle_delay", &mut batch.throttle_delay, Some(delay), &src);
                }
                set(a, "throttle_max_checks", &mut batch.throttle_max_checks, b.throttle_max_checks, &src);
                set(a, "resume", &mut batch.resume, b.resume, &src);
                set(a, "batch_size", &mut batch.batch_size, b.batch_size.map(Some), &src);
                set(a, "extensions", &mut batch.extensions, b.extensions, &src);
                set(a, "orchestrator", &mut batch.orchestrator, b.orchestrator.map(Some), &src);
            }

            if let Some(p) = file.phases {
                let phases = &mut batch.phases;
                if let Some(names) = p.enabled {
                    let enabled = names
                        .iter()
                        .map(|n| parse_phase("phases.enabled", n))
                        .collect::<Result<Vec<_>, _>>()?;
                    set(a, "phases", &mut phases.enabled, Some(enabled), &src);
                }
                set(a, "phases_root", &mut phases.root, p.root, &src);
                set(a, "phase_timeout", &mut phases.timeout, p.timeout_secs.map(Duration::from_secs), &src);
                set(a, "max_retries", &mut phases.max_retries, p.max_retries, &src);
                set(
                    a,
                    "retry_base_delay",
                    &mut phases.retry_base_delay,
                    p.retry_base_delay_ms.map(Duration::from_millis),
                    &src,
                );
                set(
                    a,
                    "retry_max_delay",
                    &mut phases.retry_max_delay,
                    p.retry_max_delay_ms.map(Duration::from_millis),
                    &src,
                );
                set(a, "chunk_workers", &mut phases.chunk_workers, p.chunk_workers, &src);
                set(a, "chunk_abort_ratio", &mut phases.chunk_abort_ratio, p.chunk_abort_ratio, &src);
                set(a, "interpreter", &mut phases.interpreter, p.interpreter, &src);
                set(a, "log_dir", &mut phases.log_dir, p.log_dir, &src);
                set(a, "kill_grace", &mut phases.kill_grace, p.kill_grace_secs.map(Duration::from_secs), &src);
                if let Some(commands) = p.commands {
                    let mut parsed = BTreeMap::new();
                    for (name, argv) in commands {
                        let phase = parse_phase("phases.commands", &name)?;
                        a.insert(format!("commands.{phase}"), src.clone());
                        parsed.insert(phase, argv);
                    }
                    phases.commands = parsed;
                }
            }

            if let Some(m) = file.monitor {
                set(
                    a,
                    "sample_interval",
                    &mut batch.monitor.sample_interval,
                    m.sample_interval_ms.map(Duration::from_millis),
                    &src,
                );
                if let Some(threshold) = m.recovery_threshold {
                    recovery_threshold = Some(threshold);
                    a.insert("recovery_threshold".to_string(), src.clone());
                }
                set(a, "recovery_samples", &mut batch.monitor.recovery_samples, m.recovery_samples, &src);
            }

            if let Some(s) = file.state {
                set(a, "lock_wait", &mut batch.lock_wait, s.lock_wait_secs.map(Duration::from_secs), &src);
            }

            batch.config_file = Some(path.clone());
        }

        // CLI overrides everything
        let cli = ConfigSource::Cli;
        let a = &mut attribution;
        set(a, "input_dir", &mut batch.input_dir, cli_args.input_dir.clone(), &cli);
        if let Some(state_path) = cli_args.state_path.clone() {
            set(a, "state_path", &mut batch.state_path, Some(utf8_state_path(state_path)?), &cli);
        }
        set(a, "max_workers", &mut batch.max_workers, cli_args.max_workers, &cli);
        set(a, "cpu_threshold", &mut batch.cpu_threshold, cli_args.cpu_threshold, &cli);
        if let Some(secs) = cli_args.throttle_delay_secs {
            let delay = secs_f64("throttle_delay", secs)?;
            set(a, "throttle_delay", &mut batch.throttle_delay, Some(delay), &cli);
        }
        set(a, "resume", &mut batch.resume, cli_args.resume, &cli);
        set(a, "dry_run", &mut batch.dry_run, cli_args.dry_run, &cli);
        set(a, "batch_size", &mut batch.batch_size, cli_args.batch_size.map(Some), &cli);
        set(a, "phases", &mut batch.phases.enabled, cli_args.phases.clone(), &cli);
        set(
            a,
            "phase_timeout",
            &mut batch.phases.timeout,
            cli_args.phase_timeout_secs.map(Duration::from_secs),
            &cli,
        );
        set(a, "max_retries", &mut batch.phases.max_retries, cli_args.max_retries, &cli);
        set(a, "phases_root", &mut batch.phases.root, cli_args.phases_root.clone(), &cli);
        set(a, "orchestrator", &mut batch.orchestrator, cli_args.orchestrator.clone().map(Some), &cli);

        // The recovery threshold tracks the effective CPU threshold unless pinned
        batch.monitor.recovery_threshold =
            recovery_threshold.unwrap_or(batch.cpu_threshold - 10.0);
        batch.extensions = batch
            .extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        let config = Config {
            batch,
            source_attribution: attribution,
        };
        config.validate()?;
        Ok(config)
    }

    /// Walk up from `start_dir` looking for `.audiobatch/config.toml`, stopping at
    /// repository root markers (.git, .hg, .svn) or the filesystem root.
    #[must_use]
    pub fn discover_config_file_from(start_dir: &Path) -> Option<PathBuf> {
        let mut current = Some(start_dir);

        while let Some(dir) = current {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }
            if dir.join(".git").exists() || dir.join(".hg").exists() || dir.join(".svn").exists()
            {
                break;
            }
            current = dir.parent();
        }

        None
    }

    fn load_config_file(path: &Path) -> Result<TomlConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::InvalidFile(format!("Failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| {
            ConfigError::InvalidFile(format!("Failed to parse {}: {e}", path.display()))
        })
    }
}
