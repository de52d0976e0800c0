use std::collections::BTreeMap;
use std::time::Duration;

use crate::Config;
use crate::model::ConfigSource;

fn stable_source_label(source: &ConfigSource) -> &'static str {
    match source {
        ConfigSource::Cli => "cli",
        ConfigSource::ConfigFile(_) => "config",
        ConfigSource::Default => "default",
    }
}

fn secs(d: Duration) -> String {
    format!("{}s", d.as_secs_f64())
}

impl Config {
    /// Label for where `key` came from; unattributed keys are defaults
    #[must_use]
    pub fn source_of(&self, key: &str) -> &'static str {
        self.source_attribution
            .get(key)
            .map_or("default", stable_source_label)
    }

    /// Effective configuration as `key -> (value, source)`, sorted by key
    #[must_use]
    pub fn effective_config(&self) -> BTreeMap<String, (String, String)> {
        let b = &self.batch;
        let p = &b.phases;
        let mut out = BTreeMap::new();
        let mut add = |key: &str, value: String| {
            out.insert(key.to_string(), (value, self.source_of(key).to_string()));
        };

        add("input_dir", b.input_dir.display().to_string());
        add("state_path", b.state_path.to_string());
        add("max_workers", b.max_workers.to_string());
        add("cpu_threshold", b.cpu_threshold.to_string());
        add("throttle_delay", secs(b.throttle_delay));
        add("throttle_max_checks", b.throttle_max_checks.to_string());
        add("resume", b.resume.to_string());
        add("dry_run", b.dry_run.to_string());
        add(
            "batch_size",
            b.batch_size.map_or_else(|| "unlimited".to_string(), |n| n.to_string()),
        );
        add("extensions", b.extensions.join(", "));
        add(
            "orchestrator",
            b.orchestrator
                .as_ref()
                .map_or_else(|| "<current executable>".to_string(), |p| p.display().to_string()),
        );
        add(
            "phases",
            p.enabled.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", "),
        );
        add("phases_root", p.root.display().to_string());
        add("phase_timeout", secs(p.timeout));
        add("max_retries", p.max_retries.to_string());
        add("retry_base_delay", secs(p.retry_base_delay));
        add("retry_max_delay", secs(p.retry_max_delay));
        add("chunk_workers", p.chunk_workers.to_string());
        add("chunk_abort_ratio", p.chunk_abort_ratio.to_string());
        add("interpreter", p.interpreter.clone());
        add("log_dir", p.log_dir.display().to_string());
        add("kill_grace", secs(p.kill_grace));
        for (phase, argv) in &p.commands {
            add(&format!("commands.{phase}"), argv.join(" "));
        }
        add("sample_interval", secs(b.monitor.sample_interval));
        add("recovery_threshold", b.monitor.recovery_threshold.to_string());
        add("recovery_samples", b.monitor.recovery_samples.to_string());
        add("lock_wait", secs(b.lock_wait));

        out
    }
}
