use std::collections::HashSet;

use audiobatch_utils::ConfigError;

use crate::Config;

fn invalid(key: &str, value: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.into(),
    }
}

impl Config {
    /// Validate configuration values
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let batch = &self.batch;
        let phases = &batch.phases;

        if batch.max_workers == 0 {
            return Err(invalid("max_workers", "must be at least 1"));
        }
        if !(batch.cpu_threshold > 0.0 && batch.cpu_threshold <= 100.0) {
            return Err(invalid(
                "cpu_threshold",
                format!("{} must be in (0, 100]", batch.cpu_threshold),
            ));
        }
        if batch.monitor.recovery_threshold >= batch.cpu_threshold
            || batch.monitor.recovery_threshold < 0.0
        {
            return Err(invalid(
                "recovery_threshold",
                format!(
                    "{} must be non-negative and below cpu_threshold ({})",
                    batch.monitor.recovery_threshold, batch.cpu_threshold
                ),
            ));
        }
        if batch.monitor.recovery_samples == 0 {
            return Err(invalid("recovery_samples", "must be at least 1"));
        }
        if batch.monitor.sample_interval.is_zero() {
            return Err(invalid("sample_interval", "must be greater than 0"));
        }
        if batch.batch_size == Some(0) {
            return Err(invalid("batch_size", "must be at least 1 when set"));
        }
        if batch.extensions.is_empty() || batch.extensions.iter().any(String::is_empty) {
            return Err(invalid("extensions", "must list at least one non-empty extension"));
        }

        if phases.enabled.is_empty() {
            return Err(invalid("phases", "at least one phase must be enabled"));
        }
        let mut seen = HashSet::new();
        for phase in &phases.enabled {
            if !seen.insert(*phase) {
                return Err(invalid("phases", format!("phase '{phase}' is listed twice")));
            }
        }
        if phases.timeout.as_secs() == 0 {
            return Err(invalid("phase_timeout", "must be at least 1 second"));
        }
        if phases.max_retries == 0 {
            return Err(invalid("max_retries", "must be at least 1 attempt"));
        }
        if phases.retry_base_delay > phases.retry_max_delay {
            return Err(invalid(
                "retry_base_delay",
                "must not exceed retry_max_delay",
            ));
        }
        if phases.chunk_workers == 0 {
            return Err(invalid("chunk_workers", "must be at least 1"));
        }
        if !(phases.chunk_abort_ratio > 0.0 && phases.chunk_abort_ratio <= 1.0) {
            return Err(invalid(
                "chunk_abort_ratio",
                format!("{} must be in (0, 1]", phases.chunk_abort_ratio),
            ));
        }
        if phases.interpreter.trim().is_empty() {
            return Err(invalid("interpreter", "must not be empty"));
        }
        for (phase, argv) in &phases.commands {
            if argv.first().is_none_or(|p| p.trim().is_empty()) {
                return Err(invalid(
                    &format!("commands.{phase}"),
                    "must name a program as its first element",
                ));
            }
        }

        Ok(())
    }
}
