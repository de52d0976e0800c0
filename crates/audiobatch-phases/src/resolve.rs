use std::path::{Path, PathBuf};

use audiobatch_utils::{PhaseError, PhaseId};

use crate::PhaseRunner;

/// How a phase entry point was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// `[phases.commands]` entry
    Configured,
    /// `<phase>/bin/<phase>`
    Native,
    /// `<phase>/run`
    RunScript,
    /// Script run by the phase's own `.venv` interpreter
    Venv,
    /// Script run by the fallback interpreter found on `PATH`
    FallbackInterpreter,
}

/// A resolved, runnable phase entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTarget {
    pub phase: PhaseId,
    pub program: PathBuf,
    /// Arguments placed before the standard contract (script path, configured args)
    pub prefix_args: Vec<String>,
    /// Working directory for the child; the phase directory for discovered phases
    pub cwd: Option<PathBuf>,
    pub kind: TargetKind,
}

impl PhaseTarget {
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.kind == TargetKind::FallbackInterpreter
    }
}

impl PhaseRunner {
    /// Locate the entry point for `phase`.
    ///
    /// An explicit command from configuration wins. Otherwise each search base (the configured
    /// phases root, then `<file_root>/<phases root>` when given and different) is probed for
    /// `<phase>/bin/<phase>`, `<phase>/run`, and finally `<phase>/main.py` or
    /// `<phase>/<phase>.py`. Scripts prefer the phase's own `.venv/bin/python`; the
    /// configured fallback interpreter is used with a warning.
    pub fn resolve(
        &self,
        phase: PhaseId,
        file_root: Option<&Path>,
    ) -> Result<PhaseTarget, PhaseError> {
        if let Some(argv) = self.settings.commands.get(&phase) {
            return configured_target(phase, argv);
        }

        let mut searched = Vec::new();
        for base in self.search_bases(file_root) {
            if let Some(target) = self.probe(phase, &base, &mut searched) {
                tracing::debug!(
                    phase = %phase,
                    program = %target.program.display(),
                    kind = ?target.kind,
                    "Resolved phase entry point"
                );
                return Ok(target);
            }
        }

        Err(PhaseError::NotFound { phase, searched })
    }

    fn search_bases(&self, file_root: Option<&Path>) -> Vec<PathBuf> {
        let mut bases = vec![self.settings.root.clone()];
        if let Some(root) = file_root
            && self.settings.root.is_relative()
        {
            let extra = root.join(&self.settings.root);
            if !same_location(&extra, &self.settings.root) {
                bases.push(extra);
            }
        }
        bases
    }

    fn probe(
        &self,
        phase: PhaseId,
        base: &Path,
        searched: &mut Vec<String>,
    ) -> Option<PhaseTarget> {
        // Absolute so the program still resolves once the child switches to `dir`
        let dir = absolute(&base.join(phase.as_str()));
        let target = |program: PathBuf, prefix_args: Vec<String>, kind| PhaseTarget {
            phase,
            program,
            prefix_args,
            cwd: Some(dir.clone()),
            kind,
        };

        let native = dir.join("bin").join(phase.as_str());
        searched.push(native.display().to_string());
        if is_executable(&native) {
            return Some(target(native, Vec::new(), TargetKind::Native));
        }

        let run = dir.join("run");
        searched.push(run.display().to_string());
        if is_executable(&run) {
            return Some(target(run, Vec::new(), TargetKind::RunScript));
        }

        let scripts = [dir.join("main.py"), dir.join(format!("{}.py", phase.as_str()))];
        for script in &scripts {
            searched.push(script.display().to_string());
        }
        let script = scripts.into_iter().find(|s| s.is_file())?;
        // Scripts run with the phase directory as cwd; pass an absolute path
        let script_arg = absolute(&script).display().to_string();

        let venv_python = dir.join(".venv").join("bin").join("python");
        if is_executable(&venv_python) {
            return Some(target(absolute(&venv_python), vec![script_arg], TargetKind::Venv));
        }

        match which::which(&self.settings.interpreter) {
            Ok(interpreter) => {
                tracing::warn!(
                    phase = %phase,
                    interpreter = %interpreter.display(),
                    expected = %venv_python.display(),
                    "Phase has no virtual environment; falling back to the current runtime"
                );
                Some(target(interpreter, vec![script_arg], TargetKind::FallbackInterpreter))
            }
            Err(e) => {
                searched.push(format!("{} ({e})", self.settings.interpreter));
                None
            }
        }
    }
}

fn configured_target(phase: PhaseId, argv: &[String]) -> Result<PhaseTarget, PhaseError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(PhaseError::InvalidCommand {
            phase,
            reason: "command is empty".to_string(),
        });
    };
    if program.trim().is_empty() {
        return Err(PhaseError::InvalidCommand {
            phase,
            reason: "program name is blank".to_string(),
        });
    }
    Ok(PhaseTarget {
        phase,
        program: PathBuf::from(program),
        prefix_args: args.to_vec(),
        cwd: None,
        kind: TargetKind::Configured,
    })
}

pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
}

fn same_location(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => absolute(a) == absolute(b),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiobatch_config::PhaseSettings;
    use std::fs;
    use tempfile::TempDir;

    fn runner_for(root: &Path) -> PhaseRunner {
        PhaseRunner::new(PhaseSettings {
            root: root.to_path_buf(),
            ..PhaseSettings::default()
        })
    }

    #[cfg(unix)]
    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_native_binary_beats_run_script() {
        let dir = TempDir::new().unwrap();
        let native = dir.path().join("extraction/bin/extraction");
        make_executable(&native);
        make_executable(&dir.path().join("extraction/run"));

        let target = runner_for(dir.path()).resolve(PhaseId::Extraction, None).unwrap();
        assert_eq!(target.kind, TargetKind::Native);
        assert_eq!(target.program, native);
        assert_eq!(target.cwd, Some(dir.path().join("extraction")));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let native = dir.path().join("validation/bin/validation");
        fs::create_dir_all(native.parent().unwrap()).unwrap();
        fs::write(&native, "not executable").unwrap();
        make_executable(&dir.path().join("validation/run"));

        let target = runner_for(dir.path()).resolve(PhaseId::Validation, None).unwrap();
        assert_eq!(target.kind, TargetKind::RunScript);
    }

    #[cfg(unix)]
    #[test]
    fn test_script_prefers_phase_venv() {
        let dir = TempDir::new().unwrap();
        let phase_dir = dir.path().join("segmentation");
        fs::create_dir_all(&phase_dir).unwrap();
        fs::write(phase_dir.join("segmentation.py"), "print('hi')").unwrap();
        make_executable(&phase_dir.join(".venv/bin/python"));

        let target = runner_for(dir.path()).resolve(PhaseId::Segmentation, None).unwrap();
        assert_eq!(target.kind, TargetKind::Venv);
        assert!(target.program.ends_with(".venv/bin/python"));
        assert!(target.prefix_args[0].ends_with("segmentation.py"));
        assert!(!target.is_fallback());
    }

    #[cfg(unix)]
    #[test]
    fn test_script_without_venv_uses_fallback_interpreter() {
        let dir = TempDir::new().unwrap();
        let phase_dir = dir.path().join("enhancement");
        fs::create_dir_all(&phase_dir).unwrap();
        fs::write(phase_dir.join("main.py"), "").unwrap();

        let runner = PhaseRunner::new(PhaseSettings {
            root: dir.path().to_path_buf(),
            interpreter: "sh".to_string(),
            ..PhaseSettings::default()
        });
        let target = runner.resolve(PhaseId::Enhancement, None).unwrap();
        assert!(target.is_fallback());
        assert!(target.program.ends_with("sh"));
        assert!(target.prefix_args[0].ends_with("main.py"));
    }

    #[test]
    fn test_missing_phase_lists_searched_locations() {
        let dir = TempDir::new().unwrap();
        let err = runner_for(dir.path()).resolve(PhaseId::Synthesis, None).unwrap_err();
        match err {
            PhaseError::NotFound { phase, searched } => {
                assert_eq!(phase, PhaseId::Synthesis);
                assert!(searched.iter().any(|s| s.ends_with("synthesis/bin/synthesis")));
                assert!(searched.iter().any(|s| s.ends_with("synthesis/run")));
                assert!(searched.iter().any(|s| s.ends_with("synthesis/main.py")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_interpreter_is_not_found() {
        let dir = TempDir::new().unwrap();
        let phase_dir = dir.path().join("enhancement");
        fs::create_dir_all(&phase_dir).unwrap();
        fs::write(phase_dir.join("main.py"), "").unwrap();

        let runner = PhaseRunner::new(PhaseSettings {
            root: dir.path().to_path_buf(),
            interpreter: "definitely-not-an-interpreter-xyz".to_string(),
            ..PhaseSettings::default()
        });
        let err = runner.resolve(PhaseId::Enhancement, None).unwrap_err();
        assert!(err.to_string().contains("definitely-not-an-interpreter-xyz"));
    }

    #[test]
    fn test_configured_command_wins() {
        let dir = TempDir::new().unwrap();
        let mut settings = PhaseSettings {
            root: dir.path().to_path_buf(),
            ..PhaseSettings::default()
        };
        settings.commands.insert(
            PhaseId::Synthesis,
            vec!["/opt/tts/synth".to_string(), "--fast".to_string()],
        );
        settings.commands.insert(PhaseId::Extraction, Vec::new());
        let runner = PhaseRunner::new(settings);

        let target = runner.resolve(PhaseId::Synthesis, None).unwrap();
        assert_eq!(target.kind, TargetKind::Configured);
        assert_eq!(target.program, PathBuf::from("/opt/tts/synth"));
        assert_eq!(target.prefix_args, vec!["--fast"]);
        assert_eq!(target.cwd, None);

        assert!(matches!(
            runner.resolve(PhaseId::Extraction, None),
            Err(PhaseError::InvalidCommand { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_root_is_an_extra_search_base() {
        let project = TempDir::new().unwrap();
        make_executable(&project.path().join("phases/validation/run"));

        // Relative root that does not exist under the working directory
        let runner = PhaseRunner::new(PhaseSettings {
            root: PathBuf::from("phases-not-here-xyz"),
            ..PhaseSettings::default()
        });
        assert!(runner.resolve(PhaseId::Validation, None).is_err());

        let runner = PhaseRunner::new(PhaseSettings {
            root: PathBuf::from("phases"),
            ..PhaseSettings::default()
        });
        let target = runner
            .resolve(PhaseId::Validation, Some(project.path()))
            .unwrap();
        assert_eq!(target.kind, TargetKind::RunScript);
        assert!(target.program.starts_with(project.path()));
    }
}
