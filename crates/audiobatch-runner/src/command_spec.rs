use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use tokio::process::Command as TokioCommand;

/// A program plus its argv, working directory and extra environment.
///
/// File names reach children exactly as given, spaces and `;` included, because the
/// arguments are never joined into a shell string.
///
/// ```rust
/// use audiobatch_runner::CommandSpec;
///
/// let cmd = CommandSpec::new("phases/synthesis/bin/synthesis")
///     .args(["--file-id", "book_01"])
///     .arg("--chunk-index")
///     .arg("3")
///     .env("AUDIOBATCH_PHASE", "synthesis");
///
/// assert_eq!(cmd.to_string(), "phases/synthesis/bin/synthesis --file-id book_01 --chunk-index 3");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    /// Child's working directory; inherited when `None`
    pub cwd: Option<PathBuf>,
    /// Added to (or replacing entries in) the inherited environment
    pub env: BTreeMap<OsString, OsString>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// A tokio command carrying argv, cwd and env; stdio and process group are the caller's
    #[must_use]
    pub fn to_tokio_command(&self) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args).envs(&self.env);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// For logs and chunk logs only
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program.to_string_lossy())?;
        self.args.iter().try_for_each(|arg| {
            let arg = arg.to_string_lossy();
            let needs_quotes = arg.is_empty() || arg.contains(char::is_whitespace);
            if needs_quotes {
                write!(f, " {arg:?}")
            } else {
                write!(f, " {arg}")
            }
        })
    }
}
