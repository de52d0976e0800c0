//! Launching child programs for audiobatch
//!
//! Phase programs and per-file orchestrator processes both start here. A command is always
//! an argv vector ([`CommandSpec`]); no shell ever sees it. Each child runs in its own
//! process group, with output captured up to a cap and a hard timeout enforced.

pub mod capture;
pub mod command_spec;
pub mod error;
pub mod process;

pub use capture::{OutputTail, tail};
pub use command_spec::CommandSpec;
pub use error::RunnerError;
pub use process::{
    DEFAULT_KILL_GRACE, DEFAULT_STDERR_CAP_BYTES, DEFAULT_STDOUT_CAP_BYTES, ExecOptions,
    NativeRunner, ProcessOutput, ProcessRunner, execute_native,
};
