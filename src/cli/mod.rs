//! Command-line interface for audiobatch
//!
//! - `args`: clap definitions
//! - `run`: entry point, configuration, runtime and error reporting
//! - `commands`: one function per subcommand

pub mod args;
mod commands;
mod run;


pub use args::{Cli, Commands, PhaseArgs};
pub use run::run;
