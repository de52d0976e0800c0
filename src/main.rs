//! audiobatch CLI binary
//!
//! All logic lives in the library; main only maps the returned code to the process exit.

fn main() {
    // cli::run() prints everything, errors included
    if let Err(code) = audiobatch::cli::run() {
        std::process::exit(code.as_i32());
    }
}
