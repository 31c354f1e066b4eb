//! Command-line front end: argument parsing, the run handler and the progress counter.

pub mod args;
pub mod handler;
pub mod progress;

pub use args::Cli;
pub use handler::{LineJob, handle_run, resolve_settings};
