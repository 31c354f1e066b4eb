use colored::Colorize;
use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;
use std::thread;

use crate::utils::config::PackageNames;

/// Install the colored logger: our crate at Info (Debug when `verbose`), dependencies at Warn.
/// Debug lines carry the emitting thread name so worker activity can be told apart.
/// Safe to call more than once; later calls are no-ops.
pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let name = PackageNames::get().pkg_name();
    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(name, level)
        .format(move |buf, record| {
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = if record.level() == Level::Error {
                        "ERROR".red()
                    } else {
                        "WARN".yellow()
                    };
                    let path = record.target().to_string().white();
                    format!("[{} {} {}] {}", name.cyan(), level_str, path, record.args())
                }
                Level::Debug | Level::Trace => {
                    let current = thread::current();
                    let who = current.name().unwrap_or("main").dimmed();
                    format!("[{} {}] {}", name.cyan(), who, record.args())
                }
                Level::Info => format!("[{}] {}", name.cyan(), record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();
}
