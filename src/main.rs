//! Batchwerk CLI: batch the lines of a file into SQLite; use --dry-run to batch without writing.

use anyhow::Result;
use batchwerk::cli::{Cli, handle_run};
use clap::Parser;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
