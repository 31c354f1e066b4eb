//! CLI command handler: batch INPUT into the database; --dry-run batches without writing.

use anyhow::{Context, Result};
use colored::Colorize;
use log::{debug, warn};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;

use super::args::Cli;
use super::progress::{ProgressObserver, create_counter};
use crate::collector::{AnyCollector, Weigher};
use crate::engine::{BatchJob, BatchService, TaskContext, TaskObserver};
use crate::error::RunError;
use crate::pipeline::{BatchProcessor, Line, LineSource};
use crate::sink::SqliteSink;
use crate::types::{ProcessorState, RunReport};
use crate::utils::batchwerk_toml::{CliSettings, apply_file_to_settings, load_batchwerk_toml};
use crate::utils::config::PackageNames;
use crate::utils::setup_logging;

/// Failure messages shown in the summary before eliding the rest.
const SUMMARY_FAILURES: usize = 5;

/// What the CLI does with each batch of lines.
pub enum LineJob {
    Store(SqliteSink),
    /// Hash the batch and log its digest; nothing is written.
    DryRun,
}

impl BatchJob<Vec<Line>> for LineJob {
    fn process(&self, batch: Vec<Line>, ctx: &TaskContext) -> Result<()> {
        match self {
            LineJob::Store(sink) => sink.process(batch, ctx),
            LineJob::DryRun => {
                ctx.ensure_active()?;
                let mut hasher = blake3::Hasher::new();
                for line in &batch {
                    hasher.update(line.text.as_bytes());
                }
                debug!(
                    "Batch {}: {} lines, digest {}",
                    ctx.seq(),
                    batch.len(),
                    hasher.finalize().to_hex()
                );
                Ok(())
            }
        }
    }
}

/// Defaults, then `.batchwerk.toml` from the input's directory, then flags.
pub fn resolve_settings(cli: &Cli) -> CliSettings {
    let mut settings = CliSettings::default();
    if let Some(file) = load_batchwerk_toml(&cli.base_dir()) {
        apply_file_to_settings(&file, &mut settings);
    }
    cli.apply_to(&mut settings);
    settings
}

fn open_input(cli: &Cli) -> Result<Box<dyn BufRead>> {
    match cli.input_path() {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

/// Run one batching pass over the input. Returns the run report; an aborted run is an error.
pub fn handle_run(cli: &Cli) -> Result<RunReport> {
    let settings = resolve_settings(cli);
    setup_logging(settings.verbose);
    settings.opts.validate().context("invalid options")?;
    debug!(
        "{} CONFIG:{:#?}",
        PackageNames::get().pkg_name().to_uppercase(),
        settings.opts
    );

    let job = if cli.dry_run {
        warn!("RUNNING IN DRY-RUN MODE. NOTHING WILL BE WRITTEN TO THE DATABASE.");
        LineJob::DryRun
    } else {
        let db_path = cli.db_path(&settings);
        debug!("Writing to {}", db_path.display());
        LineJob::Store(SqliteSink::open(&db_path)?)
    };
    let input = open_input(cli)?;

    let service = Arc::new(BatchService::new(settings.opts.clone())?);
    // Line bytes plus the newline, for --batch-bytes.
    let weigher: Weigher<Line> = Arc::new(|line: &Line| line.text.len() as u64 + 1);
    let mut processor: BatchProcessor<AnyCollector<Vec<Line>>, LineJob> =
        BatchProcessor::from_opts(Arc::clone(&service), Some(weigher), job)?;

    let progress = if settings.verbose {
        let obs = Arc::new(ProgressObserver::new(create_counter("Batching")));
        processor = processor.with_observer(Arc::clone(&obs) as Arc<dyn TaskObserver>);
        Some(obs)
    } else {
        None
    };

    let cancel = processor.cancel_handle();
    ctrlc::set_handler(move || {
        cancel.cancel();
    })
    .context("set Ctrl+C handler")?;

    let source = LineSource::new(input).skip_empty(settings.skip_empty);
    let result = processor.run(source);

    if let Some(obs) = &progress {
        obs.flush();
        eprintln!();
    }
    if let Some(rate) = processor.rate() {
        debug!("Final submission delay: {:?}", rate.current_delay());
    }
    drop(processor);
    service.shutdown(true);

    match result {
        Ok(report) => {
            print_summary(&report, cli.dry_run);
            Ok(report)
        }
        Err(RunError { cause, report }) => {
            print_summary(&report, cli.dry_run);
            Err(anyhow::Error::new(cause).context("Batching aborted"))
        }
    }
}

fn print_summary(report: &RunReport, dry_run: bool) {
    let c = &report.counts;
    let verb = if dry_run { "Batched" } else { "Stored" };
    let head = if report.all_succeeded() {
        "Done:".green().bold()
    } else if report.state == ProcessorState::Aborted {
        "Aborted:".yellow().bold()
    } else {
        "Finished with errors:".red().bold()
    };
    println!(
        "{} {} {} of {} lines in {} batches ({} failed, {} cancelled) in {:.2?}",
        head,
        verb,
        c.items_completed,
        c.items_seen,
        c.batches_submitted,
        c.batches_failed,
        c.batches_cancelled,
        report.elapsed
    );
    for failure in report.failures.iter().take(SUMMARY_FAILURES) {
        println!(
            "  {} batch {} ({} lines): {}",
            "x".red(),
            failure.seq,
            failure.items,
            failure.message
        );
    }
    if report.failures.len() > SUMMARY_FAILURES {
        println!(
            "  ... and {} more",
            report.failures.len() - SUMMARY_FAILURES
        );
    }
}
