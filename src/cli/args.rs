use clap::Parser;
use std::path::{Path, PathBuf};

use crate::utils::batchwerk_toml::{CliSettings, apply_rate_ms};
use crate::types::CollectorSpec;
use crate::utils::config::PackageNames;

/// Batch the lines of a file (or stdin) into a SQLite table through an adaptive worker pool.
#[derive(Clone, Debug, Parser)]
#[command(name = "batchwerk")]
#[command(about = "Batch lines into SQLite; use --dry-run to batch without writing.")]
pub struct Cli {
    /// Input file. Default (or `-`): stdin.
    #[arg(value_name = "INPUT")]
    pub input: Option<PathBuf>,

    /// Path to the output database. Default: `batchwerk.db` next to INPUT (or in the current directory).
    #[arg(long, short)]
    pub db: Option<PathBuf>,

    /// Lines per batch.
    #[arg(long, short = 'b', conflicts_with = "batch_bytes")]
    pub batch_size: Option<usize>,

    /// Close a batch once its lines add up to this many bytes.
    #[arg(long)]
    pub batch_bytes: Option<u64>,

    /// Smallest worker pool the tuner may shrink to.
    #[arg(long)]
    pub min_workers: Option<usize>,

    /// Largest worker pool (and the starting size).
    #[arg(long, short = 'w')]
    pub max_workers: Option<usize>,

    /// Task queue capacity; submission blocks when it is full.
    #[arg(long, short = 'q')]
    pub queue: Option<usize>,

    /// Lower bound of the adaptive delay between submissions, in milliseconds.
    #[arg(long)]
    pub rate_min_ms: Option<u64>,

    /// Upper bound of the adaptive delay between submissions, in milliseconds.
    #[arg(long)]
    pub rate_max_ms: Option<u64>,

    /// Skip blank lines.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub skip_empty: Option<bool>,

    /// Batch and hash the input but do not write to the database.
    #[arg(long)]
    pub dry_run: bool,

    /// Verbose output (debug logs and a progress counter).
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

impl Cli {
    /// Input path, `None` for stdin.
    pub fn input_path(&self) -> Option<&Path> {
        self.input
            .as_deref()
            .filter(|p| p.as_os_str() != "-")
    }

    /// Directory the config file and default database live in.
    pub fn base_dir(&self) -> PathBuf {
        self.input_path()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Database path: flag, then config file, then the package default in the base directory.
    pub fn db_path(&self, settings: &CliSettings) -> PathBuf {
        self.db
            .clone()
            .or_else(|| settings.db_path.clone())
            .unwrap_or_else(|| self.base_dir().join(PackageNames::get().default_db_filename()))
    }

    /// Apply flags on top of `settings` (file values already applied).
    pub fn apply_to(&self, settings: &mut CliSettings) {
        let opts = &mut settings.opts;
        if let Some(n) = self.batch_size {
            opts.batch_capacity = CollectorSpec::Items(n);
        }
        if let Some(n) = self.batch_bytes {
            opts.batch_capacity = CollectorSpec::Weight(n);
        }
        if let Some(n) = self.max_workers {
            opts.max_pool_size = n;
            opts.min_pool_size = opts.min_pool_size.min(n);
        }
        if let Some(n) = self.min_workers {
            opts.min_pool_size = n;
        }
        if let Some(n) = self.queue {
            opts.queue_capacity = n;
        }
        apply_rate_ms(opts, self.rate_min_ms, self.rate_max_ms);
        if let Some(v) = self.skip_empty {
            settings.skip_empty = v;
        }
        if let Some(v) = self.verbose {
            settings.verbose = v;
        }
    }
}
