//! Load `.batchwerk.toml` (CLI only). The library takes its options as `BatchOpts` directly.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{AbortPolicy, BatchOpts, CollectorSpec, RateOpts};
use crate::utils::config::PackageNames;

#[derive(Debug, Default, Deserialize)]
pub struct BatchwerkToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    db_path: Option<String>,
    batch_size: Option<usize>,
    batch_bytes: Option<u64>,
    min_workers: Option<usize>,
    max_workers: Option<usize>,
    queue: Option<usize>,
    rate_min_ms: Option<u64>,
    rate_max_ms: Option<u64>,
    abort_policy: Option<AbortPolicy>,
    skip_empty: Option<bool>,
    verbose: Option<bool>,
}

/// Settings the CLI works with after file and flags are merged.
#[derive(Clone, Debug, Default)]
pub struct CliSettings {
    pub db_path: Option<PathBuf>,
    pub opts: BatchOpts,
    pub skip_empty: bool,
    pub verbose: bool,
}

/// Load the config file from `dir` if present. Returns None if the file is missing or
/// unreadable; a malformed file is reported and ignored.
pub fn load_batchwerk_toml(dir: &Path) -> Option<BatchwerkToml> {
    let path = dir.join(PackageNames::get().config_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    parse_batchwerk_toml(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite a settings field from the file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $target:expr, $sec_field:ident => $target_field:ident) => {
        if let Some(v) = $sec.$sec_field {
            $target.$target_field = v;
        }
    };
}

/// Apply file values on top of `settings` (only fields present in the file). Call before
/// applying CLI flags.
pub fn apply_file_to_settings(file: &BatchwerkToml, settings: &mut CliSettings) {
    let sec = &file.settings;
    if let Some(ref p) = sec.db_path {
        settings.db_path = Some(PathBuf::from(p));
    }
    if let Some(n) = sec.batch_size {
        settings.opts.batch_capacity = CollectorSpec::Items(n);
    }
    if let Some(n) = sec.batch_bytes {
        settings.opts.batch_capacity = CollectorSpec::Weight(n);
    }
    apply_file_opt!(sec, settings.opts, min_workers => min_pool_size);
    apply_file_opt!(sec, settings.opts, max_workers => max_pool_size);
    apply_file_opt!(sec, settings.opts, queue => queue_capacity);
    apply_file_opt!(sec, settings.opts, abort_policy => abort_policy);
    apply_rate_ms(&mut settings.opts, sec.rate_min_ms, sec.rate_max_ms);
    apply_file_opt!(sec, settings, skip_empty => skip_empty);
    apply_file_opt!(sec, settings, verbose => verbose);
}

/// Turn on (or adjust) the dynamic rate executor when either bound is given in milliseconds.
pub fn apply_rate_ms(opts: &mut BatchOpts, min_ms: Option<u64>, max_ms: Option<u64>) {
    if min_ms.is_none() && max_ms.is_none() {
        return;
    }
    let rate = opts.rate.get_or_insert_with(RateOpts::default);
    if let Some(ms) = min_ms {
        rate.rate_min = Duration::from_millis(ms);
    }
    if let Some(ms) = max_ms {
        rate.rate_max = Duration::from_millis(ms);
    }
}

/// Parse a config file body.
pub fn parse_batchwerk_toml(s: &str) -> Result<BatchwerkToml, toml::de::Error> {
    toml::from_str(s)
}
