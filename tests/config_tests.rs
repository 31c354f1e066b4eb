use batchwerk::cli::{Cli, handle_run, resolve_settings};
use batchwerk::sink::SqliteSink;
use batchwerk::types::{AbortPolicy, BatchOpts, CollectorSpec};
use batchwerk::utils::batchwerk_toml::{CliSettings, apply_file_to_settings, parse_batchwerk_toml};
use batchwerk::utils::config::PackageNames;
use clap::Parser;
use std::ffi::OsString;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn settings_from(toml: &str) -> CliSettings {
    let file = parse_batchwerk_toml(toml).unwrap();
    let mut settings = CliSettings::default();
    apply_file_to_settings(&file, &mut settings);
    settings
}

// --- config file ---

#[test]
fn test_empty_file_keeps_defaults() {
    let settings = settings_from("");
    assert_eq!(settings.opts, BatchOpts::default());
    assert!(settings.db_path.is_none());
    assert!(!settings.verbose);
}

#[test]
fn test_file_settings_applied() {
    let settings = settings_from(
        r#"
[settings]
db_path = "out/lines.db"
batch_size = 250
min_workers = 2
max_workers = 6
queue = 12
rate_max_ms = 800
abort_policy = "flush"
skip_empty = true
"#,
    );
    let opts = &settings.opts;
    assert_eq!(opts.batch_capacity, CollectorSpec::Items(250));
    assert_eq!(opts.min_pool_size, 2);
    assert_eq!(opts.max_pool_size, 6);
    assert_eq!(opts.queue_capacity, 12);
    assert_eq!(opts.abort_policy, AbortPolicy::Flush);
    let rate = opts.rate.as_ref().unwrap();
    assert_eq!(rate.rate_max, Duration::from_millis(800));
    assert!(settings.skip_empty);
    assert_eq!(settings.db_path.as_deref(), Some(std::path::Path::new("out/lines.db")));
}

#[test]
fn test_batch_bytes_selects_weight_policy() {
    let settings = settings_from("[settings]\nbatch_bytes = 4096\n");
    assert_eq!(settings.opts.batch_capacity, CollectorSpec::Weight(4096));
}

#[test]
fn test_malformed_file_is_an_error() {
    assert!(parse_batchwerk_toml("[settings]\nbatch_size = \"lots\"\n").is_err());
}

// --- flags ---

#[test]
fn test_flags_override_file() {
    let mut settings = settings_from("[settings]\nbatch_size = 250\nmax_workers = 6\nverbose = true\n");
    let cli = Cli::try_parse_from([
        "batchwerk",
        "input.txt",
        "--batch-size",
        "10",
        "-w",
        "3",
        "--verbose",
        "false",
        "--skip-empty",
    ])
    .unwrap();
    cli.apply_to(&mut settings);
    assert_eq!(settings.opts.batch_capacity, CollectorSpec::Items(10));
    assert_eq!(settings.opts.max_pool_size, 3);
    assert!(settings.opts.min_pool_size <= 3);
    assert!(!settings.verbose);
    assert!(settings.skip_empty);
}

#[test]
fn test_batch_size_conflicts_with_batch_bytes() {
    let res = Cli::try_parse_from(["batchwerk", "--batch-size", "5", "--batch-bytes", "100"]);
    assert!(res.is_err());
}

#[test]
fn test_stdin_dash_and_default_db() {
    let cli = Cli::try_parse_from(["batchwerk", "-"]).unwrap();
    assert!(cli.input_path().is_none());
    let db = cli.db_path(&CliSettings::default());
    assert_eq!(db, std::path::Path::new(".").join(PackageNames::get().default_db_filename()));
}

// --- resolve + run ---

#[test]
fn test_resolve_reads_file_next_to_input() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join(PackageNames::get().config_filename()),
        "[settings]\nbatch_size = 7\nmax_workers = 2\nmin_workers = 1\n",
    )
    .unwrap();
    let input = dir.path().join("in.txt");
    fs::write(&input, "x\n").unwrap();
    let cli = Cli::try_parse_from([OsString::from("batchwerk"), input.into_os_string()]).unwrap();
    let settings = resolve_settings(&cli);
    assert_eq!(settings.opts.batch_capacity, CollectorSpec::Items(7));
    assert_eq!(settings.opts.max_pool_size, 2);
    assert_eq!(cli.db_path(&settings), dir.path().join(PackageNames::get().default_db_filename()));
}

#[test]
fn test_handle_run_stores_every_line() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.txt");
    let text: String = (1..=25).map(|i| format!("line {i}\n")).collect();
    fs::write(&input, text).unwrap();
    let db = dir.path().join("custom.db");
    let mut argv: Vec<OsString> = vec!["batchwerk".into(), input.into_os_string()];
    argv.extend(["--db".into(), db.clone().into_os_string()]);
    argv.extend(["-b", "4", "-w", "2"].map(OsString::from));
    let cli = Cli::try_parse_from(argv).unwrap();
    let report = handle_run(&cli).unwrap();
    assert!(report.all_succeeded());
    assert_eq!(report.counts.items_completed, 25);
    assert_eq!(report.counts.batches_submitted, 7);
    assert_eq!(SqliteSink::open(&db).unwrap().count().unwrap(), 25);
}

#[test]
fn test_package_names_derive_from_package() {
    let names = PackageNames::get();
    assert_eq!(names.pkg_name(), "batchwerk");
    assert_eq!(names.config_filename(), format!(".{}.toml", names.pkg_name()));
    assert!(names.worker_thread_name(3).starts_with(names.pkg_name()));
}
