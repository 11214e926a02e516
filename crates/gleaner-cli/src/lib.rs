//! Gleaner CLI Library
//!
//! Command-line interface for running the pipeline.
//!
//! # Overview
//!
//! One invocation is one run: load the configuration, resolve the date
//! range, build the phase sequence against the builtin plugin registry,
//! open the ledger and hand everything to the engine.
//!
//! - **Date selection**: `--date yesterday|last-week|...` or an explicit
//!   `--start-date`/`--end-date` pair (default: yesterday)
//! - **Re-runs**: `--force` clears target data and ignores the ledger
//! - **Purging**: `--purge-only` skips extraction entirely
//! - **Tuning**: `--batch-size`, `--retries`, `--timeout-secs`

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use gleaner_common::{DateRange, DateRangeError, LogFormat, LogLevel, LogOutput, RangeWord};
use gleaner_core::{Engine, EngineSettings, History, PipelineConfig, Sequence};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Gleaner - batch ETL pipeline runner
#[derive(Parser, Debug)]
#[command(name = "gleaner")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Path to the pipeline configuration file
    pub config: PathBuf,

    /// Symbolic date range: today, yesterday, last-week, last-month or
    /// last-year
    #[arg(long, value_name = "WORD", conflicts_with_all = ["start_date", "end_date"])]
    pub date: Option<RangeWord>,

    /// First date of the range
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub start_date: Option<NaiveDate>,

    /// Last date of the range (defaults to the start date)
    #[arg(long, value_name = "YYYY-MM-DD", requires = "start_date")]
    pub end_date: Option<NaiveDate>,

    /// Run only these phases, in this order
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub phases: Option<Vec<String>>,

    /// Records per fan-out batch (overrides the config)
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Attempts per step before giving up
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Timeout for each remote pull and inject call (overrides the config)
    #[arg(long, value_name = "SECONDS")]
    pub timeout_secs: Option<u64>,

    /// Re-run even if the ledger says the range is done; clears prior
    /// target data first
    #[arg(long)]
    pub force: bool,

    /// Skip extraction and only purge upstream staging data
    #[arg(long)]
    pub purge_only: bool,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Log destination: `-` for the console or a directory for daily
    /// rotated files
    #[arg(long, value_name = "DEST")]
    pub log_output: Option<LogOutput>,

    /// Log format: text or json
    #[arg(long, value_name = "FORMAT")]
    pub log_format: Option<LogFormat>,
}

/// Run the pipeline described by the parsed arguments.
pub async fn execute(cli: &Cli) -> Result<()> {
    if cli.batch_size == Some(0) {
        bail!("--batch-size must be at least 1");
    }
    if cli.timeout_secs == Some(0) {
        bail!("--timeout-secs must be at least 1");
    }

    let range = resolve_range(cli, Local::now().date_naive())?;

    let config = PipelineConfig::load(&cli.config).with_context(|| {
        format!("cannot load pipeline config '{}'", cli.config.display())
    })?;

    let registry = gleaner_plugins::builtin();
    let sequence = match &cli.phases {
        Some(names) => Sequence::build_subset(&config, &registry, names)?,
        None => Sequence::build(&config, &registry)?,
    };

    let history = History::open(&config.history_url()).await?;
    let settings = engine_settings(cli, &config);

    info!(
        config = %cli.config.display(),
        range = %range,
        batch_size = settings.batch_size,
        retries = settings.retries,
        "Pipeline configured"
    );

    let mut engine = Engine::new(sequence, history, settings);
    engine.run(range, cli.force, cli.purge_only).await?;
    Ok(())
}

/// Turn the range flags into a concrete range relative to `pivot`
/// (today's local date in production; injected so tests can pin it).
fn resolve_range(cli: &Cli, pivot: NaiveDate) -> Result<DateRange, DateRangeError> {
    match (cli.date, cli.start_date) {
        (Some(word), _) => word.resolve(pivot),
        (None, Some(start)) => DateRange::new(start, cli.end_date.unwrap_or(start)),
        (None, None) => RangeWord::Yesterday.resolve(pivot),
    }
}

fn engine_settings(cli: &Cli, config: &PipelineConfig) -> EngineSettings {
    let defaults = EngineSettings::default();
    EngineSettings {
        batch_size: cli.batch_size.unwrap_or(config.gleaner.batch_size),
        retries: cli.retries.unwrap_or(defaults.retries),
        op_timeout: Duration::from_secs(
            cli.timeout_secs.unwrap_or(config.gleaner.timeout_secs),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_range_defaults_to_yesterday() {
        let cli = parse(&["gleaner", "conf.toml"]);
        let range = resolve_range(&cli, d(2024, 5, 15)).unwrap();
        assert_eq!(range, DateRange::single(d(2024, 5, 14)));
    }

    #[test]
    fn test_explicit_start_without_end_is_a_single_day() {
        let cli = parse(&["gleaner", "conf.toml", "--start-date", "2024-05-01"]);
        let range = resolve_range(&cli, d(2024, 5, 15)).unwrap();
        assert_eq!(range, DateRange::single(d(2024, 5, 1)));
    }

    #[test]
    fn test_explicit_start_and_end() {
        let cli = parse(&[
            "gleaner",
            "conf.toml",
            "--start-date",
            "2024-05-01",
            "--end-date",
            "2024-05-03",
        ]);
        let range = resolve_range(&cli, d(2024, 5, 15)).unwrap();
        assert_eq!(range, DateRange::new(d(2024, 5, 1), d(2024, 5, 3)).unwrap());
    }

    #[test]
    fn test_date_word_resolves_against_the_pivot() {
        let cli = parse(&["gleaner", "conf.toml", "--date", "last-month"]);
        let range = resolve_range(&cli, d(2024, 3, 15)).unwrap();
        assert_eq!(range, DateRange::new(d(2024, 2, 1), d(2024, 2, 29)).unwrap());
    }

    #[test]
    fn test_date_word_conflicts_with_explicit_dates() {
        let result = Cli::try_parse_from([
            "gleaner",
            "conf.toml",
            "--date",
            "today",
            "--start-date",
            "2024-05-01",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_end_date_requires_start_date() {
        let result = Cli::try_parse_from(["gleaner", "conf.toml", "--end-date", "2024-05-03"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_phases_split_on_commas() {
        let cli = parse(&["gleaner", "conf.toml", "--phases", "stats,downloads"]);
        assert_eq!(
            cli.phases,
            Some(vec!["stats".to_string(), "downloads".to_string()])
        );
    }

    #[test]
    fn test_backwards_explicit_range_is_rejected() {
        let cli = parse(&[
            "gleaner",
            "conf.toml",
            "--start-date",
            "2024-05-10",
            "--end-date",
            "2024-05-01",
        ]);
        let err = resolve_range(&cli, d(2024, 5, 15)).unwrap_err();
        assert!(matches!(err, DateRangeError::Backwards { .. }));
    }
}
