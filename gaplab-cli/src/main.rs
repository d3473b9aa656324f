//! GapLab CLI — command-line interface for gap detection, scanning and backtests.
//!
//! Commands:
//! - `gaplab detect --data <file.csv> --instrument <X> --timeframe <tf>` — print detected gaps as JSON
//! - `gaplab scan --data-dir <dir> --instrument <X>... --timeframe <tf>...` — run one scan cycle
//! - `gaplab backtest --data-dir <dir> --instrument <X>... --timeframe <tf>...` — backtest and save artifacts

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gaplab_core::collaborators::{CandleSource, SignalSink};
use gaplab_core::domain::{CandleSeries, Timeframe};
use gaplab_core::PipelineConfig;
use gaplab_runner::export::summary_table;
use gaplab_runner::{
    load_csv, run_batch, save_artifacts, CsvCandleSource, JsonlSink, LogSink, ResultCache,
    Scanner,
};

#[derive(Parser)]
#[command(
    name = "gaplab",
    about = "GapLab — fair value gap detection, signals and backtests"
)]
struct Cli {
    /// Log filter (overrides RUST_LOG), e.g. "debug" or "gaplab_core=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect gaps in one CSV series and print them as JSON
    Detect {
        /// Path to the candle CSV file
        #[arg(long)]
        data: PathBuf,

        /// Instrument name, e.g. BTC/USDT
        #[arg(long)]
        instrument: String,

        /// Candle timeframe, e.g. 1h
        #[arg(long, default_value = "1h")]
        timeframe: String,

        /// Path to a TOML config file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run one scan cycle over every instrument/timeframe pair
    Scan {
        /// Directory of {instrument}_{timeframe}.csv files
        #[arg(long)]
        data_dir: PathBuf,

        /// Instruments to scan (repeatable)
        #[arg(long = "instrument", required = true)]
        instruments: Vec<String>,

        /// Timeframes to scan (repeatable)
        #[arg(long = "timeframe", default_value = "1h")]
        timeframes: Vec<String>,

        /// Path to a TOML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Append new signals to this JSON-lines file instead of logging them
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Backtest every instrument/timeframe pair and save artifacts
    Backtest {
        /// Directory of {instrument}_{timeframe}.csv files
        #[arg(long)]
        data_dir: PathBuf,

        /// Instruments to backtest (repeatable)
        #[arg(long = "instrument", required = true)]
        instruments: Vec<String>,

        /// Timeframes to backtest (repeatable)
        #[arg(long = "timeframe", default_value = "1h")]
        timeframes: Vec<String>,

        /// Path to a TOML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output directory for artifacts
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// Worker threads (defaults to one per core)
        #[arg(long)]
        threads: Option<usize>,

        /// Result cache directory; runs are not cached when omitted
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Commands::Detect {
            data,
            instrument,
            timeframe,
            config,
        } => run_detect(&data, &instrument, &timeframe, config.as_deref()),
        Commands::Scan {
            data_dir,
            instruments,
            timeframes,
            config,
            out,
        } => run_scan(&data_dir, &instruments, &timeframes, config.as_deref(), out),
        Commands::Backtest {
            data_dir,
            instruments,
            timeframes,
            config,
            output_dir,
            threads,
            cache_dir,
        } => run_backtest_cmd(
            &data_dir,
            &instruments,
            &timeframes,
            config.as_deref(),
            &output_dir,
            threads,
            cache_dir,
        ),
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(p) => PipelineConfig::from_file(p)
            .with_context(|| format!("failed to load config {}", p.display()))?,
        None => PipelineConfig::default(),
    };
    let hash = config.config_hash();
    info!(hash = hash.short(), "config loaded");
    Ok(config)
}

fn parse_timeframe(s: &str) -> Result<Timeframe> {
    s.parse::<Timeframe>()
        .with_context(|| format!("invalid timeframe '{s}'"))
}

/// Load every instrument/timeframe pair; missing or broken files are skipped
/// with a warning.
fn load_all(
    data_dir: &Path,
    instruments: &[String],
    timeframes: &[String],
) -> Result<Vec<CandleSeries>> {
    let source = CsvCandleSource::new(data_dir);
    let timeframes = timeframes
        .iter()
        .map(|s| parse_timeframe(s))
        .collect::<Result<Vec<_>>>()?;

    let mut out = Vec::new();
    for instrument in instruments {
        for &tf in &timeframes {
            match source.load(instrument, tf) {
                Ok(series) => out.push(series),
                Err(e) => warn!(%instrument, timeframe = %tf, error = %e, "skipping series"),
            }
        }
    }
    if out.is_empty() {
        bail!("no series could be loaded from {}", data_dir.display());
    }
    Ok(out)
}

fn run_detect(
    data: &Path,
    instrument: &str,
    timeframe: &str,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let tf = parse_timeframe(timeframe)?;
    let series = load_csv(data, instrument, tf)?;
    let detection = gaplab_core::detect(&series, &config.detector);

    let body = serde_json::json!({
        "instrument": instrument,
        "timeframe": tf,
        "gaps": detection.gaps,
        "issues": detection.issues,
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn run_scan(
    data_dir: &Path,
    instruments: &[String],
    timeframes: &[String],
    config_path: Option<&Path>,
    out: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let series = load_all(data_dir, instruments, timeframes)?;

    let mut sink: Box<dyn SignalSink> = match out {
        Some(path) => Box::new(
            JsonlSink::open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(LogSink),
    };

    let mut scanner = Scanner::new(config);
    let mut failed = 0;
    for s in &series {
        let report = scanner
            .scan(s, sink.as_mut())
            .with_context(|| format!("scan failed for {}", s.key()))?;
        failed += report.failed;
    }

    let summary = scanner.summary();
    println!(
        "Open signals: {} ({} long, {} short) across {} instrument(s)",
        summary.total,
        summary.long,
        summary.short,
        summary.instruments.len()
    );
    if failed > 0 {
        bail!("{failed} signal(s) could not be delivered");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_backtest_cmd(
    data_dir: &Path,
    instruments: &[String],
    timeframes: &[String],
    config_path: Option<&Path>,
    output_dir: &Path,
    threads: Option<usize>,
    cache_dir: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let series = load_all(data_dir, instruments, timeframes)?;
    let cache = cache_dir.map(ResultCache::new).transpose()?;

    let entries = run_batch(&series, &config, threads, cache.as_ref(), None)?;

    let mut results = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry.result {
            Ok(result) => {
                let dir = save_artifacts(&result, output_dir)?;
                info!(series = %entry.series, cached = entry.cached, dir = %dir.display(), "artifacts saved");
                results.push(result);
            }
            Err(e) => eprintln!("Error for {}: {e}", entry.series),
        }
    }

    print!("{}", summary_table(&results));
    println!("Artifacts saved to: {}", output_dir.display());

    if results.is_empty() {
        bail!("every backtest failed");
    }
    Ok(())
}
