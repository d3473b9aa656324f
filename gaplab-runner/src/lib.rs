//! GapLab Runner — backtests, statistics, data loading, artifacts and the
//! live scan cycle.
//!
//! This crate builds on `gaplab-core` to provide:
//! - Causal single-series backtest with cooperative cancellation
//! - Performance statistics over closed trades
//! - CSV candle loading and a directory-backed candle source
//! - JSON result cache keyed by series and config hash
//! - JSON/CSV/Markdown artifact export
//! - Parallel batch runs over many series
//! - Scan cycle with pluggable signal sinks

pub mod backtest;
pub mod batch;
pub mod cache;
pub mod data_loader;
pub mod export;
pub mod metrics;
pub mod scanner;

pub use backtest::{
    run, run_with_cancel, BacktestResult, BacktestTrade, EquityPoint, ExitReason, OpenTrade,
    RunError, SCHEMA_VERSION,
};
pub use batch::{run_batch, BatchEntry};
pub use cache::{ResultCache, ResultKey};
pub use data_loader::{load_csv, CsvCandleSource, LoadError};
pub use export::{load_artifacts, save_artifacts};
pub use metrics::PerformanceStats;
pub use scanner::{JsonlSink, LogSink, ScanReport, Scanner};
