//! GapLab Core — fair value gap detection, signal building and lifecycle.
//!
//! This crate contains the algorithmic part of the pipeline:
//! - Domain types (candles, series, gaps, signals, identifiers)
//! - Gap detector with an incremental, no-lookahead update
//! - Signal builder with entry/stop/target levels and an R/R floor
//! - Signal state machine with a stop-first tie policy
//! - Per-series pipeline state folding candles one at a time
//! - Validated TOML configuration

pub mod collaborators;
pub mod config;
pub mod detector;
pub mod domain;
pub mod pipeline;
pub mod signals;

pub use config::{BacktestSettings, ConfigError, DetectorConfig, PipelineConfig, SignalConfig, Span};
pub use detector::{detect, update, Detection};
pub use pipeline::{SeriesState, StepOutcome};
