//! Candle loading from CSV files.
//!
//! Expected header: `timestamp,open,high,low,close,volume`. Timestamps may be
//! RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), unix seconds or unix milliseconds.
//! Rows are sorted by timestamp before validation; duplicate timestamps and
//! misaligned rows fail the load. Empty price fields load as NaN so the
//! detector reports them as void candles instead of aborting the file.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use gaplab_core::collaborators::CandleSource;
use gaplab_core::domain::{Candle, CandleSeries, SeriesError, Timeframe};

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no data file for {instrument} {timeframe} at {}", path.display())]
    Missing {
        instrument: String,
        timeframe: Timeframe,
        path: PathBuf,
    },

    #[error("failed to read {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{} row {row}: invalid timestamp {value:?}", path.display())]
    Timestamp {
        path: PathBuf,
        row: usize,
        value: String,
    },

    #[error("{}: {source}", path.display())]
    Series {
        path: PathBuf,
        #[source]
        source: SeriesError,
    },
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

/// Parse a timestamp cell.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    let n: i64 = value.parse().ok()?;
    // Anything past year 5138 in seconds is taken as milliseconds.
    if n.abs() >= 100_000_000_000 {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}

/// Load and validate one series from a CSV file.
pub fn load_csv(
    path: &Path,
    instrument: &str,
    timeframe: Timeframe,
) -> Result<CandleSeries, LoadError> {
    let csv_err = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let mut candles = Vec::new();
    for (row, record) in reader.deserialize::<CsvRow>().enumerate() {
        let record = record.map_err(csv_err)?;
        let timestamp = parse_timestamp(&record.timestamp).ok_or_else(|| LoadError::Timestamp {
            path: path.to_path_buf(),
            row: row + 1,
            value: record.timestamp.clone(),
        })?;
        candles.push(Candle {
            instrument: instrument.to_string(),
            timeframe,
            timestamp,
            open: record.open.unwrap_or(f64::NAN),
            high: record.high.unwrap_or(f64::NAN),
            low: record.low.unwrap_or(f64::NAN),
            close: record.close.unwrap_or(f64::NAN),
            volume: record.volume.unwrap_or(0.0),
        });
    }
    candles.sort_by_key(|c| c.timestamp);

    debug!(path = %path.display(), rows = candles.len(), "loaded candles");
    CandleSeries::new(instrument, timeframe, candles).map_err(|source| LoadError::Series {
        path: path.to_path_buf(),
        source,
    })
}

/// File name for a series: `BTC/USDT` on `1h` becomes `BTC-USDT_1h.csv`.
pub fn series_file_name(instrument: &str, timeframe: Timeframe) -> String {
    let safe: String = instrument
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' })
        .collect();
    format!("{safe}_{timeframe}.csv")
}

/// Directory of `{instrument}_{timeframe}.csv` files.
#[derive(Debug, Clone)]
pub struct CsvCandleSource {
    dir: PathBuf,
}

impl CsvCandleSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, instrument: &str, timeframe: Timeframe) -> PathBuf {
        self.dir.join(series_file_name(instrument, timeframe))
    }
}

impl CandleSource for CsvCandleSource {
    type Error = LoadError;

    fn load(&self, instrument: &str, timeframe: Timeframe) -> Result<CandleSeries, LoadError> {
        let path = self.path_for(instrument, timeframe);
        if !path.exists() {
            return Err(LoadError::Missing {
                instrument: instrument.to_string(),
                timeframe,
                path,
            });
        }
        load_csv(&path, instrument, timeframe)
    }
}
