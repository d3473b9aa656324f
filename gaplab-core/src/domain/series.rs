//! CandleSeries — the ordered candle sequence for one (instrument, timeframe).
//!
//! Construction validates the ordering contract once; everything downstream
//! (detector, builder, backtest) relies on it without re-checking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::candle::Candle;
use super::timeframe::Timeframe;

/// Structural problems that make a series unusable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("series {0} is empty")]
    Empty(SeriesKey),

    #[error("non-monotonic timestamp at index {index}: {timestamp} is not after {previous}")]
    NonMonotonic {
        index: usize,
        timestamp: DateTime<Utc>,
        previous: DateTime<Utc>,
    },

    #[error("candle at index {index} belongs to {found}, expected {expected}")]
    ForeignCandle {
        index: usize,
        expected: SeriesKey,
        found: SeriesKey,
    },

    #[error("candle at index {index} ({timestamp}) is not aligned to the {timeframe} boundary")]
    Misaligned {
        index: usize,
        timestamp: DateTime<Utc>,
        timeframe: Timeframe,
    },

    #[error("series ends at {series_end}, before the last processed candle at {last_processed}")]
    Rewound {
        last_processed: DateTime<Utc>,
        series_end: DateTime<Utc>,
    },
}

/// Identity of a series: used as the key for per-series state and persisted results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub instrument: String,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(instrument: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            instrument: instrument.into(),
            timeframe,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.instrument, self.timeframe)
    }
}

/// Ordered candles for a single instrument and timeframe.
///
/// Invariant: timestamps are strictly increasing and aligned to the
/// timeframe. Missing periods are allowed; use [`CandleSeries::are_consecutive`]
/// before treating two candles as adjacent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleSeries {
    key: SeriesKey,
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(
        instrument: impl Into<String>,
        timeframe: Timeframe,
        candles: Vec<Candle>,
    ) -> Result<Self, SeriesError> {
        let series = Self {
            key: SeriesKey::new(instrument, timeframe),
            candles,
        };
        series.validate()?;
        Ok(series)
    }

    /// Re-check the ordering contract.
    ///
    /// Series built through [`CandleSeries::new`] always pass; deserialized
    /// series may not, so the backtest calls this before replaying.
    pub fn validate(&self) -> Result<(), SeriesError> {
        if self.candles.is_empty() {
            return Err(SeriesError::Empty(self.key.clone()));
        }
        for (index, candle) in self.candles.iter().enumerate() {
            if candle.instrument != self.key.instrument || candle.timeframe != self.key.timeframe {
                return Err(SeriesError::ForeignCandle {
                    index,
                    expected: self.key.clone(),
                    found: SeriesKey::new(candle.instrument.clone(), candle.timeframe),
                });
            }
            if !self.key.timeframe.is_aligned(candle.timestamp) {
                return Err(SeriesError::Misaligned {
                    index,
                    timestamp: candle.timestamp,
                    timeframe: self.key.timeframe,
                });
            }
            if index > 0 {
                let previous = self.candles[index - 1].timestamp;
                if candle.timestamp <= previous {
                    return Err(SeriesError::NonMonotonic {
                        index,
                        timestamp: candle.timestamp,
                        previous,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    pub fn instrument(&self) -> &str {
        &self.key.instrument
    }

    pub fn timeframe(&self) -> Timeframe {
        self.key.timeframe
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// True when candle `b` starts exactly one period after candle `a`.
    pub fn are_consecutive(&self, a: usize, b: usize) -> bool {
        match (self.candles.get(a), self.candles.get(b)) {
            (Some(first), Some(second)) => {
                second.timestamp - first.timestamp == self.key.timeframe.duration()
            }
            _ => false,
        }
    }

    /// Copy of the first `len` candles. Used to compare batch detection with
    /// incremental replay.
    pub fn prefix(&self, len: usize) -> CandleSeries {
        Self {
            key: self.key.clone(),
            candles: self.candles[..len.min(self.candles.len())].to_vec(),
        }
    }
}
