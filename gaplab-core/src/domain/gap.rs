//! GapPattern — a detected fair value gap and its fill state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::candle::Candle;
use super::ids::GapId;
use super::timeframe::Timeframe;

/// Side of the imbalance. Fixed at detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapDirection {
    Bullish,
    Bearish,
}

impl fmt::Display for GapDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bullish => f.write_str("bullish"),
            Self::Bearish => f.write_str("bearish"),
        }
    }
}

/// A three-candle imbalance zone `[gap_low, gap_high]`.
///
/// Invariant: `gap_high > gap_low`. `fill_percentage` only grows, and once
/// `filled_at` is set the fill state is frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapPattern {
    pub id: GapId,
    pub instrument: String,
    pub timeframe: Timeframe,
    pub direction: GapDirection,
    /// Index of the third candle (the one completing the pattern).
    pub anchor_index: usize,
    /// Timestamp of the first candle of the pattern.
    pub first_timestamp: DateTime<Utc>,
    /// Timestamp of the anchor candle; the gap exists from this candle on.
    pub detected_at: DateTime<Utc>,
    pub gap_low: f64,
    pub gap_high: f64,
    pub gap_size: f64,
    pub gap_percentage: f64,
    /// Lowest low across the three candles.
    pub pattern_low: f64,
    /// Highest high across the three candles.
    pub pattern_high: f64,
    /// Body-to-range ratio of the middle candle.
    pub impulse_strength: f64,
    pub confidence: f64,
    pub fill_percentage: f64,
    pub filled_at: Option<DateTime<Utc>>,
}

impl GapPattern {
    pub fn is_filled(&self) -> bool {
        self.filled_at.is_some()
    }

    pub fn midpoint(&self) -> f64 {
        (self.gap_low + self.gap_high) / 2.0
    }

    /// Fold one later candle into the fill state.
    ///
    /// Returns true when this candle changed the gap (fill grew or latched).
    /// A filled gap is never touched again.
    pub fn apply_fill(&mut self, candle: &Candle, fill_threshold: f64) -> bool {
        if self.is_filled() || self.gap_size <= 0.0 {
            return false;
        }
        let covered = candle.overlap(self.gap_low, self.gap_high) / self.gap_size * 100.0;
        let next = self.fill_percentage.max(covered.min(100.0));
        let changed = next > self.fill_percentage;
        self.fill_percentage = next;
        if self.fill_percentage >= fill_threshold {
            self.filled_at = Some(candle.timestamp);
            return true;
        }
        changed
    }
}

/// Confidence score in [0, 1] from gap size and impulse strength.
pub fn confidence_score(gap_percentage: f64, impulse_strength: f64) -> f64 {
    let mut confidence = 0.5;
    if gap_percentage > 0.5 {
        confidence += 0.2;
    }
    if gap_percentage > 1.0 {
        confidence += 0.1;
    }
    if impulse_strength > 0.7 {
        confidence += 0.1;
    }
    if impulse_strength > 0.9 {
        confidence += 0.1;
    }
    f64::min(confidence, 1.0)
}
