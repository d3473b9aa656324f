//! Candle — one OHLCV period for an instrument on a timeframe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timeframe::Timeframe;

/// OHLCV candle. `timestamp` is the period start, UTC, aligned to the timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Returns true if any price field is NaN or infinite.
    pub fn is_void(&self) -> bool {
        !(self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite())
    }

    /// High/low bracket open and close. A void candle is never consistent.
    pub fn is_consistent(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Whether the candle traded through `price` (inclusive on both ends).
    pub fn touches(&self, price: f64) -> bool {
        self.low <= price && price <= self.high
    }

    /// Length of the intersection between this candle's range and `[low, high]`.
    pub fn overlap(&self, low: f64, high: f64) -> f64 {
        (self.high.min(high) - self.low.max(low)).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_candle() -> Candle {
        Candle {
            instrument: "BTC/USDT".into(),
            timeframe: Timeframe::H1,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap(),
            open: 100.0,
            high: 105.0,
            low: 98.0,
            close: 103.0,
            volume: 12.5,
        }
    }

    #[test]
    fn candle_is_consistent() {
        assert!(sample_candle().is_consistent());
        assert!(sample_candle().is_bullish());
    }

    #[test]
    fn candle_detects_void() {
        let mut c = sample_candle();
        c.close = f64::NAN;
        assert!(c.is_void());
        assert!(!c.is_consistent());
    }

    #[test]
    fn candle_detects_inverted_range() {
        let mut c = sample_candle();
        c.high = 97.0;
        assert!(!c.is_consistent());
    }

    #[test]
    fn overlap_with_zone() {
        let c = sample_candle();
        assert_eq!(c.overlap(104.0, 110.0), 1.0);
        assert_eq!(c.overlap(90.0, 99.0), 1.0);
        assert_eq!(c.overlap(106.0, 110.0), 0.0);
        assert_eq!(c.overlap(97.0, 110.0), 7.0);
    }

    #[test]
    fn touches_is_inclusive() {
        let c = sample_candle();
        assert!(c.touches(105.0));
        assert!(c.touches(98.0));
        assert!(!c.touches(105.01));
    }
}
