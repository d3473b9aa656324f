//! Gap detector — finds three-candle fair value gaps and tracks their fill.
//!
//! Two entry points with one contract:
//! - [`detect`] scans the lookback window of a whole series.
//! - [`update`] folds a single new candle into the previous result.
//!
//! Calling `update` for every index `0..n` yields exactly what `detect`
//! returns on the first `n` candles: same gaps, same fill state. Neither ever
//! reads a candle past the one being processed.
//!
//! Window rule: with `n` candles visible the window starts at
//! `n - lookback_candles` (saturating). A pattern is only detected when all
//! three of its candles are inside the window, and gaps whose first candle
//! has left the window are aged out.

use tracing::{debug, warn};

use crate::config::DetectorConfig;
use crate::domain::{
    confidence_score, Candle, CandleSeries, DataIssue, GapDirection, GapId, GapPattern,
    IssueKind,
};

/// Output of a detection pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    /// Gaps inside the active window, ordered by anchor index.
    pub gaps: Vec<GapPattern>,
    /// Candles skipped because of bad data.
    pub issues: Vec<DataIssue>,
}

impl Detection {
    /// Gaps that are still eligible for signal building.
    pub fn unfilled(&self) -> impl Iterator<Item = &GapPattern> {
        self.gaps.iter().filter(|g| !g.is_filled())
    }
}

/// First candle index of the active window when `visible` candles exist.
pub fn window_start(visible: usize, lookback_candles: usize) -> usize {
    visible.saturating_sub(lookback_candles)
}

/// Batch detection over the lookback window of `series`.
pub fn detect(series: &CandleSeries, config: &DetectorConfig) -> Detection {
    let candles = series.candles();
    let n = candles.len();
    if n < 3 {
        return Detection::default();
    }

    let start = window_start(n, config.lookback_candles);
    let issues: Vec<DataIssue> = (start..n)
        .filter_map(|i| candle_issue(i, &candles[i]))
        .collect();
    for issue in &issues {
        warn!(series = %series.key(), %issue, "skipping candle");
    }

    let mut gaps = Vec::new();
    for anchor in (start + 2).max(2)..n {
        let Some(mut gap) = pattern_at(series, anchor, config) else {
            continue;
        };
        for candle in &candles[anchor + 1..] {
            if gap.is_filled() {
                break;
            }
            if candle.is_consistent() {
                gap.apply_fill(candle, config.fill_threshold);
            }
        }
        gaps.push(gap);
    }

    debug!(series = %series.key(), gaps = gaps.len(), "detection pass complete");
    Detection { gaps, issues }
}

/// Incremental detection: fold candle `new_index` into `existing`.
///
/// `existing` must be the gap set produced for the first `new_index`
/// candles (by `detect` or by the previous `update`). Only candles up to and
/// including `new_index` are read.
pub fn update(
    existing: Vec<GapPattern>,
    series: &CandleSeries,
    new_index: usize,
    config: &DetectorConfig,
) -> Detection {
    let Some(candle) = series.get(new_index) else {
        return Detection {
            gaps: existing,
            issues: Vec::new(),
        };
    };

    let mut gaps = existing;
    let mut issues = Vec::new();

    match candle_issue(new_index, candle) {
        Some(issue) => {
            warn!(series = %series.key(), %issue, "skipping candle");
            issues.push(issue);
        }
        None => {
            for gap in gaps.iter_mut().filter(|g| g.anchor_index < new_index) {
                if gap.apply_fill(candle, config.fill_threshold) && gap.is_filled() {
                    debug!(gap = %gap.id, at = %candle.timestamp, "gap filled");
                }
            }
        }
    }

    let start = window_start(new_index + 1, config.lookback_candles);
    gaps.retain(|g| g.anchor_index >= start + 2);

    if new_index >= start + 2 {
        if let Some(gap) = pattern_at(series, new_index, config) {
            debug!(
                gap = %gap.id,
                direction = %gap.direction,
                low = gap.gap_low,
                high = gap.gap_high,
                pct = gap.gap_percentage,
                "gap detected"
            );
            gaps.push(gap);
        }
    }

    Detection { gaps, issues }
}

fn candle_issue(index: usize, candle: &Candle) -> Option<DataIssue> {
    if candle.is_consistent() {
        return None;
    }
    let kind = if candle.is_void() {
        IssueKind::Void
    } else {
        IssueKind::Inconsistent
    };
    Some(DataIssue {
        index,
        timestamp: candle.timestamp,
        kind,
    })
}

/// Evaluate the pattern completed by candle `anchor`, without fill tracking.
pub fn pattern_at(
    series: &CandleSeries,
    anchor: usize,
    config: &DetectorConfig,
) -> Option<GapPattern> {
    if anchor < 2 {
        return None;
    }
    let candles = series.candles();
    let (first, middle, last) = (
        candles.get(anchor - 2)?,
        candles.get(anchor - 1)?,
        candles.get(anchor)?,
    );
    if !(first.is_consistent() && middle.is_consistent() && last.is_consistent()) {
        return None;
    }
    if !(series.are_consecutive(anchor - 2, anchor - 1) && series.are_consecutive(anchor - 1, anchor))
    {
        return None;
    }

    let (direction, gap_low, gap_high) = if last.low > first.high {
        (GapDirection::Bullish, first.high, last.low)
    } else if last.high < first.low {
        (GapDirection::Bearish, last.high, first.low)
    } else {
        return None;
    };

    let reference = middle.close;
    if !(reference.is_finite() && reference > 0.0) {
        debug!(anchor, reference, "zero or undefined reference price, skipping");
        return None;
    }

    let gap_size = gap_high - gap_low;
    let gap_percentage = gap_size * 100.0 / reference;
    if gap_percentage < config.min_gap_percentage {
        return None;
    }

    let impulse_strength = impulse_strength(middle, direction, config)?;

    Some(GapPattern {
        id: GapId::new(series.key(), last.timestamp),
        instrument: series.instrument().to_string(),
        timeframe: series.timeframe(),
        direction,
        anchor_index: anchor,
        first_timestamp: first.timestamp,
        detected_at: last.timestamp,
        gap_low,
        gap_high,
        gap_size,
        gap_percentage,
        pattern_low: first.low.min(middle.low).min(last.low),
        pattern_high: first.high.max(middle.high).max(last.high),
        impulse_strength,
        confidence: confidence_score(gap_percentage, impulse_strength),
        fill_percentage: 0.0,
        filled_at: None,
    })
}

/// Middle-candle predicate. Returns the body/range ratio when the candle
/// qualifies as an impulse in `direction`.
///
/// Rule: body/range strictly above `impulse_min_body_ratio` (skipped when the
/// ratio is 0), and, if `impulse_require_direction`, the body points in the
/// gap direction.
pub fn impulse_strength(
    middle: &Candle,
    direction: GapDirection,
    config: &DetectorConfig,
) -> Option<f64> {
    let range = middle.range();
    let strength = if range > 0.0 { middle.body() / range } else { 0.0 };

    if config.impulse_require_direction {
        let aligned = match direction {
            GapDirection::Bullish => middle.is_bullish(),
            GapDirection::Bearish => middle.is_bearish(),
        };
        if !aligned {
            return None;
        }
    }
    if config.impulse_min_body_ratio > 0.0 && !(range > 0.0 && strength > config.impulse_min_body_ratio)
    {
        return None;
    }
    Some(strength)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timeframe;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
    }

    fn c(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            instrument: "BTC/USDT".into(),
            timeframe: Timeframe::H1,
            timestamp: t0() + Duration::hours(i),
            open,
            high,
            low,
            close,
            volume: 10.0,
        }
    }

    fn series(candles: Vec<Candle>) -> CandleSeries {
        CandleSeries::new("BTC/USDT", Timeframe::H1, candles).unwrap()
    }

    fn bullish_three() -> Vec<Candle> {
        vec![
            c(0, 100.0, 101.0, 99.0, 100.0),
            c(1, 99.0, 100.4, 98.8, 100.0),
            c(2, 102.5, 103.5, 102.0, 103.0),
        ]
    }

    fn config() -> DetectorConfig {
        DetectorConfig {
            min_gap_percentage: 0.1,
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn detects_bullish_gap() {
        let d = detect(&series(bullish_three()), &config());
        assert_eq!(d.gaps.len(), 1);
        let g = &d.gaps[0];
        assert_eq!(g.direction, GapDirection::Bullish);
        assert_eq!(g.gap_low, 101.0);
        assert_eq!(g.gap_high, 102.0);
        assert!((g.gap_size - 1.0).abs() < 1e-12);
        assert!((g.gap_percentage - 1.0).abs() < 1e-12);
        assert_eq!(g.anchor_index, 2);
        assert_eq!(g.pattern_low, 98.8);
        assert_eq!(g.pattern_high, 103.5);
        assert!(!g.is_filled());
    }

    #[test]
    fn detects_bearish_gap() {
        let candles = vec![
            c(0, 100.0, 101.0, 99.0, 100.0),
            c(1, 99.5, 99.6, 96.8, 97.0),
            c(2, 96.0, 97.5, 95.0, 95.5),
        ];
        let d = detect(&series(candles), &config());
        assert_eq!(d.gaps.len(), 1);
        let g = &d.gaps[0];
        assert_eq!(g.direction, GapDirection::Bearish);
        assert_eq!(g.gap_low, 97.5);
        assert_eq!(g.gap_high, 99.0);
        assert!((g.gap_percentage - 1.5 * 100.0 / 97.0).abs() < 1e-9);
    }

    #[test]
    fn overlapping_ranges_produce_nothing() {
        let candles = vec![
            c(0, 100.0, 101.0, 99.0, 100.0),
            c(1, 100.0, 102.0, 99.5, 101.8),
            c(2, 101.5, 102.5, 100.5, 102.0),
        ];
        assert!(detect(&series(candles), &config()).gaps.is_empty());
    }

    #[test]
    fn fewer_than_three_candles_is_empty() {
        let d = detect(&series(bullish_three()[..2].to_vec()), &config());
        assert_eq!(d, Detection::default());
    }

    #[test]
    fn threshold_is_closed_lower_bound() {
        let s = series(bullish_three());
        let at = DetectorConfig {
            min_gap_percentage: 1.0,
            ..config()
        };
        assert_eq!(detect(&s, &at).gaps.len(), 1);

        let above = DetectorConfig {
            min_gap_percentage: 1.0001,
            ..config()
        };
        assert!(detect(&s, &above).gaps.is_empty());
    }

    #[test]
    fn weak_middle_candle_is_rejected() {
        let mut candles = bullish_three();
        // Doji-like middle candle.
        candles[1] = c(1, 99.9, 100.4, 98.8, 100.0);
        assert!(detect(&series(candles.clone()), &config()).gaps.is_empty());

        let lenient = DetectorConfig {
            impulse_min_body_ratio: 0.0,
            impulse_require_direction: false,
            ..config()
        };
        assert_eq!(detect(&series(candles), &lenient).gaps.len(), 1);
    }

    #[test]
    fn counter_direction_middle_candle_is_rejected() {
        let mut candles = bullish_three();
        candles[1] = c(1, 100.3, 100.4, 98.8, 99.0);
        assert!(detect(&series(candles), &config()).gaps.is_empty());
    }

    #[test]
    fn zero_reference_price_is_skipped() {
        let candles = vec![
            c(0, 0.0, 0.0, 0.0, 0.0),
            c(1, 0.0, 0.0, 0.0, 0.0),
            c(2, 1.0, 1.0, 1.0, 1.0),
        ];
        let lenient = DetectorConfig {
            impulse_min_body_ratio: 0.0,
            impulse_require_direction: false,
            ..config()
        };
        assert!(detect(&series(candles), &lenient).gaps.is_empty());
    }

    #[test]
    fn timeline_hole_breaks_adjacency() {
        let mut candles = bullish_three();
        candles[2].timestamp = t0() + Duration::hours(3);
        assert!(detect(&series(candles), &config()).gaps.is_empty());
    }

    #[test]
    fn void_candle_reported_and_skipped() {
        let mut candles = bullish_three();
        candles.push(c(3, f64::NAN, 104.0, 102.5, 103.5));
        candles.push(c(4, 103.5, 104.0, 100.5, 101.0));
        let d = detect(&series(candles), &config());
        assert_eq!(d.issues.len(), 1);
        assert_eq!(d.issues[0].index, 3);
        assert_eq!(d.issues[0].kind, IssueKind::Void);
        // The gap survives and is fully covered by candle 4.
        assert_eq!(d.gaps.len(), 1);
        assert!(d.gaps[0].is_filled());
        assert_eq!(d.gaps[0].filled_at, Some(t0() + Duration::hours(4)));
    }

    #[test]
    fn later_candles_fill_the_gap() {
        let mut candles = bullish_three();
        candles.push(c(3, 103.0, 103.2, 101.6, 102.5));
        let d = detect(&series(candles), &config());
        let g = &d.gaps[0];
        assert!((g.fill_percentage - 40.0).abs() < 1e-9);
        assert!(!g.is_filled());
    }

    #[test]
    fn lookback_window_limits_new_detections() {
        let mut candles = bullish_three();
        for i in 3..10 {
            candles.push(c(i, 103.0, 104.0, 102.5, 103.5));
        }
        let s = series(candles);
        let narrow = DetectorConfig {
            lookback_candles: 5,
            ..config()
        };
        assert!(detect(&s, &narrow).gaps.is_empty());
        assert_eq!(detect(&s, &config()).gaps.len(), 1);
    }

    #[test]
    fn update_matches_detect_on_prefix() {
        let mut candles = bullish_three();
        candles.push(c(3, 103.0, 103.2, 101.6, 102.5));
        candles.push(c(4, 102.5, 102.6, 100.0, 100.2));
        let s = series(candles);
        let cfg = config();

        let mut state = Detection::default();
        for i in 0..s.len() {
            state = update(state.gaps, &s, i, &cfg);
            assert_eq!(state.gaps, detect(&s.prefix(i + 1), &cfg).gaps, "prefix {}", i + 1);
        }
        assert!(state.gaps[0].is_filled());
    }
}
