//! Look-ahead contamination tests for the gap detector and the pipeline.
//!
//! Invariant: nothing decided at candle t may depend on candle t+1 or later.
//!
//! Method: fold the full series incrementally and compare against batch
//! detection on every truncated prefix. Then run the pipeline on a truncated
//! and a full series and assert the shared history is identical.

use chrono::{Duration, TimeZone, Utc};
use gaplab_core::detector::{detect, update, Detection};
use gaplab_core::domain::{Candle, CandleSeries, Timeframe};
use gaplab_core::{DetectorConfig, PipelineConfig, SeriesState};
use proptest::prelude::*;

/// Deterministic pseudo-random walk with strong directional runs, so gaps
/// show up often.
fn make_series(n: usize, seed: u64) -> CandleSeries {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut candles = Vec::with_capacity(n);
    let mut state = seed.wrapping_mul(2862933555777941757).wrapping_add(3037000493);
    let mut close = 100.0_f64;

    for i in 0..n {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let step = ((state >> 33) % 600) as f64 / 100.0 - 3.0; // -3.0 to +3.0
        let wick = ((state >> 20) % 50) as f64 / 100.0; // 0.0 to 0.5

        let open = close;
        close = (open + step).max(5.0);
        let high = open.max(close) + wick;
        let low = open.min(close) - wick;

        candles.push(Candle {
            instrument: "SYN".into(),
            timeframe: Timeframe::H1,
            timestamp: start + Duration::hours(i as i64),
            open,
            high,
            low,
            close,
            volume: 100.0,
        });
    }
    CandleSeries::new("SYN", Timeframe::H1, candles).unwrap()
}

fn fold(series: &CandleSeries, upto: usize, cfg: &DetectorConfig) -> Detection {
    let mut state = Detection::default();
    for i in 0..upto {
        state = update(state.gaps, series, i, cfg);
    }
    state
}

#[test]
fn incremental_matches_batch_on_every_prefix() {
    let full = make_series(300, 7);
    let cfg = DetectorConfig {
        lookback_candles: 40,
        ..DetectorConfig::default()
    };

    let mut state = Detection::default();
    let mut saw_gap = false;
    for i in 0..full.len() {
        state = update(state.gaps, &full, i, &cfg);
        let batch = detect(&full.prefix(i + 1), &cfg);
        assert_eq!(state.gaps, batch.gaps, "divergence at prefix {}", i + 1);
        saw_gap |= !state.gaps.is_empty();
    }
    assert!(saw_gap, "synthetic series produced no gaps");
}

#[test]
fn future_candles_do_not_change_past_detections() {
    let full = make_series(250, 11);
    let cfg = DetectorConfig::default();
    let truncated = full.prefix(150);

    let past = fold(&truncated, truncated.len(), &cfg);
    let extended = fold(&full, 150, &cfg);
    assert_eq!(past, extended);
}

#[test]
fn pipeline_history_is_prefix_stable() {
    let full = make_series(400, 23);
    let truncated = full.prefix(250);
    let cfg = PipelineConfig::default();

    let mut short_state = SeriesState::new(truncated.key().clone());
    let short = short_state.catch_up(&truncated, &cfg).unwrap();

    let mut long_state = SeriesState::new(full.key().clone());
    let long = long_state.catch_up(&full, &cfg).unwrap();

    assert_eq!(short.len(), 250);
    assert_eq!(&long[..250], &short[..]);
}

proptest! {
    #[test]
    fn incremental_matches_batch_for_any_seed(
        seed in any::<u64>(),
        n in 3usize..120,
        lookback in 3usize..60,
    ) {
        let full = make_series(n, seed);
        let cfg = DetectorConfig {
            lookback_candles: lookback,
            ..DetectorConfig::default()
        };
        let state = fold(&full, n, &cfg);
        prop_assert_eq!(state.gaps, detect(&full, &cfg).gaps);
    }
}
