//! Criterion benchmarks for GapLab hot paths.
//!
//! Benchmarks:
//! 1. Batch gap detection over the lookback window
//! 2. Incremental detection folded candle by candle
//! 3. Full per-series pipeline (detect, build, advance)

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use gaplab_core::detector::{detect, update, Detection};
use gaplab_core::domain::{Candle, CandleSeries, Timeframe};
use gaplab_core::{DetectorConfig, PipelineConfig, SeriesState};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_series(n: usize) -> CandleSeries {
    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let candles = (0..n)
        .map(|i| {
            let x = i as f64;
            let open = 100.0 + (x * 0.15).sin() * 10.0;
            let close = 100.0 + ((x + 1.0) * 0.15).sin() * 10.0 + (x * 0.7).cos();
            Candle {
                instrument: "BENCH".into(),
                timeframe: Timeframe::M15,
                timestamp: start + Duration::minutes(15 * i as i64),
                open,
                high: open.max(close) + 0.2,
                low: open.min(close) - 0.2,
                close,
                volume: 1_000.0,
            }
        })
        .collect();
    CandleSeries::new("BENCH", Timeframe::M15, candles).expect("valid bench series")
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_detect(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect");
    for n in [500usize, 5_000] {
        let series = make_series(n);
        let cfg = DetectorConfig {
            lookback_candles: n,
            ..DetectorConfig::default()
        };
        group.bench_with_input(BenchmarkId::from_parameter(n), &series, |b, s| {
            b.iter(|| detect(black_box(s), &cfg))
        });
    }
    group.finish();
}

fn bench_update(c: &mut Criterion) {
    let series = make_series(5_000);
    let cfg = DetectorConfig::default();
    c.bench_function("update_fold_5000", |b| {
        b.iter(|| {
            let mut state = Detection::default();
            for i in 0..series.len() {
                state = update(state.gaps, black_box(&series), i, &cfg);
            }
            state
        })
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let series = make_series(5_000);
    let cfg = PipelineConfig::default();
    c.bench_function("pipeline_catch_up_5000", |b| {
        b.iter(|| {
            let mut state = SeriesState::new(series.key().clone());
            state.catch_up(black_box(&series), &cfg).map_or(0, |o| o.len())
        })
    });
}

criterion_group!(benches, bench_detect, bench_update, bench_pipeline);
criterion_main!(benches);
