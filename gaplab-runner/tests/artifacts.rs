//! Artifact persistence: export bundle, cache, and CSV loading round trips
//! on a real filesystem.

use chrono::{Duration, TimeZone, Utc};
use std::path::Path;

use gaplab_core::collaborators::CandleSource;
use gaplab_core::domain::Timeframe;
use gaplab_core::PipelineConfig;
use gaplab_runner::cache::{ResultCache, ResultKey};
use gaplab_runner::export::{artifact_dir_name, export_json};
use gaplab_runner::{load_artifacts, run, run_batch, save_artifacts, CsvCandleSource};

/// Gap up, retrace to trigger, run to target.
fn write_fixture(dir: &Path) {
    let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let rows = [
        (100.0, 101.0, 99.0, 100.0),
        (99.0, 100.4, 98.8, 100.0),
        (102.5, 103.5, 102.0, 103.0),
        (103.0, 103.2, 101.8, 102.2),
        (102.2, 109.0, 102.0, 108.9),
    ];
    let mut body = String::from("timestamp,open,high,low,close,volume\n");
    for (i, (o, h, l, c)) in rows.iter().enumerate() {
        let ts = t0 + Duration::hours(i as i64);
        body.push_str(&format!("{},{o},{h},{l},{c},5\n", ts.to_rfc3339()));
    }
    std::fs::write(dir.join("ETH-USDT_1h.csv"), body).unwrap();
}

#[test]
fn save_then_load_artifacts() {
    let data = tempfile::tempdir().unwrap();
    write_fixture(data.path());
    let series = CsvCandleSource::new(data.path())
        .load("ETH/USDT", Timeframe::H1)
        .unwrap();
    let result = run(&series, &PipelineConfig::default()).unwrap();
    assert_eq!(result.trades.len(), 1);

    let out = tempfile::tempdir().unwrap();
    let dir = save_artifacts(&result, out.path()).unwrap();
    assert_eq!(dir.file_name().unwrap().to_str().unwrap(), artifact_dir_name(&result));
    for file in ["result.json", "trades.csv", "equity.csv", "report.md"] {
        assert!(dir.join(file).exists(), "missing {file}");
    }

    let loaded = load_artifacts(&dir).unwrap();
    assert_eq!(loaded.trades, result.trades);
    assert_eq!(loaded.equity_curve, result.equity_curve);
    assert_eq!(loaded.config_hash, result.config_hash);
    // One winner, no losers: profit factor is infinite and must survive JSON.
    assert_eq!(loaded.stats.profit_factor, f64::INFINITY);

    let trades_csv = std::fs::read_to_string(dir.join("trades.csv")).unwrap();
    assert_eq!(trades_csv.lines().count(), 2);
    assert!(trades_csv.contains(",target,"));
}

#[test]
fn newer_schema_is_rejected() {
    let data = tempfile::tempdir().unwrap();
    write_fixture(data.path());
    let series = CsvCandleSource::new(data.path())
        .load("ETH/USDT", Timeframe::H1)
        .unwrap();
    let mut result = run(&series, &PipelineConfig::default()).unwrap();
    result.schema_version = 99;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("result.json"), export_json(&result).unwrap()).unwrap();
    let err = load_artifacts(dir.path()).unwrap_err();
    assert!(err.to_string().contains("unsupported schema version"));
}

#[test]
fn cache_is_keyed_by_series_and_config() {
    let data = tempfile::tempdir().unwrap();
    write_fixture(data.path());
    let series = CsvCandleSource::new(data.path())
        .load("ETH/USDT", Timeframe::H1)
        .unwrap();

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = ResultCache::new(cache_dir.path()).unwrap();
    let cfg = PipelineConfig::default();
    let key = ResultKey::new(series.key().clone(), cfg.config_hash());
    assert!(!cache.contains(&key));

    let first = run_batch(std::slice::from_ref(&series), &cfg, None, Some(&cache), None).unwrap();
    assert!(!first[0].cached);
    assert!(cache.contains(&key));

    let second = run_batch(std::slice::from_ref(&series), &cfg, None, Some(&cache), None).unwrap();
    assert!(second[0].cached);
    assert_eq!(
        second[0].result.as_ref().unwrap().trades,
        first[0].result.as_ref().unwrap().trades
    );

    let mut other = cfg.clone();
    other.signals.stop_buffer_fraction = 0.2;
    assert!(!cache.contains(&ResultKey::new(series.key().clone(), other.config_hash())));
    assert_eq!(cache.len().unwrap(), 1);
}

#[test]
fn partial_results_are_not_cached() {
    let data = tempfile::tempdir().unwrap();
    write_fixture(data.path());
    let series = CsvCandleSource::new(data.path())
        .load("ETH/USDT", Timeframe::H1)
        .unwrap();
    let mut result = run(&series, &PipelineConfig::default()).unwrap();
    result.partial = true;

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = ResultCache::new(cache_dir.path()).unwrap();
    assert!(!cache.put(&result).unwrap());
    assert!(cache.is_empty().unwrap());
}
