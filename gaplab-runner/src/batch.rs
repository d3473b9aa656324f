//! Parallel batch runs — one backtest per series on a rayon pool.
//!
//! Series share no mutable state, so each worker owns its series' pipeline
//! outright. Results come back in input order.

use rayon::prelude::*;
use std::sync::atomic::AtomicBool;
use tracing::{info, warn};

use gaplab_core::domain::{CandleSeries, SeriesKey};
use gaplab_core::PipelineConfig;

use crate::backtest::{run_with_cancel, BacktestResult, RunError};
use crate::cache::{ResultCache, ResultKey};

/// Outcome for one series in a batch.
#[derive(Debug)]
pub struct BatchEntry {
    pub series: SeriesKey,
    pub result: Result<BacktestResult, RunError>,
    /// True when the result came from the cache.
    pub cached: bool,
}

/// Backtest every series in parallel.
///
/// `threads = None` uses the global rayon pool. A cache, when given, is read
/// before running and written after each complete run; cache failures are
/// logged and never fail the batch.
pub fn run_batch(
    series: &[CandleSeries],
    config: &PipelineConfig,
    threads: Option<usize>,
    cache: Option<&ResultCache>,
    cancel: Option<&AtomicBool>,
) -> Result<Vec<BatchEntry>, RunError> {
    config.validate()?;
    let work = || -> Vec<BatchEntry> {
        series
            .par_iter()
            .map(|s| run_one(s, config, cache, cancel))
            .collect()
    };

    let entries = match threads {
        Some(n) if n > 0 => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .map_err(|e| RunError::Pool(e.to_string()))?
            .install(work),
        _ => work(),
    };

    let failed = entries.iter().filter(|e| e.result.is_err()).count();
    info!(series = entries.len(), failed, "batch complete");
    Ok(entries)
}

fn run_one(
    series: &CandleSeries,
    config: &PipelineConfig,
    cache: Option<&ResultCache>,
    cancel: Option<&AtomicBool>,
) -> BatchEntry {
    let key = ResultKey::new(series.key().clone(), config.config_hash());

    if let Some(cache) = cache {
        match cache.get(&key) {
            Ok(Some(result)) if result.candle_count == series.len() => {
                return BatchEntry {
                    series: key.series,
                    result: Ok(result),
                    cached: true,
                };
            }
            Ok(_) => {}
            Err(e) => warn!(key = %key, error = %e, "ignoring unreadable cache entry"),
        }
    }

    let result = run_with_cancel(series, config, cancel);
    if let (Some(cache), Ok(r)) = (cache, &result) {
        if let Err(e) = cache.put(r) {
            warn!(key = %key, error = %e, "failed to cache result");
        }
    }
    BatchEntry {
        series: key.series,
        result,
        cached: false,
    }
}
