//! Per-series pipeline state: the causal fold shared by the backtest engine
//! and the live scan cycle.
//!
//! For each candle, in timestamp order:
//! 1. incremental detection and fill tracking through the candle
//! 2. signal building on every unfilled gap at the candle's close
//! 3. lifecycle advance of open signals against the candle's range
//!
//! Signals created at step 2 ignore the candle they were built on.
//!
//! The state tracks the last processed candle by timestamp, so callers can
//! pass either the growing full history or a trailing window of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::detector;
use crate::domain::{CandleSeries, DataIssue, GapPattern, SeriesError, SeriesKey, Signal};
use crate::signals::{BuildOutcome, SignalBook, SignalTransition};

/// What one candle step produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub index: usize,
    pub new_signals: Vec<Signal>,
    pub transitions: Vec<SignalTransition>,
    pub issues: Vec<DataIssue>,
}

/// Everything the pipeline carries between candles for one series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesState {
    key: SeriesKey,
    gaps: Vec<GapPattern>,
    book: SignalBook,
    next_index: usize,
    /// Timestamp of the last processed candle; the cursor follows it.
    #[serde(default)]
    last_timestamp: Option<DateTime<Utc>>,
    issues: Vec<DataIssue>,
}

impl SeriesState {
    pub fn new(key: SeriesKey) -> Self {
        Self {
            key,
            gaps: Vec::new(),
            book: SignalBook::new(),
            next_index: 0,
            last_timestamp: None,
            issues: Vec::new(),
        }
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    /// Gaps inside the active detection window.
    pub fn gaps(&self) -> &[GapPattern] {
        &self.gaps
    }

    pub fn book(&self) -> &SignalBook {
        &self.book
    }

    /// Index of the next candle to process.
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    /// All data issues seen so far.
    pub fn issues(&self) -> &[DataIssue] {
        &self.issues
    }

    /// Re-anchor the cursor on `series` by timestamp.
    ///
    /// A caller may pass a trailing window instead of the whole history, so
    /// the last processed candle can sit at a different index than last
    /// time. The cursor moves to the first candle after it, and stored gap
    /// anchors are re-pointed by timestamp. Gaps whose anchor candle is no
    /// longer in the window are dropped; their open signals stay in the book.
    ///
    /// Fails when the series ends before the last processed candle.
    pub fn sync(&mut self, series: &CandleSeries) -> Result<(), SeriesError> {
        let Some(last) = self.last_timestamp else {
            return Ok(());
        };
        let candles = series.candles();
        if self.next_index > 0
            && candles.get(self.next_index - 1).map(|c| c.timestamp) == Some(last)
        {
            return Ok(());
        }

        let Some(series_end) = candles.last().map(|c| c.timestamp) else {
            return Err(SeriesError::Empty(series.key().clone()));
        };
        if series_end < last {
            return Err(SeriesError::Rewound {
                last_processed: last,
                series_end,
            });
        }

        let next = candles.partition_point(|c| c.timestamp <= last);
        if next == 0 {
            warn!(series = %self.key, %last, "window starts after the last processed candle");
        }
        self.gaps.retain_mut(
            |gap| match candles.binary_search_by_key(&gap.detected_at, |c| c.timestamp) {
                Ok(index) => {
                    gap.anchor_index = index;
                    true
                }
                Err(_) => false,
            },
        );
        debug!(series = %self.key, from = self.next_index, to = next, "cursor re-synced");
        self.next_index = next;
        Ok(())
    }

    /// Process the first unprocessed candle of `series`. Returns `None` once
    /// the series is exhausted.
    ///
    /// The series may be the same series extended, or a window over it; see
    /// [`SeriesState::sync`].
    pub fn step(
        &mut self,
        series: &CandleSeries,
        config: &PipelineConfig,
    ) -> Result<Option<StepOutcome>, SeriesError> {
        self.sync(series)?;
        let index = self.next_index;
        let Some(candle) = series.get(index) else {
            return Ok(None);
        };
        self.next_index += 1;
        self.last_timestamp = Some(candle.timestamp);

        let detection = detector::update(
            std::mem::take(&mut self.gaps),
            series,
            index,
            &config.detector,
        );
        self.gaps = detection.gaps;

        let mut outcome = StepOutcome {
            index,
            issues: detection.issues,
            ..StepOutcome::default()
        };
        self.issues.extend(outcome.issues.iter().cloned());
        if !outcome.issues.is_empty() {
            return Ok(Some(outcome));
        }

        for gap in self.gaps.iter().filter(|g| !g.is_filled()) {
            let built = self
                .book
                .build(gap, candle.close, &config.signals, candle.timestamp, index);
            if let BuildOutcome::Created(signal) = built {
                debug!(
                    signal = %signal.id,
                    side = %signal.side,
                    entry = signal.entry_price,
                    stop = signal.stop_loss,
                    rr = signal.risk_reward,
                    "signal created"
                );
                outcome.new_signals.push(signal);
            }
        }
        self.book
            .forget_rejections(self.gaps.iter().map(|g| &g.id));

        outcome.transitions = self.book.advance(candle, &config.signals);
        for t in &outcome.transitions {
            debug!(signal = %t.signal_id, from = %t.from, to = %t.to, price = t.price, "signal transition");
        }

        Ok(Some(outcome))
    }

    /// Step through every unprocessed candle in order.
    pub fn catch_up(
        &mut self,
        series: &CandleSeries,
        config: &PipelineConfig,
    ) -> Result<Vec<StepOutcome>, SeriesError> {
        self.sync(series)?;
        let mut outcomes = Vec::with_capacity(series.len().saturating_sub(self.next_index));
        while let Some(outcome) = self.step(series, config)? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candle, SignalStatus, Timeframe};
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
            volume: 1.0,
        }
    }

    fn series() -> CandleSeries {
        CandleSeries::new(
            "BTC/USDT",
            Timeframe::H1,
            vec![
                c(0, 100.0, 101.0, 99.0, 100.0),
                c(1, 99.0, 100.4, 98.8, 100.0),
                c(2, 102.5, 103.5, 102.0, 103.0),
                c(3, 103.0, 103.4, 101.9, 102.6),
                c(4, 102.6, 109.0, 102.4, 108.8),
            ],
        )
        .unwrap()
    }

    #[test]
    fn signal_built_at_anchor_close_and_run_to_target() {
        let s = series();
        let cfg = PipelineConfig::default();
        let mut state = SeriesState::new(s.key().clone());

        let outcomes = state.catch_up(&s, &cfg).unwrap();
        assert_eq!(outcomes.len(), 5);
        assert_eq!(outcomes[2].new_signals.len(), 1);
        assert!(outcomes[2].transitions.is_empty());
        assert_eq!(outcomes[3].transitions[0].to, SignalStatus::Triggered);
        assert_eq!(outcomes[4].transitions[0].to, SignalStatus::HitTp);
        assert_eq!(state.book().closed().len(), 1);
        assert!(state.step(&s, &cfg).unwrap().is_none());
    }

    #[test]
    fn no_duplicate_signals_across_steps() {
        let s = series();
        let cfg = PipelineConfig::default();
        let mut state = SeriesState::new(s.key().clone());
        let created: usize = state
            .catch_up(&s, &cfg)
            .unwrap()
            .iter()
            .map(|o| o.new_signals.len())
            .sum();
        assert_eq!(created, 1);
    }

    fn window(s: &CandleSeries, from: usize, to: usize) -> CandleSeries {
        CandleSeries::new("BTC/USDT", Timeframe::H1, s.candles()[from..to].to_vec()).unwrap()
    }

    #[test]
    fn trailing_window_resyncs_by_timestamp() {
        let s = series();
        let cfg = PipelineConfig::default();
        let mut state = SeriesState::new(s.key().clone());

        let first = state.catch_up(&window(&s, 0, 3), &cfg).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(state.book().open_count(), 1);

        // Same length, shifted by one candle: only candle 3 is new.
        let second = state.catch_up(&window(&s, 1, 4), &cfg).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].index, 2);
        assert_eq!(second[0].transitions[0].to, SignalStatus::Triggered);
        assert_eq!(state.last_timestamp(), Some(s.candles()[3].timestamp));

        let third = state.catch_up(&window(&s, 2, 5), &cfg).unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].transitions[0].to, SignalStatus::HitTp);
        assert_eq!(state.book().closed().len(), 1);
    }

    #[test]
    fn gap_anchors_follow_the_window() {
        let s = series();
        let cfg = PipelineConfig::default();
        let mut state = SeriesState::new(s.key().clone());
        state.catch_up(&window(&s, 0, 3), &cfg).unwrap();
        assert_eq!(state.gaps()[0].anchor_index, 2);

        state.sync(&window(&s, 1, 3)).unwrap();
        assert_eq!(state.next_index(), 2);
        assert_eq!(state.gaps()[0].anchor_index, 1);
    }

    #[test]
    fn rewound_series_is_rejected() {
        let s = series();
        let cfg = PipelineConfig::default();
        let mut state = SeriesState::new(s.key().clone());
        state.catch_up(&s, &cfg).unwrap();

        let err = state.catch_up(&s.prefix(3), &cfg).unwrap_err();
        assert!(matches!(err, SeriesError::Rewound { .. }));
    }
}
