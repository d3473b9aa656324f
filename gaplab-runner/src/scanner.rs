//! Live scan cycle — keeps one pipeline state per series and forwards new
//! signals to a sink.
//!
//! Each call to [`Scanner::scan`] catches a series up to its latest candle.
//! The series may be the full history or a trailing window; the state
//! re-syncs on the last processed timestamp. A signal is delivered once.
//! When delivery fails the signal is kept and retried at the start of later
//! cycles for as long as it stays open.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use gaplab_core::collaborators::{SignalSink, SinkError};
use gaplab_core::domain::{CandleSeries, DataIssue, SeriesError, SeriesKey, Signal, SignalId};
use gaplab_core::signals::{SignalSummary, SignalTransition};
use gaplab_core::{PipelineConfig, SeriesState};

/// What one scan of one series produced.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub new_signals: Vec<Signal>,
    pub transitions: Vec<SignalTransition>,
    pub issues: Vec<DataIssue>,
    /// Deliveries that succeeded this cycle, retries included.
    pub delivered: usize,
    /// Deliveries that failed this cycle, retries included.
    pub failed: usize,
    /// Earlier failures re-sent successfully this cycle.
    pub redelivered: usize,
}

#[derive(Debug)]
struct Tracked {
    state: SeriesState,
    undelivered: BTreeSet<SignalId>,
}

#[derive(Debug, Default)]
pub struct Scanner {
    config: PipelineConfig,
    series: BTreeMap<SeriesKey, Tracked>,
}

impl Scanner {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            series: BTreeMap::new(),
        }
    }

    /// Retry earlier failed deliveries, process every unseen candle of
    /// `series` and deliver new signals.
    ///
    /// Fails only when `series` ends before the last candle already
    /// processed for it.
    pub fn scan(
        &mut self,
        series: &CandleSeries,
        sink: &mut dyn SignalSink,
    ) -> Result<ScanReport, SeriesError> {
        let tracked = self
            .series
            .entry(series.key().clone())
            .or_insert_with(|| Tracked {
                state: SeriesState::new(series.key().clone()),
                undelivered: BTreeSet::new(),
            });

        let mut report = ScanReport::default();
        retry_undelivered(tracked, sink, &mut report);

        for outcome in tracked.state.catch_up(series, &self.config)? {
            report.new_signals.extend(outcome.new_signals);
            report.transitions.extend(outcome.transitions);
            report.issues.extend(outcome.issues);
        }

        for signal in &report.new_signals {
            match sink.deliver(signal) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracked.undelivered.insert(signal.id.clone());
                    warn!(signal = %signal.id, error = %e, "signal delivery failed, will retry");
                }
            }
        }

        info!(
            series = %series.key(),
            new_signals = report.new_signals.len(),
            transitions = report.transitions.len(),
            issues = report.issues.len(),
            pending_delivery = tracked.undelivered.len(),
            "scan cycle complete"
        );
        Ok(report)
    }

    pub fn state(&self, key: &SeriesKey) -> Option<&SeriesState> {
        self.series.get(key).map(|t| &t.state)
    }

    /// Signals whose delivery failed and will be retried.
    pub fn undelivered(&self, key: &SeriesKey) -> Option<&BTreeSet<SignalId>> {
        self.series.get(key).map(|t| &t.undelivered)
    }

    /// Open signals across every tracked series.
    pub fn open_signals(&self) -> Vec<Signal> {
        self.series
            .values()
            .flat_map(|t| t.state.book().open().cloned())
            .collect()
    }

    /// Combined open-signal counts for dashboards.
    pub fn summary(&self) -> SignalSummary {
        self.series
            .values()
            .map(|t| t.state.book().summary())
            .fold(SignalSummary::default(), |mut acc, s| {
                acc.total += s.total;
                acc.long += s.long;
                acc.short += s.short;
                acc.instruments.extend(s.instruments);
                acc
            })
    }
}

/// Re-send signals whose delivery failed earlier. Signals that have since
/// closed or expired are dropped without sending.
fn retry_undelivered(tracked: &mut Tracked, sink: &mut dyn SignalSink, report: &mut ScanReport) {
    let book = tracked.state.book();
    tracked.undelivered.retain(|id| {
        let Some(signal) = book.find(id).filter(|s| !s.status.is_terminal()) else {
            debug!(signal = %id, "dropping undelivered signal that is no longer open");
            return false;
        };
        match sink.deliver(signal) {
            Ok(()) => {
                report.delivered += 1;
                report.redelivered += 1;
                false
            }
            Err(e) => {
                report.failed += 1;
                warn!(signal = %id, error = %e, "signal redelivery failed");
                true
            }
        }
    });
}

// ─── Sinks ──────────────────────────────────────────────────────────

/// Appends one JSON object per signal to a file.
pub struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl SignalSink for JsonlSink {
    fn deliver(&mut self, signal: &Signal) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, signal)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Logs the notification message of each signal.
#[derive(Debug, Default)]
pub struct LogSink;

impl SignalSink for LogSink {
    fn deliver(&mut self, signal: &Signal) -> Result<(), SinkError> {
        info!(signal = %signal.id, "\n{signal}");
        Ok(())
    }
}
