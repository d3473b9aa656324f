//! SignalBook — per-series builder state.
//!
//! Holds at most one signal per gap over the gap's lifetime, remembers
//! rejected gaps so they are not re-evaluated every candle, and advances
//! open signals through their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::builder::{evaluate, Rejection};
use super::lifecycle::{advance, SignalTransition};
use crate::config::SignalConfig;
use crate::domain::{Candle, GapId, GapPattern, Signal, SignalId, TradeSide};

/// Result of asking the book for a signal on a gap.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    /// A new signal was created and is now open.
    Created(Signal),
    /// The gap already has an open signal; it is returned unchanged.
    Existing(Signal),
    /// The gap was evaluated and did not qualify.
    Rejected(Rejection),
    /// The gap was rejected earlier and its fill state has not changed since.
    Unchanged,
    /// The gap's signal has already closed.
    Consumed,
}

impl BuildOutcome {
    pub fn signal(&self) -> Option<&Signal> {
        match self {
            Self::Created(s) | Self::Existing(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_signal(self) -> Option<Signal> {
        match self {
            Self::Created(s) | Self::Existing(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RejectionRecord {
    fill_percentage: f64,
    reason: Rejection,
}

/// Open-signal counts for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSummary {
    pub total: usize,
    pub long: usize,
    pub short: usize,
    pub instruments: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalBook {
    open: BTreeMap<GapId, Signal>,
    closed: Vec<Signal>,
    consumed: BTreeSet<GapId>,
    rejected: BTreeMap<GapId, RejectionRecord>,
}

impl SignalBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a signal for `gap` at `current_price`, respecting dedup and the
    /// rejection memo.
    pub fn build(
        &mut self,
        gap: &GapPattern,
        current_price: f64,
        config: &SignalConfig,
        created_at: DateTime<Utc>,
        created_index: usize,
    ) -> BuildOutcome {
        if let Some(existing) = self.open.get(&gap.id) {
            return BuildOutcome::Existing(existing.clone());
        }
        if self.consumed.contains(&gap.id) {
            return BuildOutcome::Consumed;
        }
        if let Some(record) = self.rejected.get(&gap.id) {
            if record.fill_percentage == gap.fill_percentage {
                return BuildOutcome::Unchanged;
            }
        }

        match evaluate(gap, current_price, config, created_at, created_index) {
            Ok(signal) => {
                self.rejected.remove(&gap.id);
                self.open.insert(gap.id.clone(), signal.clone());
                BuildOutcome::Created(signal)
            }
            Err(reason) => {
                self.rejected.insert(
                    gap.id.clone(),
                    RejectionRecord {
                        fill_percentage: gap.fill_percentage,
                        reason: reason.clone(),
                    },
                );
                BuildOutcome::Rejected(reason)
            }
        }
    }

    /// Advance every open signal against `candle`. Signals reaching a
    /// terminal status move to the closed list.
    pub fn advance(&mut self, candle: &Candle, config: &SignalConfig) -> Vec<SignalTransition> {
        let max_age = config.max_signal_age.duration();
        let mut transitions = Vec::new();
        let mut finished = Vec::new();

        for (gap_id, signal) in self.open.iter_mut() {
            transitions.extend(advance(signal, candle, max_age));
            if signal.status.is_terminal() {
                finished.push(gap_id.clone());
            }
        }
        for gap_id in finished {
            if let Some(signal) = self.open.remove(&gap_id) {
                self.consumed.insert(gap_id);
                self.closed.push(signal);
            }
        }
        transitions
    }

    pub fn get(&self, gap_id: &GapId) -> Option<&Signal> {
        self.open.get(gap_id)
    }

    /// Look up a signal by id, open ones first, then the most recently closed.
    pub fn find(&self, id: &SignalId) -> Option<&Signal> {
        self.open
            .get(&GapId(id.0.clone()))
            .or_else(|| self.closed.iter().rev().find(|s| &s.id == id))
    }

    /// Open signals, ordered by gap id.
    pub fn open(&self) -> impl Iterator<Item = &Signal> {
        self.open.values()
    }

    /// Closed signals in closing order.
    pub fn closed(&self) -> &[Signal] {
        &self.closed
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Why a gap was last rejected, if it was.
    pub fn rejection(&self, gap_id: &GapId) -> Option<&Rejection> {
        self.rejected.get(gap_id).map(|r| &r.reason)
    }

    /// Drop rejection records for gaps no longer tracked by the detector.
    pub fn forget_rejections<'a>(&mut self, live: impl IntoIterator<Item = &'a GapId>) {
        let live: BTreeSet<&GapId> = live.into_iter().collect();
        self.rejected.retain(|id, _| live.contains(id));
    }

    pub fn summary(&self) -> SignalSummary {
        let mut summary = SignalSummary::default();
        for signal in self.open.values() {
            summary.total += 1;
            match signal.side {
                TradeSide::Long => summary.long += 1,
                TradeSide::Short => summary.short += 1,
            }
            summary.instruments.insert(signal.instrument.clone());
        }
        summary
    }
}
