//! Backtest engine — causal replay of the gap pipeline over one series.
//!
//! Candles are folded one at a time through [`SeriesState`], so detection and
//! signal building only ever see candles up to the one being processed.
//! Trades open when a signal triggers and close when it reaches a terminal
//! status:
//! - `HitSl` closes at the stop (reason `Stop`)
//! - `HitTp` closes at the first target (reason `Target`)
//! - `Expired` after triggering closes at the candle close (reason `Timeout`)
//!
//! Sizing is fixed-fractional: each trade risks `risk_per_trade` of equity at
//! entry, so with zero costs a stop-out loses exactly that fraction.
//!
//! Costs are optional. Slippage moves both fills against the trade by
//! `slippage_percent` of price, and commission is charged per side on the
//! filled notional. Both are folded into the trade's `r_multiple`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info};

use gaplab_core::domain::{
    CandleSeries, ConfigHash, DataIssue, SeriesError, SeriesKey, Signal, SignalId, SignalStatus,
    Timeframe, TradeSide,
};
use gaplab_core::signals::SignalTransition;
use gaplab_core::{BacktestSettings, ConfigError, PipelineConfig, SeriesState};

use crate::metrics::PerformanceStats;

/// Errors from the runner. A failed run never yields a result.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] SeriesError),
    #[error("worker pool error: {0}")]
    Pool(String),
}

/// Current schema version for persisted results.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

// ─── Trade records ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Stop,
    Target,
    Timeout,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => f.write_str("stop"),
            Self::Target => f.write_str("target"),
            Self::Timeout => f.write_str("timeout"),
        }
    }
}

/// A closed trade. `entry_price` and `exit_price` are the signal levels;
/// the `*_fill` prices include slippage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub signal_id: SignalId,
    pub side: TradeSide,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub entry_fill: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_fill: f64,
    pub exit_reason: ExitReason,
    pub equity_at_entry: f64,
    pub risk_amount: f64,
    pub position_size: f64,
    /// Commission paid on both sides.
    pub commission: f64,
    /// Net of costs, in multiples of `risk_amount`.
    pub r_multiple: f64,
    pub pnl: f64,
    /// Return on equity at entry, in percent.
    pub pnl_percentage: f64,
}

impl BacktestTrade {
    pub fn is_winner(&self) -> bool {
        self.pnl_percentage > 0.0
    }

    pub fn is_loser(&self) -> bool {
        self.pnl_percentage < 0.0
    }
}

/// A trade still open when the data ran out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenTrade {
    pub signal_id: SignalId,
    pub side: TradeSide,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub entry_fill: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub equity_at_entry: f64,
    pub risk_amount: f64,
    pub position_size: f64,
    /// Entry-side commission.
    pub commission: f64,
}

/// Fill price after slippage: entries fill worse in the trade's direction,
/// exits fill worse against it.
fn slipped(price: f64, side: TradeSide, slippage_percent: f64, entering: bool) -> f64 {
    if slippage_percent == 0.0 {
        return price;
    }
    let adverse = if entering { side.sign() } else { -side.sign() };
    price * (1.0 + adverse * slippage_percent / 100.0)
}

fn commission_on(fill: f64, position_size: f64, commission_percent: f64) -> f64 {
    fill * position_size * commission_percent / 100.0
}

impl OpenTrade {
    fn open(signal: &Signal, at: DateTime<Utc>, equity: f64, settings: &BacktestSettings) -> Self {
        let risk_amount = settings.risk_per_trade * equity;
        let position_size = signal.position_size(risk_amount);
        let entry_fill = slipped(
            signal.entry_price,
            signal.side,
            settings.slippage_percent,
            true,
        );
        Self {
            signal_id: signal.id.clone(),
            side: signal.side,
            entry_time: at,
            entry_price: signal.entry_price,
            entry_fill,
            stop_loss: signal.stop_loss,
            take_profit: signal.first_target().unwrap_or(signal.entry_price),
            equity_at_entry: equity,
            risk_amount,
            position_size,
            commission: commission_on(entry_fill, position_size, settings.commission_percent),
        }
    }

    fn close(
        self,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        exit_reason: ExitReason,
        settings: &BacktestSettings,
    ) -> BacktestTrade {
        let exit_fill = slipped(exit_price, self.side, settings.slippage_percent, false);
        let commission = self.commission
            + commission_on(exit_fill, self.position_size, settings.commission_percent);

        // R stays anchored to the planned stop distance; costs come off on top.
        let risk = (self.entry_price - self.stop_loss).abs();
        let gross_r = if risk > 0.0 {
            (exit_fill - self.entry_fill) * self.side.sign() / risk
        } else {
            0.0
        };
        let cost_r = if self.risk_amount > 0.0 {
            commission / self.risk_amount
        } else {
            0.0
        };
        let r_multiple = gross_r - cost_r;

        BacktestTrade {
            signal_id: self.signal_id,
            side: self.side,
            entry_time: self.entry_time,
            entry_price: self.entry_price,
            entry_fill: self.entry_fill,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            exit_time,
            exit_price,
            exit_fill,
            exit_reason,
            equity_at_entry: self.equity_at_entry,
            risk_amount: self.risk_amount,
            position_size: self.position_size,
            commission,
            r_multiple,
            pnl: self.risk_amount * r_multiple,
            pnl_percentage: settings.risk_per_trade * r_multiple * 100.0,
        }
    }
}

/// Equity after a trade close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub at: DateTime<Utc>,
    pub equity: f64,
}

// ─── Result ─────────────────────────────────────────────────────────

/// Complete result of one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub instrument: String,
    pub timeframe: Timeframe,
    pub config_hash: ConfigHash,
    pub config: PipelineConfig,
    pub initial_capital: f64,
    pub stats: PerformanceStats,
    pub trades: Vec<BacktestTrade>,
    pub open_trades: Vec<OpenTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub signal_count: usize,
    pub candle_count: usize,
    pub processed_candles: usize,
    /// True when the run was cancelled before the last candle.
    pub partial: bool,
    pub issues: Vec<DataIssue>,
}

impl BacktestResult {
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.instrument.clone(), self.timeframe)
    }
}

// ─── Engine ─────────────────────────────────────────────────────────

/// Run a backtest over the whole series.
pub fn run(series: &CandleSeries, config: &PipelineConfig) -> Result<BacktestResult, RunError> {
    run_with_cancel(series, config, None)
}

/// Run a backtest, polling `cancel` between candles.
///
/// A cancelled run returns everything accumulated up to the last fully
/// processed candle, with `partial` set.
pub fn run_with_cancel(
    series: &CandleSeries,
    config: &PipelineConfig,
    cancel: Option<&AtomicBool>,
) -> Result<BacktestResult, RunError> {
    config.validate()?;
    series.validate()?;

    let settings = &config.backtest;
    let mut state = SeriesState::new(series.key().clone());
    let mut equity = settings.initial_capital;
    let mut open: BTreeMap<SignalId, OpenTrade> = BTreeMap::new();
    let mut trades = Vec::new();
    let mut equity_curve = Vec::new();
    let mut signal_count = 0;
    let mut partial = false;

    while state.next_index() < series.len() {
        if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            partial = true;
            break;
        }
        let Some(outcome) = state.step(series, config)? else {
            break;
        };
        signal_count += outcome.new_signals.len();

        for transition in &outcome.transitions {
            apply_transition(
                transition,
                &state,
                &mut open,
                &mut equity,
                &mut trades,
                &mut equity_curve,
                settings,
            );
        }
    }

    let stats = PerformanceStats::compute(
        &trades,
        &equity_curve.iter().map(|p: &EquityPoint| p.equity).collect::<Vec<_>>(),
        settings.initial_capital,
    );

    info!(
        series = %series.key(),
        candles = state.next_index(),
        signals = signal_count,
        trades = trades.len(),
        win_rate = stats.win_rate,
        profit_factor = stats.profit_factor,
        max_drawdown = stats.max_drawdown,
        partial,
        "backtest complete"
    );

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        instrument: series.instrument().to_string(),
        timeframe: series.timeframe(),
        config_hash: config.config_hash(),
        config: config.clone(),
        initial_capital: settings.initial_capital,
        stats,
        trades,
        open_trades: open.into_values().collect(),
        equity_curve,
        signal_count,
        candle_count: series.len(),
        processed_candles: state.next_index(),
        partial,
        issues: state.issues().to_vec(),
    })
}

fn apply_transition(
    transition: &SignalTransition,
    state: &SeriesState,
    open: &mut BTreeMap<SignalId, OpenTrade>,
    equity: &mut f64,
    trades: &mut Vec<BacktestTrade>,
    equity_curve: &mut Vec<EquityPoint>,
    settings: &BacktestSettings,
) {
    let reason = match (transition.from, transition.to) {
        (_, SignalStatus::Triggered) => {
            if let Some(signal) = state.book().find(&transition.signal_id) {
                let trade = OpenTrade::open(signal, transition.at, *equity, settings);
                debug!(signal = %signal.id, equity = *equity, risk = trade.risk_amount, "trade opened");
                open.insert(signal.id.clone(), trade);
            }
            return;
        }
        (_, SignalStatus::HitSl) => ExitReason::Stop,
        (_, SignalStatus::HitTp) => ExitReason::Target,
        (SignalStatus::Triggered, SignalStatus::Expired) => ExitReason::Timeout,
        _ => return,
    };

    let Some(trade) = open.remove(&transition.signal_id) else {
        return;
    };
    let closed = trade.close(transition.price, transition.at, reason, settings);
    *equity += closed.pnl;
    debug!(
        signal = %closed.signal_id,
        reason = %reason,
        r = closed.r_multiple,
        equity = *equity,
        "trade closed"
    );
    equity_curve.push(EquityPoint {
        at: transition.at,
        equity: *equity,
    });
    trades.push(closed);
}
