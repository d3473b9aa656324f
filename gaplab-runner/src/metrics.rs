//! Performance statistics — pure functions over closed trades and the equity
//! curve.
//!
//! Ratios use `pnl_percentage` (return on equity at entry), so fixed-fractional
//! compounding does not distort them. Undefined ratios are reported as NaN or
//! infinity, never as an error:
//! - `win_rate` is NaN with no closed trades
//! - `profit_factor` is infinite with profit and no loss, 0 with loss and no
//!   profit, NaN with neither

use serde::{Deserialize, Serialize};

use crate::backtest::BacktestTrade;

/// Aggregate statistics for one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub trade_count: usize,
    pub wins: usize,
    pub losses: usize,
    #[serde(with = "float_repr")]
    pub win_rate: f64,
    #[serde(with = "float_repr")]
    pub profit_factor: f64,
    /// Largest peak-to-trough equity drop as a positive fraction of the peak.
    pub max_drawdown: f64,
    /// (final - initial) / initial.
    pub total_return: f64,
    pub final_equity: f64,
    #[serde(with = "float_repr")]
    pub average_r: f64,
    #[serde(with = "float_repr")]
    pub average_win_pct: f64,
    #[serde(with = "float_repr")]
    pub average_loss_pct: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
}

impl PerformanceStats {
    /// Compute every statistic from closed trades and the per-close equity
    /// curve.
    pub fn compute(trades: &[BacktestTrade], equity_curve: &[f64], initial_capital: f64) -> Self {
        let final_equity = equity_curve.last().copied().unwrap_or(initial_capital);
        Self {
            trade_count: trades.len(),
            wins: trades.iter().filter(|t| t.is_winner()).count(),
            losses: trades.iter().filter(|t| t.is_loser()).count(),
            win_rate: win_rate(trades),
            profit_factor: profit_factor(trades),
            max_drawdown: max_drawdown(initial_capital, equity_curve),
            total_return: total_return(initial_capital, final_equity),
            final_equity,
            average_r: mean(trades.iter().map(|t| t.r_multiple)),
            average_win_pct: mean(
                trades
                    .iter()
                    .filter(|t| t.is_winner())
                    .map(|t| t.pnl_percentage),
            ),
            average_loss_pct: mean(
                trades
                    .iter()
                    .filter(|t| t.is_loser())
                    .map(|t| t.pnl_percentage),
            ),
            max_consecutive_wins: max_consecutive(trades, BacktestTrade::is_winner),
            max_consecutive_losses: max_consecutive(trades, BacktestTrade::is_loser),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Fraction of closed trades that made money. NaN when there are none.
pub fn win_rate(trades: &[BacktestTrade]) -> f64 {
    if trades.is_empty() {
        return f64::NAN;
    }
    trades.iter().filter(|t| t.is_winner()).count() as f64 / trades.len() as f64
}

/// Gross profit over gross loss, in percentage points of equity.
pub fn profit_factor(trades: &[BacktestTrade]) -> f64 {
    let gross_profit: f64 = trades
        .iter()
        .filter(|t| t.is_winner())
        .map(|t| t.pnl_percentage)
        .sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.is_loser())
        .map(|t| t.pnl_percentage.abs())
        .sum();

    match (gross_profit > 0.0, gross_loss > 0.0) {
        (_, true) => gross_profit / gross_loss,
        (true, false) => f64::INFINITY,
        (false, false) => f64::NAN,
    }
}

/// Maximum drawdown as a positive fraction. The running peak starts at
/// `initial_capital`.
pub fn max_drawdown(initial_capital: f64, equity_curve: &[f64]) -> f64 {
    let mut peak = initial_capital;
    let mut max_dd = 0.0_f64;
    for &equity in equity_curve {
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - equity) / peak);
        }
    }
    max_dd
}

pub fn total_return(initial_capital: f64, final_equity: f64) -> f64 {
    if initial_capital <= 0.0 {
        return 0.0;
    }
    (final_equity - initial_capital) / initial_capital
}

// ─── Helpers ────────────────────────────────────────────────────────

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        return f64::NAN;
    }
    sum / count as f64
}

fn max_consecutive(trades: &[BacktestTrade], pred: fn(&BacktestTrade) -> bool) -> usize {
    let mut best = 0;
    let mut current = 0;
    for trade in trades {
        if pred(trade) {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

/// JSON has no NaN or infinity. Non-finite values are written as the strings
/// `"NaN"`, `"inf"` and `"-inf"` and read back the same way.
pub(crate) mod float_repr {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if *value > 0.0 {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(t) => match t.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid float {other:?}"))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::ExitReason;
    use chrono::{TimeZone, Utc};
    use gaplab_core::domain::{SignalId, TradeSide};

    fn trade(r: f64) -> BacktestTrade {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        BacktestTrade {
            signal_id: SignalId("T:1h:0".into()),
            side: TradeSide::Long,
            entry_time: at,
            entry_price: 100.0,
            entry_fill: 100.0,
            stop_loss: 99.0,
            take_profit: 102.0,
            exit_time: at,
            exit_price: 100.0 + r,
            exit_fill: 100.0 + r,
            exit_reason: if r < 0.0 {
                ExitReason::Stop
            } else {
                ExitReason::Target
            },
            equity_at_entry: 10_000.0,
            risk_amount: 100.0,
            position_size: 100.0,
            commission: 0.0,
            r_multiple: r,
            pnl: 100.0 * r,
            pnl_percentage: r,
        }
    }

    #[test]
    fn win_rate_empty_is_nan() {
        assert!(win_rate(&[]).is_nan());
    }

    #[test]
    fn win_rate_mixed() {
        let trades = [trade(2.0), trade(-1.0), trade(3.0), trade(-1.0), trade(2.0)];
        assert!((win_rate(&trades) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn profit_factor_edges() {
        assert_eq!(profit_factor(&[trade(2.0)]), f64::INFINITY);
        assert_eq!(profit_factor(&[trade(-1.0)]), 0.0);
        assert!(profit_factor(&[]).is_nan());
        let trades = [trade(2.0), trade(-1.0), trade(3.0), trade(-1.0), trade(2.0)];
        assert!((profit_factor(&trades) - 3.5).abs() < 1e-12);
    }

    #[test]
    fn drawdown_peak_starts_at_initial() {
        assert_eq!(max_drawdown(100.0, &[]), 0.0);
        assert!((max_drawdown(100.0, &[90.0, 95.0]) - 0.10).abs() < 1e-12);
        assert!((max_drawdown(100.0, &[120.0, 90.0, 130.0]) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn compounded_sequence_statistics() {
        // +2R, +3R, +2R, -1R, -1R at 1% risk, compounding on current equity.
        let mut equity = 10_000.0;
        let mut trades = Vec::new();
        let mut curve = Vec::new();
        for r in [2.0, 3.0, 2.0, -1.0, -1.0] {
            let mut t = trade(r);
            t.equity_at_entry = equity;
            t.risk_amount = equity * 0.01;
            t.pnl = t.risk_amount * r;
            equity += t.pnl;
            trades.push(t);
            curve.push(equity);
        }
        let stats = PerformanceStats::compute(&trades, &curve, 10_000.0);

        assert!((stats.win_rate - 0.6).abs() < 1e-12);
        assert!((stats.profit_factor - 3.5).abs() < 1e-12);
        // Peak 10_716.12 after the third win, trough 10_502.8725 after two losses.
        let peak = 10_000.0 * 1.02 * 1.03 * 1.02;
        let trough = peak * 0.99 * 0.99;
        assert!((curve[2] - 10_716.12).abs() < 1e-6);
        assert!((curve[4] - 10_502.8725).abs() < 1e-6);
        assert!((stats.max_drawdown - (peak - trough) / peak).abs() < 1e-12);
        assert!((stats.max_drawdown - 0.0199).abs() < 1e-12);
        assert!((stats.final_equity - trough).abs() < 1e-6);
    }

    #[test]
    fn streaks() {
        let trades = [trade(-1.0), trade(-1.0), trade(2.0), trade(-1.0)];
        let stats = PerformanceStats::compute(&trades, &[], 10_000.0);
        assert_eq!(stats.max_consecutive_losses, 2);
        assert_eq!(stats.max_consecutive_wins, 1);
        assert!((stats.average_r - (-0.25)).abs() < 1e-12);
    }

    #[test]
    fn non_finite_stats_survive_json() {
        let stats = PerformanceStats::compute(&[trade(2.0)], &[10_200.0], 10_000.0);
        assert_eq!(stats.profit_factor, f64::INFINITY);
        assert!(stats.average_loss_pct.is_nan());
        let json = serde_json::to_string(&stats).unwrap();
        let back: PerformanceStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back.profit_factor, f64::INFINITY);
        assert!(back.average_loss_pct.is_nan());
        assert_eq!(back.final_equity, 10_200.0);
    }
}
