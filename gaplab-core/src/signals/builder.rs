//! Signal builder — turns an unfilled gap into an entry/stop/target setup.
//!
//! Pure function of (gap, current price, config). Deduplication and the
//! rejection memo live in [`SignalBook`](super::SignalBook).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::SignalConfig;
use crate::domain::{GapDirection, GapPattern, Signal, SignalId, SignalStatus, TradeSide};

/// Tolerance on the R/R floor so a ratio equal to the minimum up to rounding
/// is accepted.
pub const RISK_REWARD_EPSILON: f64 = 1e-9;

/// Why a gap did not produce a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    /// The gap has reached its fill threshold.
    Filled,
    /// Current price is not a finite positive number.
    InvalidPrice { price: f64 },
    /// Price has already retraced past the entry edge into the zone.
    PriceInZone { price: f64, entry: f64 },
    /// Stop distance collapsed to zero or below.
    DegenerateRisk { entry: f64, stop: f64 },
    /// Reward to the first target is below the configured floor.
    RiskRewardTooLow { risk_reward: f64, minimum: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filled => f.write_str("gap already filled"),
            Self::InvalidPrice { price } => write!(f, "invalid current price {price}"),
            Self::PriceInZone { price, entry } => {
                write!(f, "price {price} already past entry {entry}")
            }
            Self::DegenerateRisk { entry, stop } => {
                write!(f, "zero stop distance (entry {entry}, stop {stop})")
            }
            Self::RiskRewardTooLow {
                risk_reward,
                minimum,
            } => write!(f, "risk/reward {risk_reward:.3} below {minimum}"),
        }
    }
}

/// Entry, stop and targets for `gap`, before any eligibility check.
#[derive(Debug, Clone, PartialEq)]
pub struct Levels {
    pub entry: f64,
    pub stop: f64,
    pub targets: Vec<f64>,
    pub risk_reward: f64,
}

/// Compute the trade levels for a gap.
///
/// Entry is the edge that price meets first when retracing into the zone. The
/// stop sits beyond the opposite extreme of the three-candle pattern, pushed
/// out by `stop_buffer_fraction × gap_size`.
pub fn levels(gap: &GapPattern, config: &SignalConfig) -> Levels {
    let buffer = config.stop_buffer_fraction * gap.gap_size;
    let (entry, stop) = match gap.direction {
        GapDirection::Bullish => (gap.gap_high, gap.pattern_low - buffer),
        GapDirection::Bearish => (gap.gap_low, gap.pattern_high + buffer),
    };
    let sign = TradeSide::from_gap(gap.direction).sign();
    let risk = (entry - stop).abs();
    let targets: Vec<f64> = config
        .take_profit_levels
        .iter()
        .map(|multiple| entry + sign * multiple * risk)
        .collect();
    let risk_reward = match targets.first() {
        Some(first) if risk > 0.0 => (first - entry).abs() / risk,
        _ => 0.0,
    };
    Levels {
        entry,
        stop,
        targets,
        risk_reward,
    }
}

/// Build a signal for `gap` at `current_price`, or say why not.
///
/// `created_at` and `created_index` identify the candle whose close is
/// `current_price`; the signal only reacts to candles after it.
pub fn evaluate(
    gap: &GapPattern,
    current_price: f64,
    config: &SignalConfig,
    created_at: DateTime<Utc>,
    created_index: usize,
) -> Result<Signal, Rejection> {
    if gap.is_filled() {
        return Err(Rejection::Filled);
    }
    if !(current_price.is_finite() && current_price > 0.0) {
        return Err(Rejection::InvalidPrice {
            price: current_price,
        });
    }

    let levels = levels(gap, config);
    let in_zone = match gap.direction {
        GapDirection::Bullish => current_price < levels.entry,
        GapDirection::Bearish => current_price > levels.entry,
    };
    if in_zone {
        return Err(Rejection::PriceInZone {
            price: current_price,
            entry: levels.entry,
        });
    }
    if !((levels.entry - levels.stop).abs() > 0.0) {
        return Err(Rejection::DegenerateRisk {
            entry: levels.entry,
            stop: levels.stop,
        });
    }
    if levels.risk_reward + RISK_REWARD_EPSILON < config.min_risk_reward {
        return Err(Rejection::RiskRewardTooLow {
            risk_reward: levels.risk_reward,
            minimum: config.min_risk_reward,
        });
    }

    Ok(Signal {
        id: SignalId::for_gap(&gap.id),
        gap_id: gap.id.clone(),
        instrument: gap.instrument.clone(),
        timeframe: gap.timeframe,
        direction: gap.direction,
        side: TradeSide::from_gap(gap.direction),
        entry_price: levels.entry,
        stop_loss: levels.stop,
        take_profit_levels: levels.targets,
        take_profit_multiples: config.take_profit_levels.clone(),
        risk_reward: levels.risk_reward,
        status: SignalStatus::Pending,
        created_at,
        created_index,
        triggered_at: None,
        closed_at: None,
        exit_price: None,
        partial_exits: Vec::new(),
    })
}
