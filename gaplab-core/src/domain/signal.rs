//! Signal — a trade setup derived from a gap, with its lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::gap::GapDirection;
use super::ids::{GapId, SignalId};
use super::timeframe::Timeframe;

/// Trade side implied by the gap direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    pub fn from_gap(direction: GapDirection) -> Self {
        match direction {
            GapDirection::Bullish => Self::Long,
            GapDirection::Bearish => Self::Short,
        }
    }

    /// +1 for long, -1 for short. Multiplying a price move by this gives the
    /// move in the trade's favor.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => f.write_str("long"),
            Self::Short => f.write_str("short"),
        }
    }
}

/// Lifecycle status. `Pending` → `Triggered` → `HitTp | HitSl`, or `Expired`
/// from either non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Pending,
    Triggered,
    HitTp,
    HitSl,
    Expired,
}

impl SignalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::HitTp | Self::HitSl | Self::Expired)
    }

    /// Position in the forward order; a transition never decreases it.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Triggered => 1,
            Self::HitTp | Self::HitSl | Self::Expired => 2,
        }
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Triggered => "triggered",
            Self::HitTp => "hit_tp",
            Self::HitSl => "hit_sl",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A further target reached on the candle that closed the signal at its
/// first target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialExit {
    /// Index into `take_profit_levels`.
    pub level: usize,
    pub price: f64,
    pub at: DateTime<Utc>,
}

/// A directional setup built from a gap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    /// Back-reference to the source gap.
    pub gap_id: GapId,
    pub instrument: String,
    pub timeframe: Timeframe,
    pub direction: GapDirection,
    pub side: TradeSide,
    pub entry_price: f64,
    pub stop_loss: f64,
    /// Ordered by increasing distance from entry.
    pub take_profit_levels: Vec<f64>,
    /// R multiples the targets were derived from, same order as the levels.
    pub take_profit_multiples: Vec<f64>,
    /// Reward to the nearest target over the stop distance.
    pub risk_reward: f64,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
    /// Index of the candle whose close was used to build the signal.
    pub created_index: usize,
    pub triggered_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Price at which the signal closed (stop, first target or timeout close).
    pub exit_price: Option<f64>,
    pub partial_exits: Vec<PartialExit>,
}

impl Signal {
    /// Stop distance in price units. Always positive for a built signal.
    pub fn risk_per_unit(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }

    /// Units to trade so a stop-out loses exactly `risk_amount`.
    pub fn position_size(&self, risk_amount: f64) -> f64 {
        let risk = self.risk_per_unit();
        if risk <= 0.0 {
            return 0.0;
        }
        risk_amount / risk
    }

    /// Result of exiting at `price`, in multiples of the initial risk.
    pub fn r_multiple_at(&self, price: f64) -> f64 {
        let risk = self.risk_per_unit();
        if risk <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) * self.side.sign() / risk
    }

    pub fn first_target(&self) -> Option<f64> {
        self.take_profit_levels.first().copied()
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Human-readable message for notification collaborators.
impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "NEW {} SIGNAL {} {}",
            self.side.to_string().to_uppercase(),
            self.instrument,
            self.timeframe
        )?;
        writeln!(f, "Entry:     {:.8}", self.entry_price)?;
        writeln!(f, "Stop loss: {:.8}", self.stop_loss)?;
        for (i, (level, multiple)) in self
            .take_profit_levels
            .iter()
            .zip(&self.take_profit_multiples)
            .enumerate()
        {
            writeln!(f, "TP{}:       {:.8} ({multiple}R)", i + 1, level)?;
        }
        writeln!(f, "Risk/reward: {:.2}", self.risk_reward)?;
        write!(f, "Source: {} gap {}", self.direction, self.gap_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!SignalStatus::Pending.is_terminal());
        assert!(!SignalStatus::Triggered.is_terminal());
        assert!(SignalStatus::HitTp.is_terminal());
        assert!(SignalStatus::HitSl.is_terminal());
        assert!(SignalStatus::Expired.is_terminal());
        assert!(SignalStatus::Pending.rank() < SignalStatus::Triggered.rank());
    }

    #[test]
    fn side_sign() {
        assert_eq!(TradeSide::from_gap(GapDirection::Bullish), TradeSide::Long);
        assert_eq!(TradeSide::from_gap(GapDirection::Bearish), TradeSide::Short);
        assert_eq!(TradeSide::Short.sign(), -1.0);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&SignalStatus::HitTp).unwrap();
        assert_eq!(json, "\"hit_tp\"");
    }
}
