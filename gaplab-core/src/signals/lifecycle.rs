//! Signal state machine.
//!
//! `Pending → Triggered → HitTp | HitSl`, with `Expired` reachable from either
//! non-terminal state. Per candle the checks run in a fixed order:
//!
//! 1. trigger (pending only) when the candle reaches the entry price
//! 2. stop (triggered only), including the candle that triggered
//! 3. first target (triggered only), never on the trigger candle
//! 4. age, against `max_signal_age`
//!
//! Stop before target means a candle whose range holds both resolves as a
//! stop-out. OHLC carries no intracandle ordering, so the adverse outcome is
//! assumed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Candle, PartialExit, Signal, SignalId, SignalStatus, TradeSide};

/// A single status change, with the price it happened at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalTransition {
    pub signal_id: SignalId,
    pub from: SignalStatus,
    pub to: SignalStatus,
    pub price: f64,
    pub at: DateTime<Utc>,
}

// ─── Price reach ────────────────────────────────────────────────────

/// Candle reached `price` moving against a long (down) or a short (up).
fn reached_adverse(side: TradeSide, candle: &Candle, price: f64) -> bool {
    match side {
        TradeSide::Long => candle.low <= price,
        TradeSide::Short => candle.high >= price,
    }
}

/// Candle reached `price` moving in favor of the trade.
fn reached_favorable(side: TradeSide, candle: &Candle, price: f64) -> bool {
    match side {
        TradeSide::Long => candle.high >= price,
        TradeSide::Short => candle.low <= price,
    }
}

fn transition(
    signal: &mut Signal,
    to: SignalStatus,
    price: f64,
    at: DateTime<Utc>,
) -> SignalTransition {
    let from = signal.status;
    signal.status = to;
    match to {
        SignalStatus::Triggered => signal.triggered_at = Some(at),
        SignalStatus::HitTp | SignalStatus::HitSl => {
            signal.closed_at = Some(at);
            signal.exit_price = Some(price);
        }
        SignalStatus::Expired => {
            signal.closed_at = Some(at);
            if from == SignalStatus::Triggered {
                signal.exit_price = Some(price);
            }
        }
        SignalStatus::Pending => {}
    }
    SignalTransition {
        signal_id: signal.id.clone(),
        from,
        to,
        price,
        at,
    }
}

// ─── Advance ────────────────────────────────────────────────────────

/// Fold one candle into the signal's lifecycle.
///
/// Candles at or before `created_at`, void or inconsistent candles, and
/// terminal signals are ignored. Returns the transitions in the order they
/// happened (at most two: trigger then stop, or trigger then expiry).
pub fn advance(signal: &mut Signal, candle: &Candle, max_age: Duration) -> Vec<SignalTransition> {
    let mut transitions = Vec::new();
    if signal.status.is_terminal()
        || candle.timestamp <= signal.created_at
        || !candle.is_consistent()
    {
        return transitions;
    }

    let side = signal.side;
    let mut triggered_now = false;

    if signal.status == SignalStatus::Pending && reached_adverse(side, candle, signal.entry_price) {
        let entry = signal.entry_price;
        transitions.push(transition(signal, SignalStatus::Triggered, entry, candle.timestamp));
        triggered_now = true;
    }

    if signal.status == SignalStatus::Triggered {
        if reached_adverse(side, candle, signal.stop_loss) {
            let stop = signal.stop_loss;
            transitions.push(transition(signal, SignalStatus::HitSl, stop, candle.timestamp));
            return transitions;
        }
        if !triggered_now {
            if let Some(target) = signal.first_target() {
                if reached_favorable(side, candle, target) {
                    let partials: Vec<PartialExit> = signal
                        .take_profit_levels
                        .iter()
                        .enumerate()
                        .skip(1)
                        .filter(|(_, level)| reached_favorable(side, candle, **level))
                        .map(|(level, price)| PartialExit {
                            level,
                            price: *price,
                            at: candle.timestamp,
                        })
                        .collect();
                    signal.partial_exits.extend(partials);
                    transitions.push(transition(signal, SignalStatus::HitTp, target, candle.timestamp));
                    return transitions;
                }
            }
        }
    }

    if candle.timestamp - signal.created_at > max_age {
        transitions.push(transition(
            signal,
            SignalStatus::Expired,
            candle.close,
            candle.timestamp,
        ));
    }

    transitions
}
