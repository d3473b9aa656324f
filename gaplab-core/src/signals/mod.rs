//! Signal generation: builder, per-series book, and lifecycle.

pub mod book;
pub mod builder;
pub mod lifecycle;

pub use book::{BuildOutcome, SignalBook, SignalSummary};
pub use builder::{evaluate, levels, Levels, Rejection, RISK_REWARD_EPSILON};
pub use lifecycle::{advance, SignalTransition};
