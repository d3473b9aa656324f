//! Domain types for GapLab

pub mod candle;
pub mod gap;
pub mod ids;
pub mod issue;
pub mod series;
pub mod signal;
pub mod timeframe;

pub use candle::Candle;
pub use gap::{confidence_score, GapDirection, GapPattern};
pub use ids::{ConfigHash, GapId, SignalId};
pub use issue::{DataIssue, IssueKind};
pub use series::{CandleSeries, SeriesError, SeriesKey};
pub use signal::{PartialExit, Signal, SignalStatus, TradeSide};
pub use timeframe::{Timeframe, TimeframeError};
