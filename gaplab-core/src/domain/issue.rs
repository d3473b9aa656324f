use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What was wrong with a skipped candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// A price field is NaN or infinite.
    Void,
    /// High/low do not bracket open/close.
    Inconsistent,
}

/// A per-candle data problem. The candle is skipped; processing continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataIssue {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub kind: IssueKind,
}

impl fmt::Display for DataIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            IssueKind::Void => "non-finite price",
            IssueKind::Inconsistent => "inconsistent OHLC",
        };
        write!(f, "candle {} at {}: {what}", self.index, self.timestamp)
    }
}
