use serde::{Deserialize, Serialize};
use std::fmt;

use super::series::SeriesKey;
use chrono::{DateTime, Utc};

/// Stable identity of a gap: series plus the anchor candle's timestamp.
///
/// At most one gap can complete on a given candle, so the anchor timestamp is
/// enough to disambiguate within a series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GapId(pub String);

impl GapId {
    pub fn new(series: &SeriesKey, anchor_timestamp: DateTime<Utc>) -> Self {
        Self(format!(
            "{}:{}:{}",
            series.instrument,
            series.timeframe,
            anchor_timestamp.timestamp()
        ))
    }
}

impl fmt::Display for GapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signal identifier. Derived from the source gap, so persisting a signal
/// twice for the same gap lands on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(pub String);

impl SignalId {
    pub fn for_gap(gap: &GapId) -> Self {
        Self(gap.0.clone())
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// BLAKE3 hex digest of a canonical configuration serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigHash(pub String);

impl ConfigHash {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// First 16 hex characters, for directory names and log lines.
    pub fn short(&self) -> &str {
        self.0.get(..16).unwrap_or(&self.0)
    }
}

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
