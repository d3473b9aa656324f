//! Timeframe — candle period length, parsed from strings like `"15m"` or `"4h"`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MINUTES_PER_HOUR: u32 = 60;
const MINUTES_PER_DAY: u32 = 60 * 24;
const MINUTES_PER_WEEK: u32 = 60 * 24 * 7;

/// The unix epoch fell on a Thursday; weekly periods start on Monday 00:00 UTC.
const EPOCH_TO_MONDAY_SECS: i64 = 4 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeframeError {
    #[error("empty timeframe string")]
    Empty,
    #[error("unknown timeframe unit '{unit}' in '{input}' (expected m, h, d or w)")]
    UnknownUnit { input: String, unit: char },
    #[error("invalid timeframe count in '{0}'")]
    InvalidCount(String),
}

/// Length of one candle period, stored in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    minutes: u32,
}

impl Timeframe {
    pub const M1: Timeframe = Timeframe { minutes: 1 };
    pub const M5: Timeframe = Timeframe { minutes: 5 };
    pub const M15: Timeframe = Timeframe { minutes: 15 };
    pub const H1: Timeframe = Timeframe { minutes: MINUTES_PER_HOUR };
    pub const H4: Timeframe = Timeframe { minutes: 4 * MINUTES_PER_HOUR };
    pub const D1: Timeframe = Timeframe { minutes: MINUTES_PER_DAY };

    /// Returns `None` for a zero-length period.
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (minutes > 0).then_some(Self { minutes })
    }

    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.minutes))
    }

    /// True if `ts` falls exactly on a period boundary.
    ///
    /// Boundaries are measured from the unix epoch, except for whole-week
    /// periods, which are measured from the first Monday after it.
    pub fn is_aligned(&self, ts: DateTime<Utc>) -> bool {
        let period_secs = i64::from(self.minutes) * 60;
        let offset = if self.minutes % MINUTES_PER_WEEK == 0 {
            EPOCH_TO_MONDAY_SECS
        } else {
            0
        };
        ts.timestamp_subsec_nanos() == 0
            && (ts.timestamp() - offset).rem_euclid(period_secs) == 0
    }
}

/// Parse a span such as `"90m"`, `"24h"`, `"2d"` or `"1w"` into minutes.
///
/// Shared by timeframes and configuration durations (signal max age).
pub fn parse_minutes(input: &str) -> Result<u32, TimeframeError> {
    let trimmed = input.trim();
    let unit = trimmed.chars().last().ok_or(TimeframeError::Empty)?;
    let count: u32 = trimmed[..trimmed.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| TimeframeError::InvalidCount(input.to_string()))?;
    if count == 0 {
        return Err(TimeframeError::InvalidCount(input.to_string()));
    }
    let factor = match unit {
        'm' => 1,
        'h' => MINUTES_PER_HOUR,
        'd' => MINUTES_PER_DAY,
        'w' => MINUTES_PER_WEEK,
        other => {
            return Err(TimeframeError::UnknownUnit {
                input: input.to_string(),
                unit: other,
            })
        }
    };
    count
        .checked_mul(factor)
        .ok_or_else(|| TimeframeError::InvalidCount(input.to_string()))
}

/// Render minutes in the largest unit that divides them evenly.
pub fn format_minutes(minutes: u32) -> String {
    if minutes % MINUTES_PER_WEEK == 0 {
        format!("{}w", minutes / MINUTES_PER_WEEK)
    } else if minutes % MINUTES_PER_DAY == 0 {
        format!("{}d", minutes / MINUTES_PER_DAY)
    } else if minutes % MINUTES_PER_HOUR == 0 {
        format!("{}h", minutes / MINUTES_PER_HOUR)
    } else {
        format!("{minutes}m")
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_minutes(s).map(|minutes| Self { minutes })
    }
}

impl TryFrom<String> for Timeframe {
    type Error = TimeframeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_minutes(self.minutes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_common_timeframes() {
        assert_eq!("1m".parse::<Timeframe>().unwrap(), Timeframe::M1);
        assert_eq!("15m".parse::<Timeframe>().unwrap(), Timeframe::M15);
        assert_eq!("4h".parse::<Timeframe>().unwrap(), Timeframe::H4);
        assert_eq!("1d".parse::<Timeframe>().unwrap(), Timeframe::D1);
        assert_eq!("1w".parse::<Timeframe>().unwrap().minutes(), 10_080);
    }

    #[test]
    fn display_uses_largest_unit() {
        assert_eq!(Timeframe::H4.to_string(), "4h");
        assert_eq!(Timeframe::from_minutes(90).unwrap().to_string(), "90m");
        assert_eq!(Timeframe::from_minutes(1440).unwrap().to_string(), "1d");
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!("".parse::<Timeframe>(), Err(TimeframeError::Empty));
        assert!(matches!(
            "5x".parse::<Timeframe>(),
            Err(TimeframeError::UnknownUnit { unit: 'x', .. })
        ));
        assert!("0h".parse::<Timeframe>().is_err());
        assert!("h".parse::<Timeframe>().is_err());
    }

    #[test]
    fn alignment() {
        let aligned = Utc.with_ymd_and_hms(2024, 3, 1, 4, 0, 0).unwrap();
        let off = Utc.with_ymd_and_hms(2024, 3, 1, 4, 30, 0).unwrap();
        assert!(Timeframe::H4.is_aligned(aligned));
        assert!(!Timeframe::H4.is_aligned(off));
        assert!(Timeframe::M15.is_aligned(off));
    }

    #[test]
    fn weekly_alignment_starts_on_monday() {
        let weekly: Timeframe = "1w".parse().unwrap();
        let monday = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let thursday = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap();
        assert!(weekly.is_aligned(monday));
        assert!(!weekly.is_aligned(thursday));
        assert!(Timeframe::D1.is_aligned(thursday));
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&Timeframe::H1).unwrap();
        assert_eq!(json, "\"1h\"");
        let back: Timeframe = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Timeframe::H1);
    }
}
