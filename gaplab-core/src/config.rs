//! Pipeline configuration — every recognized option, with defaults and range
//! checks performed once at load time.
//!
//! TOML layout:
//!
//! ```toml
//! [detector]
//! min_gap_percentage = 0.1
//! lookback_candles = 100
//!
//! [signals]
//! min_risk_reward = 2.0
//! take_profit_levels = [2.0, 3.0, 4.0]
//! max_signal_age = "24h"
//!
//! [backtest]
//! risk_per_trade = 0.01
//! initial_capital = 10000.0
//! commission_percent = 0.0
//! slippage_percent = 0.0
//! ```

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::timeframe::{format_minutes, parse_minutes};
use crate::domain::{ConfigHash, TimeframeError};

/// Configuration failures. Raised before any candle is processed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {field} = {value}: {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("take_profit_levels must not be empty")]
    EmptyTakeProfitLevels,

    #[error("take_profit_levels must be strictly increasing, got {0:?}")]
    UnorderedTakeProfitLevels(Vec<f64>),
}

fn invalid(field: &'static str, value: impl fmt::Display, reason: &'static str) -> ConfigError {
    ConfigError::Invalid {
        field,
        value: value.to_string(),
        reason,
    }
}

/// A positive duration written as `"<n>m|h|d|w"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Span {
    minutes: u32,
}

impl Span {
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (minutes > 0).then_some(Self { minutes })
    }

    pub fn from_hours(hours: u32) -> Option<Self> {
        Self::from_minutes(hours.checked_mul(60)?)
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.minutes))
    }
}

impl TryFrom<String> for Span {
    type Error = TimeframeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_minutes(&value).map(|minutes| Self { minutes })
    }
}

impl From<Span> for String {
    fn from(span: Span) -> Self {
        format_minutes(span.minutes)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_minutes(self.minutes))
    }
}

// ─── Detector ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    /// Minimum gap size as a percentage of the middle candle's close.
    /// Closed lower bound.
    pub min_gap_percentage: f64,
    /// Number of most recent candles scanned for new patterns.
    pub lookback_candles: usize,
    /// Fill percentage at which a gap is latched as filled.
    pub fill_threshold: f64,
    /// Middle candle body/range must exceed this (strict). 0 disables the check.
    pub impulse_min_body_ratio: f64,
    /// Middle candle body must point in the gap direction.
    pub impulse_require_direction: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_gap_percentage: 0.1,
            lookback_candles: 100,
            fill_threshold: 100.0,
            impulse_min_body_ratio: 0.5,
            impulse_require_direction: true,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.min_gap_percentage.is_finite() || self.min_gap_percentage < 0.0 {
            return Err(invalid(
                "min_gap_percentage",
                self.min_gap_percentage,
                "must be a finite value >= 0",
            ));
        }
        if self.lookback_candles < 3 {
            return Err(invalid(
                "lookback_candles",
                self.lookback_candles,
                "must be at least 3",
            ));
        }
        if !(self.fill_threshold > 0.0 && self.fill_threshold <= 100.0) {
            return Err(invalid(
                "fill_threshold",
                self.fill_threshold,
                "must be in (0, 100]",
            ));
        }
        if !(0.0..1.0).contains(&self.impulse_min_body_ratio) {
            return Err(invalid(
                "impulse_min_body_ratio",
                self.impulse_min_body_ratio,
                "must be in [0, 1)",
            ));
        }
        Ok(())
    }
}

// ─── Signals ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignalConfig {
    /// Minimum reward/risk to the first target. Closed lower bound.
    pub min_risk_reward: f64,
    /// Target distances as multiples of the stop distance, strictly increasing.
    pub take_profit_levels: Vec<f64>,
    /// Extra stop distance beyond the pattern extreme, as a fraction of gap size.
    pub stop_buffer_fraction: f64,
    /// Pending or triggered signals older than this are expired.
    pub max_signal_age: Span,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_risk_reward: 2.0,
            take_profit_levels: vec![2.0, 3.0, 4.0],
            stop_buffer_fraction: 0.1,
            max_signal_age: Span { minutes: 24 * 60 },
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.min_risk_reward.is_finite() || self.min_risk_reward <= 0.0 {
            return Err(invalid(
                "min_risk_reward",
                self.min_risk_reward,
                "must be a finite value > 0",
            ));
        }
        if self.take_profit_levels.is_empty() {
            return Err(ConfigError::EmptyTakeProfitLevels);
        }
        if let Some(bad) = self
            .take_profit_levels
            .iter()
            .find(|m| !m.is_finite() || **m <= 0.0)
        {
            return Err(invalid(
                "take_profit_levels",
                bad,
                "every multiple must be a finite value > 0",
            ));
        }
        if self.take_profit_levels.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ConfigError::UnorderedTakeProfitLevels(
                self.take_profit_levels.clone(),
            ));
        }
        if !self.stop_buffer_fraction.is_finite() || self.stop_buffer_fraction < 0.0 {
            return Err(invalid(
                "stop_buffer_fraction",
                self.stop_buffer_fraction,
                "must be a finite value >= 0",
            ));
        }
        Ok(())
    }
}

// ─── Backtest ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BacktestSettings {
    /// Fraction of current equity lost on a stop-out.
    pub risk_per_trade: f64,
    pub initial_capital: f64,
    /// Commission per side, in percent of the filled notional.
    pub commission_percent: f64,
    /// Adverse fill offset, in percent of price, applied at entry and exit.
    pub slippage_percent: f64,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            risk_per_trade: 0.01,
            initial_capital: 10_000.0,
            commission_percent: 0.0,
            slippage_percent: 0.0,
        }
    }
}

impl BacktestSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.risk_per_trade > 0.0 && self.risk_per_trade < 1.0) {
            return Err(invalid(
                "risk_per_trade",
                self.risk_per_trade,
                "must be in (0, 1)",
            ));
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(invalid(
                "initial_capital",
                self.initial_capital,
                "must be a finite value > 0",
            ));
        }
        for (field, value) in [
            ("commission_percent", self.commission_percent),
            ("slippage_percent", self.slippage_percent),
        ] {
            if !value.is_finite() || !(0.0..100.0).contains(&value) {
                return Err(invalid(field, value, "must be in [0, 100)"));
            }
        }
        Ok(())
    }
}

// ─── Whole pipeline ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub detector: DetectorConfig,
    pub signals: SignalConfig,
    pub backtest: BacktestSettings,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detector.validate()?;
        self.signals.validate()?;
        self.backtest.validate()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Content hash over every option. Struct field order is fixed, so the
    /// JSON form is canonical.
    pub fn config_hash(&self) -> ConfigHash {
        // Plain data with no maps or custom serializers: serialization cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        ConfigHash::from_bytes(&json)
    }
}
