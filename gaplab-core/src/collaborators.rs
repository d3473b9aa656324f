//! Contracts for the collaborators around the core: where candles come from
//! and where new signals go.

use thiserror::Error;

use crate::domain::{CandleSeries, Signal, Timeframe};

/// Supplies validated candle series.
pub trait CandleSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn load(&self, instrument: &str, timeframe: Timeframe) -> Result<CandleSeries, Self::Error>;
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode signal: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sink rejected signal {signal}: {reason}")]
    Rejected { signal: String, reason: String },
}

/// Receives snapshots of newly created signals.
///
/// Implementations get an owned-by-caller reference and must clone whatever
/// they keep; the pipeline keeps mutating its own copy.
pub trait SignalSink {
    fn deliver(&mut self, signal: &Signal) -> Result<(), SinkError>;
}

/// Collects delivered signals in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub delivered: Vec<Signal>,
}

impl SignalSink for MemorySink {
    fn deliver(&mut self, signal: &Signal) -> Result<(), SinkError> {
        self.delivered.push(signal.clone());
        Ok(())
    }
}
