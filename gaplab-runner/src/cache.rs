//! Result caching with JSON storage, keyed by series identity and config hash.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use gaplab_core::domain::{ConfigHash, SeriesKey};

use crate::backtest::BacktestResult;
use crate::export::import_json;

/// Persistence key for a backtest result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultKey {
    pub series: SeriesKey,
    pub config_hash: ConfigHash,
}

impl ResultKey {
    pub fn new(series: SeriesKey, config_hash: ConfigHash) -> Self {
        Self {
            series,
            config_hash,
        }
    }

    pub fn for_result(result: &BacktestResult) -> Self {
        Self::new(result.series_key(), result.config_hash.clone())
    }

    /// BLAKE3 digest of the key, used as the file stem.
    pub fn digest(&self) -> String {
        let material = format!("{}|{}", self.series, self.config_hash);
        blake3::hash(material.as_bytes()).to_hex().to_string()
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.series, self.config_hash.short())
    }
}

/// Cache for backtest results. One JSON file per key.
#[derive(Debug, Clone)]
pub struct ResultCache {
    cache_dir: PathBuf,
}

impl ResultCache {
    /// Creates a new cache in `cache_dir`, creating the directory if needed.
    pub fn new(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&cache_dir).with_context(|| {
            format!("failed to create cache directory {}", cache_dir.display())
        })?;
        Ok(Self { cache_dir })
    }

    pub fn contains(&self, key: &ResultKey) -> bool {
        self.result_path(key).exists()
    }

    /// Returns `None` if the result is not cached.
    pub fn get(&self, key: &ResultKey) -> Result<Option<BacktestResult>> {
        let path = self.result_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read cached result {}", path.display()))?;
        let result = import_json(&json)
            .with_context(|| format!("failed to decode cached result {}", path.display()))?;
        Ok(Some(result))
    }

    /// Stores a complete result. Partial (cancelled) runs are not cached.
    pub fn put(&self, result: &BacktestResult) -> Result<bool> {
        if result.partial {
            return Ok(false);
        }
        let path = self.result_path(&ResultKey::for_result(result));
        let json = serde_json::to_string_pretty(result).context("failed to serialize result")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write cached result {}", path.display()))?;
        Ok(true)
    }

    pub fn remove(&self, key: &ResultKey) -> Result<()> {
        let path = self.result_path(key);
        if path.exists() {
            std::fs::remove_file(&path).context("failed to remove cached result")?;
        }
        Ok(())
    }

    /// Number of cached results.
    pub fn len(&self) -> Result<usize> {
        let count = std::fs::read_dir(&self.cache_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.path().is_file()
                    && entry.path().extension().and_then(|s| s.to_str()) == Some("json")
            })
            .count();
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn result_path(&self, key: &ResultKey) -> PathBuf {
        self.cache_dir.join(format!("{}.json", key.digest()))
    }
}
