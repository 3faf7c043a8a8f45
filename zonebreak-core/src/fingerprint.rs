//! Run fingerprinting: deterministic identification of datasets and runs.
//!
//! - `dataset_hash`: BLAKE3 over the canonical byte encoding of a series.
//! - `RunFingerprint`: everything needed to reproduce a backtest run. Two
//!   runs with equal fingerprints produce identical reports.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::domain::{CandleSeries, ConfigHash, DatasetHash};
use crate::synthetic::MarketMode;

/// Hash of a candle series: asset, resolution, then every candle's start
/// time and OHLC as little-endian bytes.
pub fn dataset_hash(series: &CandleSeries) -> DatasetHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(series.asset().as_bytes());
    hasher.update(&series.resolution().seconds().to_le_bytes());
    for c in series.iter() {
        hasher.update(&c.start_time.timestamp().to_le_bytes());
        for v in [c.open, c.high, c.low, c.close] {
            hasher.update(&v.to_bits().to_le_bytes());
        }
    }
    DatasetHash(hasher.finalize().to_hex().to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFingerprint {
    pub seed: u64,
    pub mode: MarketMode,
    pub candles: usize,
    pub config_hash: ConfigHash,
    /// Per-asset dataset hashes, in asset order.
    pub datasets: Vec<(String, DatasetHash)>,
}

impl RunFingerprint {
    pub fn new(seed: u64, mode: MarketMode, candles: usize, config: &EngineConfig) -> Self {
        Self {
            seed,
            mode,
            candles,
            config_hash: config.config_hash(),
            datasets: Vec::new(),
        }
    }

    pub fn with_dataset(mut self, series: &CandleSeries) -> Self {
        self.datasets
            .push((series.asset().to_string(), dataset_hash(series)));
        self
    }

    /// Identity of the whole run, used to name output directories.
    pub fn run_hash(&self) -> ConfigHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(self.mode.to_string().as_bytes());
        hasher.update(&(self.candles as u64).to_le_bytes());
        hasher.update(self.config_hash.0.as_bytes());
        for (asset, hash) in &self.datasets {
            hasher.update(asset.as_bytes());
            hasher.update(hash.0.as_bytes());
        }
        ConfigHash(hasher.finalize().to_hex().to_string())
    }
}
