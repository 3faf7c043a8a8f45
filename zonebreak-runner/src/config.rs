//! Runner configuration, loaded from TOML.
//!
//! ```toml
//! [engine]
//! adx_threshold = 20.0
//!
//! [generator]
//! trend_drift = 0.0002
//!
//! [backtest]
//! seed = 42
//! candles = 5000
//! mode = "zigzag"
//! assets = ["EURUSD", "GBPUSD"]
//!
//! [session]
//! max_reconnects = 5
//! ```
//!
//! Every table and field is optional; missing values take their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use zonebreak_core::config::{ConfigError as EngineConfigError, EngineConfig};
use zonebreak_core::synthetic::{GeneratorConfig, MarketMode};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Engine(#[from] EngineConfigError),
    #[error("invalid backtest.{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    pub seed: u64,
    /// One-minute candles generated per asset.
    pub candles: usize,
    pub mode: MarketMode,
    pub assets: Vec<String>,
    /// Slow candles after each ground-truth boundary excluded from accuracy.
    pub grace_slow_candles: usize,
    /// Minimum classifier accuracy for a run to be reported as passing.
    pub accuracy_threshold: f64,
    pub output_dir: PathBuf,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            candles: 5000,
            mode: MarketMode::Zigzag,
            assets: vec!["EURUSD".to_string()],
            grace_slow_candles: 5,
            accuracy_threshold: 0.90,
            output_dir: PathBuf::from("runs"),
        }
    }
}

/// Live/replay session tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Reconnect attempts per disruption before the worker gives up.
    pub max_reconnects: u32,
    /// First reconnect delay; doubles on every further attempt.
    pub reconnect_base_ms: u64,
    /// Sleep between idle polls of the feed.
    pub idle_poll_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_reconnects: 5,
            reconnect_base_ms: 250,
            idle_poll_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub engine: EngineConfig,
    pub generator: GeneratorConfig,
    pub backtest: BacktestSettings,
    pub session: SessionSettings,
}

impl BacktestConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.generator.validate()?;

        let b = &self.backtest;
        if b.candles == 0 {
            return Err(invalid("candles", "must be > 0"));
        }
        if b.assets.is_empty() {
            return Err(invalid("assets", "at least one asset is required"));
        }
        let mut seen = std::collections::HashSet::new();
        for asset in &b.assets {
            if asset.trim().is_empty() {
                return Err(invalid("assets", "asset names must be non-empty"));
            }
            if !seen.insert(asset.as_str()) {
                return Err(invalid("assets", format!("duplicate asset '{asset}'")));
            }
        }
        if !(0.0..=1.0).contains(&b.accuracy_threshold) {
            return Err(invalid("accuracy_threshold", "must lie in [0, 1]"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = BacktestConfig::from_toml("").unwrap();
        assert_eq!(cfg, BacktestConfig::default());
        assert_eq!(cfg.backtest.seed, 42);
        assert_eq!(cfg.backtest.mode, MarketMode::Zigzag);
        assert_eq!(cfg.engine.sd_multiplier, 2.5);
    }

    #[test]
    fn tables_override_fields() {
        let cfg = BacktestConfig::from_toml(
            r#"
            [engine]
            adx_threshold = 25.0

            [backtest]
            seed = 7
            mode = "default"
            assets = ["EURUSD", "USDJPY"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.engine.adx_threshold, 25.0);
        assert_eq!(cfg.engine.rsi_period, 14);
        assert_eq!(cfg.backtest.seed, 7);
        assert_eq!(cfg.backtest.mode, MarketMode::Default);
        assert_eq!(cfg.backtest.assets.len(), 2);
        assert_eq!(cfg.backtest.candles, 5000);
    }

    #[test]
    fn engine_errors_surface() {
        let err = BacktestConfig::from_toml("[engine]\nexpiry_seconds = 45\n").unwrap_err();
        assert!(matches!(err, ConfigError::Engine(_)));
    }

    #[test]
    fn rejects_duplicate_assets() {
        let err =
            BacktestConfig::from_toml("[backtest]\nassets = [\"EURUSD\", \"EURUSD\"]\n").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_zero_candles() {
        assert!(BacktestConfig::from_toml("[backtest]\ncandles = 0\n").is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = BacktestConfig::from_file(Path::new("/nonexistent/zonebreak.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
