//! Engine parameters: indicators, regime rule and breakout machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ConfigHash;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Every tunable of the signal engine. Missing TOML keys take the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bollinger band width in standard deviations.
    pub sd_multiplier: f64,
    pub rsi_period: usize,
    /// RSI above this confirms an upper-band breakout.
    pub rsi_upper: f64,
    /// RSI below this confirms a lower-band breakout.
    pub rsi_lower: f64,
    pub bb_period: usize,
    pub adx_period: usize,
    /// Minimum ADX for a TRENDING regime.
    pub adx_threshold: f64,
    /// Number of prior slow snapshots in the bb_width median.
    pub regime_lookback: usize,
    pub expiry_seconds: u32,
    /// Fast candles to sit out after a trade expires.
    pub cooldown_candles: u32,
    /// Capacity of the rolling candle windows.
    pub window_capacity: usize,
    /// Stake per trade in account currency.
    pub stake: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sd_multiplier: 2.5,
            rsi_period: 14,
            rsi_upper: 65.0,
            rsi_lower: 35.0,
            bb_period: 20,
            adx_period: 14,
            adx_threshold: 20.0,
            regime_lookback: 15,
            expiry_seconds: 60,
            cooldown_candles: 1,
            window_capacity: 64,
            stake: 1.0,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rsi_period == 0 {
            return Err(invalid("rsi_period", "must be >= 1"));
        }
        if self.bb_period == 0 {
            return Err(invalid("bb_period", "must be >= 1"));
        }
        if self.adx_period == 0 {
            return Err(invalid("adx_period", "must be >= 1"));
        }
        if self.regime_lookback == 0 {
            return Err(invalid("regime_lookback", "must be >= 1"));
        }
        if self.sd_multiplier.is_nan() || self.sd_multiplier <= 0.0 {
            return Err(invalid("sd_multiplier", "must be > 0"));
        }
        if !(0.0..=100.0).contains(&self.rsi_lower) || !(0.0..=100.0).contains(&self.rsi_upper) {
            return Err(invalid("rsi_upper/rsi_lower", "must lie in [0, 100]"));
        }
        if self.rsi_lower >= self.rsi_upper {
            return Err(invalid(
                "rsi_lower",
                format!("{} must be below rsi_upper {}", self.rsi_lower, self.rsi_upper),
            ));
        }
        if !(0.0..=100.0).contains(&self.adx_threshold) {
            return Err(invalid("adx_threshold", "must lie in [0, 100]"));
        }
        if self.expiry_seconds == 0 || self.expiry_seconds % 60 != 0 {
            return Err(invalid("expiry_seconds", "must be a positive multiple of 60"));
        }
        let needed = self.required_window();
        if self.window_capacity < needed {
            return Err(invalid(
                "window_capacity",
                format!(
                    "{} is smaller than the {needed} candles the indicators need",
                    self.window_capacity
                ),
            ));
        }
        if self.stake.is_nan() || self.stake <= 0.0 {
            return Err(invalid("stake", "must be > 0"));
        }
        Ok(())
    }

    /// Smallest window that lets every indicator produce a value.
    pub fn required_window(&self) -> usize {
        (self.rsi_period + 1)
            .max(self.bb_period)
            .max(2 * self.adx_period)
    }

    /// Deterministic hash of the parameter set.
    pub fn config_hash(&self) -> ConfigHash {
        // A struct of plain numbers always serializes; field order is fixed.
        let json = serde_json::to_string(self).unwrap_or_default();
        ConfigHash::from_bytes(json.as_bytes())
    }
}
