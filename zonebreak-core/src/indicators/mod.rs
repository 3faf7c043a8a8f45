//! Indicator engine: RSI, Bollinger Bands and ADX over a rolling candle window.
//!
//! Every indicator is a pure function of the candles it is given. The engine
//! keeps no state between calls, so a snapshot computed from the rolling
//! window is bit-identical to one recomputed from the same trailing slice.

pub mod adx;
pub mod bollinger;
pub mod rsi;
pub mod smoothing;

pub use adx::Adx;
pub use bollinger::{Bands, Bollinger, BollingerBand};
pub use rsi::Rsi;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EngineConfig;
use crate::domain::Candle;

/// Trait for indicators.
///
/// Indicators take a candle slice and produce a numeric series of the same
/// length. The first `lookback()` values are `f64::NAN` (warmup).
///
/// # Look-ahead contamination guard
/// No value at index t may depend on candles after t. Every indicator must
/// pass the truncated-vs-full series test.
pub trait Indicator: Send + Sync {
    /// Human-readable name (e.g., "rsi_14", "adx_14").
    fn name(&self) -> &str;

    /// Number of leading NaN values; `lookback() + 1` candles give the first value.
    fn lookback(&self) -> usize;

    fn compute(&self, candles: &[Candle]) -> Vec<f64>;

    /// Candles required before the indicator produces a value.
    fn required_history(&self) -> usize {
        self.lookback() + 1
    }

    /// Value for the last candle of the slice, if warmed up.
    fn latest(&self, candles: &[Candle]) -> Option<f64> {
        if candles.len() < self.required_history() {
            return None;
        }
        self.compute(candles).last().copied().filter(|v| !v.is_nan())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndicatorError {
    #[error("insufficient history for {indicator}: need {required} candles, have {available}")]
    InsufficientHistory {
        indicator: String,
        required: usize,
        available: usize,
    },
}

/// Indicator values as of the close of the most recent candle in a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    pub bb_mean: f64,
    pub bb_upper: f64,
    pub bb_lower: f64,
    pub bb_width: f64,
    /// `None` until the window holds enough candles for ADX.
    pub adx: Option<f64>,
    /// Close time of the candle the snapshot describes.
    pub timestamp: DateTime<Utc>,
}

impl IndicatorSnapshot {
    pub fn is_above_upper(&self, price: f64) -> bool {
        price > self.bb_upper
    }

    pub fn is_below_lower(&self, price: f64) -> bool {
        price < self.bb_lower
    }
}

/// Computes [`IndicatorSnapshot`]s with a fixed parameter set.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    rsi: Rsi,
    bollinger: Bollinger,
    adx: Adx,
}

impl IndicatorEngine {
    pub fn new(rsi_period: usize, bb_period: usize, sd_multiplier: f64, adx_period: usize) -> Self {
        Self {
            rsi: Rsi::new(rsi_period),
            bollinger: Bollinger::width(bb_period, sd_multiplier),
            adx: Adx::new(adx_period),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.rsi_period,
            config.bb_period,
            config.sd_multiplier,
            config.adx_period,
        )
    }

    /// Candles needed for RSI and Bollinger, the two indicators a snapshot cannot omit.
    pub fn min_history(&self) -> usize {
        self.rsi
            .required_history()
            .max(self.bollinger.required_history())
    }

    /// Candles needed before `adx` is populated.
    pub fn adx_history(&self) -> usize {
        self.adx.required_history()
    }

    /// Snapshot for the last candle of `candles`.
    pub fn snapshot(&self, candles: &[Candle]) -> Result<IndicatorSnapshot, IndicatorError> {
        let Some(last) = candles.last() else {
            return Err(self.insufficient(&self.rsi, 0));
        };

        let rsi = self
            .rsi
            .latest(candles)
            .ok_or_else(|| self.insufficient(&self.rsi, candles.len()))?;
        let bands = self
            .bollinger
            .bands(candles)
            .ok_or_else(|| self.insufficient(&self.bollinger, candles.len()))?;
        let adx = self.adx.latest(candles);

        Ok(IndicatorSnapshot {
            rsi,
            bb_mean: bands.mean,
            bb_upper: bands.upper,
            bb_lower: bands.lower,
            bb_width: bands.width,
            adx,
            timestamp: last.end_time(),
        })
    }

    fn insufficient(&self, indicator: &dyn Indicator, available: usize) -> IndicatorError {
        IndicatorError::InsufficientHistory {
            indicator: indicator.name().to_string(),
            required: indicator.required_history(),
            available,
        }
    }
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Build one-minute candles from close prices for testing.
///
/// open = previous close (or close for the first candle), high/low = body
/// extremes with no wicks, so a constant series is perfectly flat.
#[cfg(test)]
pub fn make_candles(closes: &[f64]) -> Vec<Candle> {
    let data: Vec<_> = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            (open, open.max(close), open.min(close), close)
        })
        .collect();
    make_ohlc(&data)
}

/// Build one-minute candles from (open, high, low, close) tuples for testing.
#[cfg(test)]
pub fn make_ohlc(data: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
    use crate::domain::Resolution;
    use chrono::TimeZone;
    let base = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    data.iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| {
            Candle::new(
                base + chrono::Duration::minutes(i as i64),
                Resolution::OneMinute,
                open,
                high,
                low,
                close,
            )
        })
        .collect()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
