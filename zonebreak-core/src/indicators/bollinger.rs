//! Bollinger Bands: moving average +/- standard deviation multiplier.
//!
//! - Middle: SMA(close, period)
//! - Upper: middle + mult * stddev(close, period)
//! - Lower: middle - mult * stddev(close, period)
//! - Width: (upper - lower) / |middle|, 0 when middle is 0
//!
//! Uses population stddev (divide by N).
//! Lookback: period - 1.

use serde::{Deserialize, Serialize};

use crate::domain::Candle;
use crate::indicators::Indicator;

/// Which output of the Bollinger Bands an `Indicator` instance produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BollingerBand {
    Upper,
    Middle,
    Lower,
    Width,
}

/// All four Bollinger outputs for one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bands {
    pub mean: f64,
    pub upper: f64,
    pub lower: f64,
    pub width: f64,
}

#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    multiplier: f64,
    band: BollingerBand,
    name: String,
}

impl Bollinger {
    pub fn new(period: usize, multiplier: f64, band: BollingerBand) -> Self {
        assert!(period >= 1, "Bollinger period must be >= 1");
        let tag = match band {
            BollingerBand::Upper => "upper",
            BollingerBand::Middle => "middle",
            BollingerBand::Lower => "lower",
            BollingerBand::Width => "width",
        };
        Self {
            period,
            multiplier,
            band,
            name: format!("bollinger_{tag}_{period}_{multiplier}"),
        }
    }

    pub fn width(period: usize, multiplier: f64) -> Self {
        Self::new(period, multiplier, BollingerBand::Width)
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Bands over the last `period` candles, or `None` if the slice is shorter
    /// than the period or contains a NaN close.
    pub fn bands(&self, candles: &[Candle]) -> Option<Bands> {
        if candles.len() < self.period {
            return None;
        }
        bands_of(&candles[candles.len() - self.period..], self.multiplier)
    }
}

fn bands_of(window: &[Candle], multiplier: f64) -> Option<Bands> {
    if window.iter().any(|c| c.close.is_nan()) {
        return None;
    }
    let first = window[0].close;
    let (mean, stddev) = if window.iter().all(|c| c.close == first) {
        // Exact for flat windows; summation would leave rounding noise.
        (first, 0.0)
    } else {
        let n = window.len() as f64;
        let mean = window.iter().map(|c| c.close).sum::<f64>() / n;
        let variance = window
            .iter()
            .map(|c| {
                let diff = c.close - mean;
                diff * diff
            })
            .sum::<f64>()
            / n;
        (mean, variance.sqrt())
    };
    let upper = mean + multiplier * stddev;
    let lower = mean - multiplier * stddev;
    let width = if mean == 0.0 {
        0.0
    } else {
        (upper - lower) / mean.abs()
    };
    Some(Bands {
        mean,
        upper,
        lower,
        width,
    })
}

impl Indicator for Bollinger {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        let n = candles.len();
        let mut result = vec![f64::NAN; n];

        if n < self.period {
            return result;
        }

        for i in (self.period - 1)..n {
            let window = &candles[i + 1 - self.period..=i];
            if let Some(b) = bands_of(window, self.multiplier) {
                result[i] = match self.band {
                    BollingerBand::Upper => b.upper,
                    BollingerBand::Middle => b.mean,
                    BollingerBand::Lower => b.lower,
                    BollingerBand::Width => b.width,
                };
            }
        }

        result
    }
}
