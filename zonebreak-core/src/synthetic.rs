//! Synthetic one-minute markets for backtesting.
//!
//! Two modes:
//! - `Default`: Gaussian random walk with occasional volatility bursts.
//! - `Zigzag`: alternating CHOPPY (mean-reverting, narrow) and TRENDING
//!   (drifting, direction flips every trend) segments. Segment lengths are
//!   whole slow candles so boundaries line up with 15-minute closes, and the
//!   segments are returned as ground truth for the regime classifier.
//!
//! Output is a pure function of (config, seed, count, mode).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::domain::{Candle, CandleSeries, Resolution};
use crate::regime::RegimeLabel;

/// Fast candles per slow candle.
const FAST_PER_SLOW: usize = 15;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketMode {
    #[default]
    Default,
    Zigzag,
}

impl FromStr for MarketMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" | "random" => Ok(MarketMode::Default),
            "zigzag" => Ok(MarketMode::Zigzag),
            other => Err(format!("unknown market mode '{other}' (expected default or zigzag)")),
        }
    }
}

impl fmt::Display for MarketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketMode::Default => f.write_str("default"),
            MarketMode::Zigzag => f.write_str("zigzag"),
        }
    }
}

fn default_start_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub start_price: f64,
    /// Start of the first candle; fixed so output never depends on the clock.
    pub start_time: DateTime<Utc>,

    // Default mode
    pub volatility: f64,
    pub burst_probability: f64,
    pub burst_length: usize,
    pub burst_multiplier: f64,

    // Zigzag mode
    pub trend_drift: f64,
    pub trend_volatility: f64,
    pub chop_volatility: f64,
    /// Pull toward the segment's opening price per candle, in [0, 1].
    pub chop_reversion: f64,
    pub min_segment_slow: usize,
    pub max_segment_slow: usize,
    pub impulse_probability: f64,
    /// Impulse size range, in multiples of `trend_volatility`.
    pub impulse_min: f64,
    pub impulse_max: f64,

    /// Wick length relative to the candle's volatility.
    pub wick_ratio: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            start_price: 1.1,
            start_time: default_start_time(),
            volatility: 0.0002,
            burst_probability: 0.01,
            burst_length: 20,
            burst_multiplier: 3.0,
            trend_drift: 0.0002,
            trend_volatility: 0.0002,
            chop_volatility: 0.0001,
            chop_reversion: 0.05,
            min_segment_slow: 16,
            max_segment_slow: 24,
            impulse_probability: 0.02,
            impulse_min: 6.0,
            impulse_max: 10.0,
            wick_ratio: 0.5,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bad = |field: &'static str, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };
        if self.start_price.is_nan() || self.start_price <= 0.0 {
            return bad("start_price", "must be > 0");
        }
        if self.start_time.timestamp() % Resolution::FifteenMinute.seconds() != 0 {
            return bad("start_time", "must be aligned to a 15-minute boundary");
        }
        for (field, p) in [
            ("burst_probability", self.burst_probability),
            ("impulse_probability", self.impulse_probability),
            ("chop_reversion", self.chop_reversion),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return bad(field, "must lie in [0, 1]");
            }
        }
        if self.min_segment_slow == 0 || self.min_segment_slow > self.max_segment_slow {
            return bad("min_segment_slow", "must be >= 1 and <= max_segment_slow");
        }
        if self.impulse_min > self.impulse_max {
            return bad("impulse_min", "must be <= impulse_max");
        }
        Ok(())
    }
}

/// A ground-truth regime segment: `len` candles starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub label: RegimeLabel,
    pub start: usize,
    pub len: usize,
}

impl Segment {
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticMarket {
    pub series: CandleSeries,
    /// Empty for `MarketMode::Default`, which has no ground truth.
    pub segments: Vec<Segment>,
    pub seed: u64,
    pub mode: MarketMode,
}

impl SyntheticMarket {
    /// Ground-truth label of candle `index`.
    pub fn label_at(&self, index: usize) -> Option<RegimeLabel> {
        let pos = self.segments.partition_point(|s| s.end() <= index);
        self.segments
            .get(pos)
            .filter(|s| s.contains(index))
            .map(|s| s.label)
    }

    /// Candle indices at which a new segment starts (the first excluded).
    pub fn boundaries(&self) -> Vec<usize> {
        self.segments.iter().skip(1).map(|s| s.start).collect()
    }

    pub fn has_ground_truth(&self) -> bool {
        !self.segments.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MarketGenerator {
    config: GeneratorConfig,
}

impl MarketGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn generate(
        &self,
        asset: &str,
        seed: u64,
        count: usize,
        mode: MarketMode,
    ) -> SyntheticMarket {
        let mut rng = StdRng::seed_from_u64(seed);
        let (candles, segments) = match mode {
            MarketMode::Default => (self.random_walk(&mut rng, count), Vec::new()),
            MarketMode::Zigzag => self.zigzag(&mut rng, count),
        };
        SyntheticMarket {
            series: CandleSeries::from_contiguous(asset, Resolution::OneMinute, candles),
            segments,
            seed,
            mode,
        }
    }

    fn start_of(&self, index: usize) -> DateTime<Utc> {
        self.config.start_time + Duration::minutes(index as i64)
    }

    fn floor(&self) -> f64 {
        self.config.start_price * 0.01
    }

    fn candle(&self, rng: &mut StdRng, index: usize, open: f64, close: f64, vol: f64) -> Candle {
        let wick = vol * self.config.wick_ratio;
        let high = open.max(close) + standard_normal(rng).abs() * wick;
        let low = (open.min(close) - standard_normal(rng).abs() * wick).max(self.floor() * 0.5);
        Candle::new(self.start_of(index), Resolution::OneMinute, open, high, low, close)
    }

    fn random_walk(&self, rng: &mut StdRng, count: usize) -> Vec<Candle> {
        let cfg = &self.config;
        let mut candles = Vec::with_capacity(count);
        let mut price = cfg.start_price;
        let mut burst_left = 0usize;

        for i in 0..count {
            if burst_left == 0 && rng.gen::<f64>() < cfg.burst_probability {
                burst_left = cfg.burst_length;
            }
            let vol = if burst_left > 0 {
                burst_left -= 1;
                cfg.volatility * cfg.burst_multiplier
            } else {
                cfg.volatility
            };
            let open = price;
            let close = (open + vol * standard_normal(rng)).max(self.floor());
            candles.push(self.candle(rng, i, open, close, vol));
            price = close;
        }
        candles
    }

    fn zigzag(&self, rng: &mut StdRng, count: usize) -> (Vec<Candle>, Vec<Segment>) {
        let cfg = &self.config;
        let mut candles = Vec::with_capacity(count);
        let mut segments = Vec::new();
        let mut price = cfg.start_price;
        let mut trending = false;
        let mut direction = 1.0;
        let mut i = 0;

        while i < count {
            let slow = rng.gen_range(cfg.min_segment_slow..=cfg.max_segment_slow);
            let len = (slow * FAST_PER_SLOW).min(count - i);
            let label = if trending {
                RegimeLabel::Trending
            } else {
                RegimeLabel::Choppy
            };
            segments.push(Segment {
                label,
                start: i,
                len,
            });

            let anchor = price;
            for j in 0..len {
                let open = price;
                let (close, vol) = if trending {
                    let mut step = direction * cfg.trend_drift
                        + cfg.trend_volatility * standard_normal(rng);
                    if rng.gen::<f64>() < cfg.impulse_probability {
                        let size = if cfg.impulse_max > cfg.impulse_min {
                            rng.gen_range(cfg.impulse_min..cfg.impulse_max)
                        } else {
                            cfg.impulse_min
                        };
                        step += direction * size * cfg.trend_volatility;
                    }
                    (open + step, cfg.trend_volatility)
                } else {
                    let pull = cfg.chop_reversion * (anchor - open);
                    (
                        open + pull + cfg.chop_volatility * standard_normal(rng),
                        cfg.chop_volatility,
                    )
                };
                let close = close.max(self.floor());
                candles.push(self.candle(rng, i + j, open, close, vol));
                price = close;
            }

            i += len;
            if trending {
                direction = -direction;
            }
            trending = !trending;
        }
        (candles, segments)
    }
}

/// Convenience wrapper with the default generator config.
pub fn generate(seed: u64, count: usize, mode: MarketMode) -> SyntheticMarket {
    MarketGenerator::default().generate("SYNTH", seed, count, mode)
}

/// Standard normal draw (Box–Muller).
fn standard_normal(rng: &mut StdRng) -> f64 {
    // gen::<f64>() is in [0, 1); flip it so ln never sees 0.
    let u1 = 1.0 - rng.gen::<f64>();
    let u2 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_market() {
        let a = generate(42, 1000, MarketMode::Zigzag);
        let b = generate(42, 1000, MarketMode::Zigzag);
        assert_eq!(a, b);
    }

    #[test]
    fn different_seed_different_market() {
        let a = generate(42, 500, MarketMode::Default);
        let b = generate(43, 500, MarketMode::Default);
        assert_ne!(a.series, b.series);
    }

    #[test]
    fn series_is_contiguous_and_sane() {
        for mode in [MarketMode::Default, MarketMode::Zigzag] {
            let m = generate(7, 2000, mode);
            assert_eq!(m.series.len(), 2000);
            assert!(m.series.gaps().is_empty());
            assert!(m.series.iter().all(|c| c.is_sane()), "insane candle in {mode}");
        }
    }

    #[test]
    fn zigzag_segments_cover_series_and_alternate() {
        let m = generate(42, 5000, MarketMode::Zigzag);
        assert_eq!(m.segments[0].start, 0);
        assert_eq!(m.segments[0].label, RegimeLabel::Choppy);
        assert_eq!(m.segments.last().unwrap().end(), 5000);
        for pair in m.segments.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start);
            assert_ne!(pair[0].label, pair[1].label);
        }
        // Every boundary but a truncated tail sits on a slow candle edge
        for b in m.boundaries() {
            assert_eq!(b % FAST_PER_SLOW, 0);
        }
    }

    #[test]
    fn label_at_matches_segments() {
        let m = generate(3, 3000, MarketMode::Zigzag);
        for s in &m.segments {
            assert_eq!(m.label_at(s.start), Some(s.label));
            assert_eq!(m.label_at(s.end() - 1), Some(s.label));
        }
        assert_eq!(m.label_at(3000), None);
    }

    #[test]
    fn default_mode_has_no_ground_truth() {
        let m = generate(1, 100, MarketMode::Default);
        assert!(!m.has_ground_truth());
        assert_eq!(m.label_at(0), None);
    }

    #[test]
    fn start_time_is_fixed_epoch() {
        let m = generate(1, 10, MarketMode::Default);
        assert_eq!(
            m.series.first().unwrap().start_time,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn mode_parses() {
        assert_eq!("zigzag".parse::<MarketMode>(), Ok(MarketMode::Zigzag));
        assert_eq!("Default".parse::<MarketMode>(), Ok(MarketMode::Default));
        assert!("sine".parse::<MarketMode>().is_err());
    }

    #[test]
    fn rejects_misaligned_start() {
        let cfg = GeneratorConfig {
            start_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 7, 0).unwrap(),
            ..Default::default()
        };
        assert!(MarketGenerator::new(cfg).is_err());
    }

    #[test]
    fn standard_normal_is_centered() {
        let mut rng = StdRng::seed_from_u64(9);
        let n = 20_000;
        let mean = (0..n).map(|_| standard_normal(&mut rng)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.05, "mean {mean}");
    }
}
