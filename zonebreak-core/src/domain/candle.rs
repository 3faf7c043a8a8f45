//! Candle: the fundamental market data unit.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Candle resolution. The engine runs on one fast and one slow timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    OneMinute,
    FifteenMinute,
}

impl Resolution {
    pub fn seconds(self) -> i64 {
        match self {
            Resolution::OneMinute => 60,
            Resolution::FifteenMinute => 900,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::seconds(self.seconds())
    }

    /// Start of the bucket containing `ts`, aligned to multiples of the
    /// resolution since the Unix epoch.
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let offset = ts.timestamp().rem_euclid(self.seconds());
        ts - Duration::seconds(offset) - Duration::nanoseconds(ts.timestamp_subsec_nanos() as i64)
    }

    pub fn label(self) -> &'static str {
        match self {
            Resolution::OneMinute => "1m",
            Resolution::FifteenMinute => "15m",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// OHLC candle for one asset over one bucket.
///
/// Closed candles are never mutated; the aggregator only updates the candle
/// it currently holds open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub start_time: DateTime<Utc>,
    pub resolution: Resolution,
}

impl Candle {
    pub fn new(
        start_time: DateTime<Utc>,
        resolution: Resolution,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    ) -> Self {
        Self {
            open,
            high,
            low,
            close,
            start_time,
            resolution,
        }
    }

    /// Candle opened by a single price: all four fields equal.
    pub fn opened_at(start_time: DateTime<Utc>, resolution: Resolution, price: f64) -> Self {
        Self::new(start_time, resolution, price, price, price, price)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + self.resolution.duration()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start_time && ts < self.end_time()
    }

    /// Fold another price into the candle.
    pub fn update(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }

    /// Returns true if any OHLC field is NaN.
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic OHLC sanity check: high bounds the body from above, low from below.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
    }
}

/// Raw quote from a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub asset: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn new(asset: impl Into<String>, price: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            asset: asset.into(),
            price,
            timestamp,
        }
    }
}
