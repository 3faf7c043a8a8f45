//! Candle containers: an unbounded ordered series and a bounded rolling window.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::candle::{Candle, Resolution};

/// Continuity violations detected when appending a candle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("data gap: expected candle at {expected}, got {actual}")]
    DataGap {
        expected: DateTime<Utc>,
        actual: DateTime<Utc>,
    },
    #[error("out-of-order candle: {actual} does not follow {last}")]
    OutOfOrder {
        last: DateTime<Utc>,
        actual: DateTime<Utc>,
    },
    #[error("resolution mismatch: expected {expected}, got {actual}")]
    ResolutionMismatch {
        expected: Resolution,
        actual: Resolution,
    },
}

/// A detected hole between two consecutive candles of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    /// Index of the first candle after the hole.
    pub index: usize,
    pub expected: DateTime<Utc>,
    pub actual: DateTime<Utc>,
}

/// Ordered candles for one asset at one resolution.
///
/// Start times are strictly increasing. Holes are allowed (a feed can drop
/// minutes) and are reported by [`CandleSeries::gaps`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleSeries {
    asset: String,
    resolution: Resolution,
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(asset: impl Into<String>, resolution: Resolution) -> Self {
        Self {
            asset: asset.into(),
            resolution,
            candles: Vec::new(),
        }
    }

    /// Build a series, validating ordering and resolution of every candle.
    pub fn from_candles(
        asset: impl Into<String>,
        resolution: Resolution,
        candles: Vec<Candle>,
    ) -> Result<Self, SeriesError> {
        let mut series = Self::new(asset, resolution);
        series.candles.reserve(candles.len());
        for candle in candles {
            series.push(candle)?;
        }
        Ok(series)
    }

    /// Wrap candles the caller built in order (generators, folds).
    pub(crate) fn from_contiguous(
        asset: impl Into<String>,
        resolution: Resolution,
        candles: Vec<Candle>,
    ) -> Self {
        debug_assert!(candles
            .windows(2)
            .all(|p| p[0].start_time < p[1].start_time));
        Self {
            asset: asset.into(),
            resolution,
            candles,
        }
    }

    /// Append a candle. Rejects candles that do not strictly follow the last one.
    pub fn push(&mut self, candle: Candle) -> Result<(), SeriesError> {
        if candle.resolution != self.resolution {
            return Err(SeriesError::ResolutionMismatch {
                expected: self.resolution,
                actual: candle.resolution,
            });
        }
        if let Some(last) = self.candles.last() {
            if candle.start_time <= last.start_time {
                return Err(SeriesError::OutOfOrder {
                    last: last.start_time,
                    actual: candle.start_time,
                });
            }
        }
        self.candles.push(candle);
        Ok(())
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }

    /// All discontinuities in the series.
    pub fn gaps(&self) -> Vec<Gap> {
        self.candles
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[1].start_time != pair[0].end_time())
            .map(|(i, pair)| Gap {
                index: i + 1,
                expected: pair[0].end_time(),
                actual: pair[1].start_time,
            })
            .collect()
    }

    /// Copy of the series without the candles at `indices` (used to inject gaps).
    pub fn without(&self, indices: &[usize]) -> Self {
        let candles = self
            .candles
            .iter()
            .enumerate()
            .filter(|(i, _)| !indices.contains(i))
            .map(|(_, c)| *c)
            .collect();
        Self {
            asset: self.asset.clone(),
            resolution: self.resolution,
            candles,
        }
    }
}

/// Fixed-capacity rolling window of contiguous candles.
///
/// This is the only state the indicator engine sees. The oldest candle is
/// evicted once the window is full. A hole in the timeline discards the
/// window and restarts it from the new candle.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    resolution: Resolution,
    capacity: usize,
    buf: VecDeque<Candle>,
}

impl CandleWindow {
    pub fn new(resolution: Resolution, capacity: usize) -> Self {
        assert!(capacity >= 1, "window capacity must be >= 1");
        Self {
            resolution,
            capacity,
            buf: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a candle.
    ///
    /// On `DataGap` the candle has been accepted as the first candle of a
    /// fresh window. On `OutOfOrder` or `ResolutionMismatch` the window is
    /// left untouched.
    pub fn push(&mut self, candle: Candle) -> Result<(), SeriesError> {
        if candle.resolution != self.resolution {
            return Err(SeriesError::ResolutionMismatch {
                expected: self.resolution,
                actual: candle.resolution,
            });
        }
        let gap = match self.buf.back() {
            Some(last) if candle.start_time <= last.start_time => {
                return Err(SeriesError::OutOfOrder {
                    last: last.start_time,
                    actual: candle.start_time,
                });
            }
            Some(last) if candle.start_time != last.end_time() => Some(SeriesError::DataGap {
                expected: last.end_time(),
                actual: candle.start_time,
            }),
            _ => None,
        };

        if gap.is_some() {
            self.buf.clear();
        }
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(candle);

        match gap {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Contiguous view of the window, oldest first.
    pub fn as_slice(&mut self) -> &[Candle] {
        self.buf.make_contiguous()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.buf.back()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
