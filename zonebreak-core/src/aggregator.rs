//! Candle aggregation: ticks into candles, and fast candles into slow ones.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::{Candle, Resolution};

/// Lifecycle events emitted while aggregating ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CandleEvent {
    Opened {
        start: DateTime<Utc>,
        open: f64,
    },
    Closed(Candle),
}

/// Builds candles of one resolution from a tick stream.
///
/// A candle closes when the first tick of a later bucket arrives, or when
/// [`CandleAggregator::flush`] is called after the bucket has elapsed.
/// Ticks older than the open bucket are dropped, so a closed candle is never
/// reopened (e.g. replayed ticks after a reconnect).
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    resolution: Resolution,
    current: Option<Candle>,
    last_closed_start: Option<DateTime<Utc>>,
    stale_ticks: u64,
}

impl CandleAggregator {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            current: None,
            last_closed_start: None,
            stale_ticks: 0,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Candle currently being built.
    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    /// Ticks discarded because their bucket had already closed.
    pub fn stale_ticks(&self) -> u64 {
        self.stale_ticks
    }

    pub fn on_tick(&mut self, price: f64, ts: DateTime<Utc>) -> Vec<CandleEvent> {
        let bucket = self.resolution.bucket_start(ts);
        let mut events = Vec::new();

        match self.current.as_ref().map(|c| c.start_time) {
            Some(start) if bucket == start => {
                if let Some(cur) = self.current.as_mut() {
                    cur.update(price);
                }
                return events;
            }
            Some(start) if bucket < start => {
                self.drop_stale(ts);
                return events;
            }
            Some(_) => {
                if let Some(closed) = self.close_current() {
                    events.push(CandleEvent::Closed(closed));
                }
            }
            None => {
                if self.last_closed_start.is_some_and(|s| bucket <= s) {
                    self.drop_stale(ts);
                    return events;
                }
            }
        }

        self.current = Some(Candle::opened_at(bucket, self.resolution, price));
        events.push(CandleEvent::Opened {
            start: bucket,
            open: price,
        });
        events
    }

    /// Close the open candle if its bucket has fully elapsed at `now`.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Option<Candle> {
        match self.current {
            Some(cur) if now >= cur.end_time() => self.close_current(),
            _ => None,
        }
    }

    fn close_current(&mut self) -> Option<Candle> {
        let closed = self.current.take()?;
        self.last_closed_start = Some(closed.start_time);
        Some(closed)
    }

    fn drop_stale(&mut self, ts: DateTime<Utc>) {
        self.stale_ticks += 1;
        debug!(%ts, resolution = %self.resolution, "dropping tick for closed bucket");
    }
}

/// Folds fast candles into candles of a coarser resolution.
///
/// A slow candle is emitted as soon as the fast candle ending its bucket
/// closes. If fast candles are missing, a partial bucket is emitted when the
/// first candle of a later bucket arrives.
#[derive(Debug, Clone)]
pub struct CandleFolder {
    target: Resolution,
    current: Option<Candle>,
}

impl CandleFolder {
    pub fn new(target: Resolution) -> Self {
        Self {
            target,
            current: None,
        }
    }

    pub fn target(&self) -> Resolution {
        self.target
    }

    /// Partial slow candle built so far.
    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    /// Feed one closed fast candle; returns the slow candles it completed.
    pub fn push(&mut self, fast: &Candle) -> Vec<Candle> {
        let bucket = self.target.bucket_start(fast.start_time);
        let mut done = Vec::new();

        match self.current.as_mut() {
            Some(cur) if cur.start_time == bucket => {
                cur.high = cur.high.max(fast.high);
                cur.low = cur.low.min(fast.low);
                cur.close = fast.close;
            }
            // Older than the bucket being built.
            Some(cur) if cur.start_time > bucket => return done,
            _ => {
                if let Some(partial) = self.current.take() {
                    done.push(partial);
                }
                self.current = Some(Candle::new(
                    bucket,
                    self.target,
                    fast.open,
                    fast.high,
                    fast.low,
                    fast.close,
                ));
            }
        }

        if let Some(cur) = self.current {
            if fast.end_time() >= cur.end_time() {
                done.push(cur);
                self.current = None;
            }
        }
        done
    }
}

/// Fold a complete fast series into slow candles.
pub fn fold_candles(fast: &[Candle], target: Resolution) -> Vec<Candle> {
    let mut folder = CandleFolder::new(target);
    let mut out: Vec<Candle> = fast.iter().flat_map(|c| folder.push(c)).collect();
    if let Some(partial) = folder.current() {
        out.push(*partial);
    }
    out
}
