//! Broker stand-ins: a quote feed that replays candles as ticks and an
//! executor that settles trades against the same replayed prices.
//!
//! Both share a [`PriceBoard`], the record of every tick the feed has
//! emitted. The executor only ever sees prices the feed already published,
//! so it cannot settle a trade early.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use zonebreak_core::domain::{CandleSeries, Direction, Tick, TradeId, TradeOutcome};
use zonebreak_core::feed::{ExecutionError, FeedError, OrderExecutor, QuoteFeed};

// ─── Price board ────────────────────────────────────────────────────

/// Every published tick, per asset, in time order.
#[derive(Debug, Default)]
pub struct PriceBoard {
    ticks: RwLock<HashMap<String, BTreeMap<DateTime<Utc>, f64>>>,
}

impl PriceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, tick: &Tick) {
        let mut ticks = self.ticks.write().unwrap_or_else(PoisonError::into_inner);
        ticks
            .entry(tick.asset.clone())
            .or_default()
            .insert(tick.timestamp, tick.price);
    }

    /// Most recent tick for `asset`.
    pub fn latest(&self, asset: &str) -> Option<(DateTime<Utc>, f64)> {
        let ticks = self.ticks.read().unwrap_or_else(PoisonError::into_inner);
        ticks
            .get(asset)?
            .iter()
            .next_back()
            .map(|(ts, p)| (*ts, *p))
    }

    /// Last price strictly before `ts`: the close of the candle ending at `ts`.
    pub fn price_before(&self, asset: &str, ts: DateTime<Utc>) -> Option<f64> {
        let ticks = self.ticks.read().unwrap_or_else(PoisonError::into_inner);
        ticks.get(asset)?.range(..ts).next_back().map(|(_, p)| *p)
    }
}

// ─── Replay feed ────────────────────────────────────────────────────

/// Replays a candle series as four ticks per candle (open, extremes in the
/// order implied by the body, close), so aggregating the ticks rebuilds the
/// original candles exactly.
#[derive(Debug)]
pub struct ReplayFeed {
    asset: String,
    ticks: VecDeque<Tick>,
    board: Arc<PriceBoard>,
    emitted: usize,
    /// Tick counts after which the next read reports a disconnect.
    disconnects: Vec<usize>,
    disconnected: bool,
    failed_reconnects: u32,
}

impl ReplayFeed {
    pub fn new(series: &CandleSeries, board: Arc<PriceBoard>) -> Self {
        let asset = series.asset().to_string();
        let mut ticks = VecDeque::with_capacity(series.len() * 4);
        for c in series.iter() {
            let (first, second) = if c.close >= c.open {
                (c.low, c.high)
            } else {
                (c.high, c.low)
            };
            for (offset, price) in [(0, c.open), (15, first), (30, second), (45, c.close)] {
                ticks.push_back(Tick::new(
                    asset.clone(),
                    price,
                    c.start_time + Duration::seconds(offset),
                ));
            }
        }
        Self {
            asset,
            ticks,
            board,
            emitted: 0,
            disconnects: Vec::new(),
            disconnected: false,
            failed_reconnects: 0,
        }
    }

    /// Report a disconnect once after each of the given tick counts.
    pub fn with_disconnects(mut self, after_ticks: Vec<usize>) -> Self {
        self.disconnects = after_ticks;
        self
    }

    /// Fail this many reconnect attempts before succeeding.
    pub fn with_failed_reconnects(mut self, attempts: u32) -> Self {
        self.failed_reconnects = attempts;
        self
    }

    pub fn remaining(&self) -> usize {
        self.ticks.len()
    }
}

impl QuoteFeed for ReplayFeed {
    fn asset(&self) -> &str {
        &self.asset
    }

    fn next_tick(&mut self) -> Result<Option<Tick>, FeedError> {
        if self.disconnected {
            return Err(FeedError::Disconnected("not connected".into()));
        }
        if let Some(pos) = self.disconnects.iter().position(|&n| n == self.emitted) {
            self.disconnects.swap_remove(pos);
            self.disconnected = true;
            return Err(FeedError::Disconnected(format!(
                "replay dropped after {} ticks",
                self.emitted
            )));
        }
        let Some(tick) = self.ticks.pop_front() else {
            return Err(FeedError::Closed);
        };
        self.board.publish(&tick);
        self.emitted += 1;
        Ok(Some(tick))
    }

    fn reconnect(&mut self) -> Result<(), FeedError> {
        if self.failed_reconnects > 0 {
            self.failed_reconnects -= 1;
            return Err(FeedError::Disconnected("reconnect refused".into()));
        }
        self.disconnected = false;
        Ok(())
    }
}

// ─── Simulated executor ─────────────────────────────────────────────

#[derive(Debug, Clone)]
struct SimTrade {
    asset: String,
    direction: Direction,
    entry_price: f64,
    expiry: DateTime<Utc>,
    outcome: TradeOutcome,
}

/// Fills at the latest published price and settles at the last price before
/// expiry, once the board has moved past expiry.
#[derive(Debug)]
pub struct SimulatedExecutor {
    board: Arc<PriceBoard>,
    trades: Mutex<HashMap<TradeId, SimTrade>>,
    next_id: AtomicU64,
    /// Reject every n-th placement (0 = never).
    reject_every: u64,
}

impl SimulatedExecutor {
    pub fn new(board: Arc<PriceBoard>) -> Self {
        Self {
            board,
            trades: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            reject_every: 0,
        }
    }

    pub fn with_reject_every(mut self, n: u64) -> Self {
        self.reject_every = n;
        self
    }

    pub fn placed(&self) -> usize {
        self.trades
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl OrderExecutor for SimulatedExecutor {
    fn place_trade(
        &self,
        asset: &str,
        direction: Direction,
        _stake: f64,
        expiry_seconds: u32,
    ) -> Result<TradeId, ExecutionError> {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.reject_every > 0 && n % self.reject_every == 0 {
            return Err(ExecutionError::Rejected(format!("simulated rejection #{n}")));
        }
        let (now, price) = self
            .board
            .latest(asset)
            .ok_or_else(|| ExecutionError::Unavailable(format!("no quotes for {asset}")))?;

        let id = TradeId::from(n);
        let trade = SimTrade {
            asset: asset.to_string(),
            direction,
            entry_price: price,
            expiry: now + Duration::seconds(expiry_seconds as i64),
            outcome: TradeOutcome::Pending,
        };
        debug!(%asset, %direction, price, id = %id, "simulated fill");
        self.trades
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), trade);
        Ok(id)
    }

    fn get_trade_result(&self, id: &TradeId) -> Result<TradeOutcome, ExecutionError> {
        let mut trades = self.trades.lock().unwrap_or_else(PoisonError::into_inner);
        let trade = trades
            .get_mut(id)
            .ok_or_else(|| ExecutionError::UnknownTrade(id.clone()))?;
        if trade.outcome != TradeOutcome::Pending {
            return Ok(trade.outcome);
        }
        let Some((now, _)) = self.board.latest(&trade.asset) else {
            return Ok(TradeOutcome::Pending);
        };
        if now < trade.expiry {
            return Ok(TradeOutcome::Pending);
        }
        if let Some(exit) = self.board.price_before(&trade.asset, trade.expiry) {
            trade.outcome = TradeOutcome::settle(trade.direction, trade.entry_price, exit);
        }
        Ok(trade.outcome)
    }
}
