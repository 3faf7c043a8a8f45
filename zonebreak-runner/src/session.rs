//! Live sessions: one worker thread per asset.
//!
//! Each worker owns its feed, tick aggregator and pipeline; nothing mutable
//! is shared between assets except the order executor, which is `Sync`.
//! Workers report to the caller over a single `mpsc` channel and stop when
//! the shared cancel flag is raised, their feed closes, or reconnecting
//! fails.
//!
//! On the way out a worker polls the executor once more and marks any trade
//! still pending as `Cancelled`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use zonebreak_core::aggregator::{CandleAggregator, CandleEvent};
use zonebreak_core::breakout::Action;
use zonebreak_core::domain::{Candle, Direction, Resolution, Tick, Trade, TradeOutcome};
use zonebreak_core::feed::{ExecutionError, FeedError, OrderExecutor, QuoteFeed};
use zonebreak_core::pipeline::AssetPipeline;
use zonebreak_core::snapshot::DecisionSnapshot;
use zonebreak_core::EngineConfig;

use crate::config::SessionSettings;
use crate::metrics::TradeStats;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no feeds to run")]
    NoFeeds,
    #[error("more than one feed for {0}")]
    DuplicateAsset(String),
    #[error("failed to spawn worker for {asset}: {source}")]
    Spawn {
        asset: String,
        #[source]
        source: std::io::Error,
    },
}

/// Connection state changes reported by a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedStatus {
    Connected,
    Disrupted { reason: String },
    Reconnected { attempts: u32 },
    Closed,
    /// Reconnecting failed; the worker is stopping.
    Failed { reason: String },
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Cancelled,
    FeedClosed,
    FeedFailed,
}

/// Per-asset counters returned when a worker exits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub asset: String,
    pub ticks: u64,
    pub candles: usize,
    pub stale_ticks: u64,
    pub gaps: u64,
    pub reconnects: u32,
    pub execution_failures: u32,
    pub trades: TradeStats,
    pub stopped: StopReason,
}

/// Everything a worker tells the caller.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// One per closed fast candle.
    Snapshot(DecisionSnapshot),
    Feed { asset: String, status: FeedStatus },
    TradeOpened(Trade),
    /// Settled or cancelled.
    TradeClosed(Trade),
    ExecutionFailed {
        asset: String,
        direction: Direction,
        at: DateTime<Utc>,
        error: ExecutionError,
    },
    Finished(WorkerStats),
}

/// A running session. Dropping it without [`Session::stop`] leaves the
/// workers running until their feeds close.
pub struct Session {
    cancel: Arc<AtomicBool>,
    events: Receiver<SessionEvent>,
    handles: Vec<(String, JoinHandle<WorkerStats>)>,
}

impl Session {
    /// Start one worker per feed with a freshly built pipeline.
    pub fn spawn(
        feeds: Vec<Box<dyn QuoteFeed>>,
        executor: Arc<dyn OrderExecutor>,
        engine: &EngineConfig,
        settings: &SessionSettings,
    ) -> Result<Self, SessionError> {
        let workers = feeds
            .into_iter()
            .map(|feed| {
                let pipeline = AssetPipeline::new(feed.asset(), engine);
                (feed, pipeline)
            })
            .collect();
        Self::spawn_with(workers, executor, engine, settings)
    }

    /// Start one worker per `(feed, pipeline)` pair.
    pub fn spawn_with(
        workers: Vec<(Box<dyn QuoteFeed>, AssetPipeline)>,
        executor: Arc<dyn OrderExecutor>,
        engine: &EngineConfig,
        settings: &SessionSettings,
    ) -> Result<Self, SessionError> {
        if workers.is_empty() {
            return Err(SessionError::NoFeeds);
        }
        let mut seen = HashSet::new();
        for (feed, _) in &workers {
            if !seen.insert(feed.asset().to_string()) {
                return Err(SessionError::DuplicateAsset(feed.asset().to_string()));
            }
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, events) = mpsc::channel();
        let mut handles = Vec::with_capacity(workers.len());

        for (feed, pipeline) in workers {
            let asset = feed.asset().to_string();
            let worker = AssetWorker::new(
                feed,
                pipeline,
                executor.clone(),
                engine,
                settings.clone(),
                tx.clone(),
                cancel.clone(),
            );
            let handle = thread::Builder::new()
                .name(format!("zonebreak-{asset}"))
                .spawn(move || worker.run())
                .map_err(|source| {
                    // Already-started workers would otherwise run unattended.
                    cancel.store(true, Ordering::Relaxed);
                    SessionError::Spawn {
                        asset: asset.clone(),
                        source,
                    }
                })?;
            handles.push((asset, handle));
        }

        info!(workers = handles.len(), "session started");
        Ok(Self {
            cancel,
            events,
            handles,
        })
    }

    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// Flag shared with every worker; raising it stops the session.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        info!("session stop requested");
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_stopping(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Wait for every worker. A panicked worker is logged and skipped.
    pub fn join(self) -> Vec<WorkerStats> {
        let mut stats = Vec::with_capacity(self.handles.len());
        for (asset, handle) in self.handles {
            match handle.join() {
                Ok(s) => stats.push(s),
                Err(_) => error!(%asset, "worker panicked"),
            }
        }
        stats
    }

    /// Collect every event until all workers have exited, then join.
    pub fn drain(self) -> (Vec<SessionEvent>, Vec<WorkerStats>) {
        let events: Vec<SessionEvent> = self.events.iter().collect();
        (events, self.join())
    }
}

// ─── Worker ─────────────────────────────────────────────────────────

struct AssetWorker {
    asset: String,
    feed: Box<dyn QuoteFeed>,
    executor: Arc<dyn OrderExecutor>,
    stake: f64,
    expiry_seconds: u32,
    settings: SessionSettings,
    tx: Sender<SessionEvent>,
    cancel: Arc<AtomicBool>,
    aggregator: CandleAggregator,
    pipeline: AssetPipeline,
    /// Trades still awaiting a result. Settled ones move into `settled`.
    open_trades: Vec<Trade>,
    settled: TradeStats,
    last_seen: Option<DateTime<Utc>>,
    ticks: u64,
    candles: usize,
    reconnects: u32,
    execution_failures: u32,
}

impl AssetWorker {
    fn new(
        feed: Box<dyn QuoteFeed>,
        pipeline: AssetPipeline,
        executor: Arc<dyn OrderExecutor>,
        engine: &EngineConfig,
        settings: SessionSettings,
        tx: Sender<SessionEvent>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            asset: feed.asset().to_string(),
            feed,
            executor,
            stake: engine.stake,
            expiry_seconds: engine.expiry_seconds,
            settings,
            tx,
            cancel,
            aggregator: CandleAggregator::new(Resolution::OneMinute),
            pipeline,
            open_trades: Vec::new(),
            settled: TradeStats::default(),
            last_seen: None,
            ticks: 0,
            candles: 0,
            reconnects: 0,
            execution_failures: 0,
        }
    }

    fn emit(&self, event: SessionEvent) {
        // The receiver may be gone; the worker still finishes cleanly.
        let _ = self.tx.send(event);
    }

    fn status(&self, status: FeedStatus) {
        self.emit(SessionEvent::Feed {
            asset: self.asset.clone(),
            status,
        });
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn run(mut self) -> WorkerStats {
        info!(asset = %self.asset, "worker started");
        self.status(FeedStatus::Connected);

        let stopped = loop {
            if self.cancelled() {
                break StopReason::Cancelled;
            }
            match self.feed.next_tick() {
                Ok(Some(tick)) => self.on_tick(tick),
                Ok(None) => {
                    if let Some(candle) = self.aggregator.flush(Utc::now()) {
                        self.on_close(&candle);
                    }
                    thread::sleep(Duration::from_millis(self.settings.idle_poll_ms));
                }
                Err(FeedError::Closed) => {
                    self.flush_open_candle();
                    self.status(FeedStatus::Closed);
                    break StopReason::FeedClosed;
                }
                Err(FeedError::Disconnected(reason)) => {
                    warn!(asset = %self.asset, %reason, "feed disrupted");
                    self.status(FeedStatus::Disrupted { reason });
                    if let Err(stop) = self.reconnect() {
                        break stop;
                    }
                }
            }
            self.poll_trades();
        };

        self.shutdown(stopped)
    }

    /// Reconnect with exponential backoff: base, 2·base, 4·base, ...
    fn reconnect(&mut self) -> Result<(), StopReason> {
        let max = self.settings.max_reconnects;
        let mut last_error = String::from("no attempts allowed");
        for attempt in 1..=max {
            let delay = self.settings.reconnect_base_ms.saturating_mul(1u64 << (attempt - 1).min(16));
            if !self.sleep_unless_cancelled(Duration::from_millis(delay)) {
                return Err(StopReason::Cancelled);
            }
            match self.feed.reconnect() {
                Ok(()) => {
                    self.reconnects += 1;
                    info!(asset = %self.asset, attempt, "feed reconnected");
                    self.status(FeedStatus::Reconnected { attempts: attempt });
                    return Ok(());
                }
                Err(FeedError::Closed) => {
                    self.flush_open_candle();
                    self.status(FeedStatus::Closed);
                    return Err(StopReason::FeedClosed);
                }
                Err(e) => {
                    warn!(asset = %self.asset, attempt, max, error = %e, "reconnect failed");
                    last_error = e.to_string();
                }
            }
        }
        error!(asset = %self.asset, attempts = max, "giving up on feed");
        self.status(FeedStatus::Failed { reason: last_error });
        Err(StopReason::FeedFailed)
    }

    /// Returns false if cancelled while sleeping.
    fn sleep_unless_cancelled(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(10)));
        }
    }

    fn on_tick(&mut self, tick: Tick) {
        self.ticks += 1;
        self.last_seen = Some(tick.timestamp);
        for event in self.aggregator.on_tick(tick.price, tick.timestamp) {
            match event {
                CandleEvent::Closed(candle) => self.on_close(&candle),
                CandleEvent::Opened { start, open } => self.on_open(start, open),
            }
        }
    }

    fn on_open(&mut self, start: DateTime<Utc>, open: f64) {
        let outcome = self.pipeline.on_fast_open(start, open);
        let Action::Enter(direction) = outcome.action else {
            return;
        };
        match self
            .executor
            .place_trade(&self.asset, direction, self.stake, self.expiry_seconds)
        {
            Ok(id) => {
                let trade = Trade::open(
                    id,
                    self.asset.as_str(),
                    direction,
                    self.stake,
                    open,
                    start,
                    self.expiry_seconds,
                    outcome.regime,
                )
                .with_setup(outcome.setup);
                info!(asset = %self.asset, id = %trade.id, %direction, price = open, "trade placed");
                self.emit(SessionEvent::TradeOpened(trade.clone()));
                self.open_trades.push(trade);
            }
            Err(error) => {
                warn!(asset = %self.asset, %direction, error = %error, "trade placement failed");
                self.execution_failures += 1;
                self.pipeline.on_execution_failure(start);
                self.emit(SessionEvent::ExecutionFailed {
                    asset: self.asset.clone(),
                    direction,
                    at: start,
                    error,
                });
            }
        }
    }

    fn on_close(&mut self, candle: &Candle) {
        self.candles += 1;
        match self.pipeline.on_fast_close(candle) {
            Ok(out) => self.emit(SessionEvent::Snapshot(out.decision)),
            Err(e) => warn!(asset = %self.asset, error = %e, "candle rejected"),
        }
    }

    /// Close the candle in progress at its own end time.
    fn flush_open_candle(&mut self) {
        let Some(end) = self.aggregator.current().map(|c| c.end_time()) else {
            return;
        };
        if let Some(candle) = self.aggregator.flush(end) {
            self.on_close(&candle);
        }
    }

    fn poll_trades(&mut self) {
        if self.open_trades.is_empty() {
            return;
        }
        let mut still_open = Vec::with_capacity(self.open_trades.len());
        for mut trade in std::mem::take(&mut self.open_trades) {
            match self.executor.get_trade_result(&trade.id) {
                Ok(TradeOutcome::Pending) => still_open.push(trade),
                Ok(outcome) => {
                    trade.record(outcome);
                    debug!(asset = %trade.asset, id = %trade.id, %outcome, "trade closed");
                    self.settled.add(&trade);
                    self.emit(SessionEvent::TradeClosed(trade));
                }
                Err(e) => {
                    warn!(asset = %self.asset, id = %trade.id, error = %e, "trade poll failed");
                    still_open.push(trade);
                }
            }
        }
        self.open_trades = still_open;
    }

    fn shutdown(mut self, stopped: StopReason) -> WorkerStats {
        let at = self.last_seen.unwrap_or_else(Utc::now);
        if let Some(t) = self.pipeline.abandon(at) {
            debug!(asset = %self.asset, reason = %t.reason, "pending signal dropped");
        }

        self.poll_trades();
        for mut trade in std::mem::take(&mut self.open_trades) {
            trade.cancel();
            info!(asset = %self.asset, id = %trade.id, "trade cancelled at shutdown");
            self.settled.add(&trade);
            self.emit(SessionEvent::TradeClosed(trade));
        }

        let stats = WorkerStats {
            asset: self.asset.clone(),
            ticks: self.ticks,
            candles: self.candles,
            stale_ticks: self.aggregator.stale_ticks(),
            gaps: self.pipeline.gaps(),
            reconnects: self.reconnects,
            execution_failures: self.execution_failures,
            trades: self.settled.clone(),
            stopped,
        };
        info!(
            asset = %stats.asset,
            candles = stats.candles,
            trades = stats.trades.total,
            stopped = ?stats.stopped,
            "worker finished"
        );
        self.emit(SessionEvent::Finished(stats.clone()));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use zonebreak_core::domain::{CandleSeries, TradeId};

    use crate::replay::{PriceBoard, ReplayFeed};

    /// Settles trade "1" as a win and leaves every other trade pending.
    struct SettlesFirst;

    impl OrderExecutor for SettlesFirst {
        fn place_trade(
            &self,
            _asset: &str,
            _direction: Direction,
            _stake: f64,
            _expiry_seconds: u32,
        ) -> Result<TradeId, ExecutionError> {
            Err(ExecutionError::Unavailable("unused".into()))
        }

        fn get_trade_result(&self, id: &TradeId) -> Result<TradeOutcome, ExecutionError> {
            Ok(if id.0 == "1" {
                TradeOutcome::Win
            } else {
                TradeOutcome::Pending
            })
        }
    }

    fn worker() -> (AssetWorker, Receiver<SessionEvent>) {
        let series = CandleSeries::new("EURUSD", Resolution::OneMinute);
        let feed = Box::new(ReplayFeed::new(&series, Arc::new(PriceBoard::new())));
        let (tx, rx) = mpsc::channel();
        let engine = EngineConfig::default();
        let w = AssetWorker::new(
            feed,
            AssetPipeline::new("EURUSD", &engine),
            Arc::new(SettlesFirst),
            &engine,
            SessionSettings::default(),
            tx,
            Arc::new(AtomicBool::new(false)),
        );
        (w, rx)
    }

    fn pending(id: u64) -> Trade {
        Trade::open(
            TradeId::from(id),
            "EURUSD",
            Direction::Up,
            1.0,
            1.1,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            60,
            zonebreak_core::regime::RegimeLabel::Trending,
        )
    }

    #[test]
    fn settled_trades_leave_the_open_list() {
        let (mut w, rx) = worker();
        w.open_trades = vec![pending(1), pending(2)];

        w.poll_trades();
        assert_eq!(w.open_trades.len(), 1);
        assert_eq!(w.open_trades[0].id, TradeId::from(2));
        assert_eq!(w.settled.wins, 1);

        // Polling again does not re-emit or re-count the settled trade.
        w.poll_trades();
        assert_eq!(w.settled.total, 1);

        let stats = w.shutdown(StopReason::Cancelled);
        assert_eq!(stats.trades.total, 2);
        assert_eq!(stats.trades.wins, 1);
        assert_eq!(stats.trades.cancelled, 1);

        let closed = rx
            .try_iter()
            .filter(|e| matches!(e, SessionEvent::TradeClosed(_)))
            .count();
        assert_eq!(closed, 2);
    }
}
