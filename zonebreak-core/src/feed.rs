//! Seams to the outside world: quote feeds and order execution.
//!
//! Both are passed explicitly to whoever drives a pipeline; nothing in the
//! engine reaches for a global connection.

use thiserror::Error;

use crate::domain::{Direction, Tick, TradeId, TradeOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Transient disruption; the caller should reconnect.
    #[error("feed disconnected: {0}")]
    Disconnected(String),
    /// The stream has ended for good.
    #[error("feed closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("executor unavailable: {0}")]
    Unavailable(String),
    #[error("unknown trade {0}")]
    UnknownTrade(TradeId),
}

/// Quote stream for a single asset.
pub trait QuoteFeed: Send {
    fn asset(&self) -> &str;

    /// Next quote. `Ok(None)` means nothing new yet (idle poll).
    fn next_tick(&mut self) -> Result<Option<Tick>, FeedError>;

    /// Re-establish the stream after `FeedError::Disconnected`.
    fn reconnect(&mut self) -> Result<(), FeedError>;
}

/// Binary-option order placement, shared by every asset worker.
pub trait OrderExecutor: Send + Sync {
    fn place_trade(
        &self,
        asset: &str,
        direction: Direction,
        stake: f64,
        expiry_seconds: u32,
    ) -> Result<TradeId, ExecutionError>;

    /// Current outcome; `Pending` until the trade expires.
    fn get_trade_result(&self, id: &TradeId) -> Result<TradeOutcome, ExecutionError>;
}
