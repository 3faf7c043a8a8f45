//! Trade: one fixed-expiry binary position.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::TradeId;
use crate::regime::RegimeLabel;

/// Predicted price direction at expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the breakout behind an entry was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntrySetup {
    /// Band pierce and RSI confirmation on the same close.
    Immediate,
    /// RSI confirmed on a later close while price stayed outside the band.
    Delayed,
    /// Confirmed after price swung through to the opposite band.
    Reversal,
}

impl EntrySetup {
    pub const ALL: [EntrySetup; 3] = [
        EntrySetup::Immediate,
        EntrySetup::Delayed,
        EntrySetup::Reversal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntrySetup::Immediate => "IMMEDIATE",
            EntrySetup::Delayed => "DELAYED",
            EntrySetup::Reversal => "REVERSAL",
        }
    }
}

impl fmt::Display for EntrySetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeOutcome {
    Win,
    Loss,
    /// Exit price equal to entry price.
    Draw,
    /// Not yet resolved.
    Pending,
    /// Session stopped before the outcome was known.
    Cancelled,
}

impl TradeOutcome {
    /// Outcome of a position opened at `entry` and settled at `exit`.
    pub fn settle(direction: Direction, entry: f64, exit: f64) -> Self {
        if exit == entry {
            return TradeOutcome::Draw;
        }
        let went_up = exit > entry;
        match (direction, went_up) {
            (Direction::Up, true) | (Direction::Down, false) => TradeOutcome::Win,
            _ => TradeOutcome::Loss,
        }
    }

    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            TradeOutcome::Win | TradeOutcome::Loss | TradeOutcome::Draw
        )
    }
}

impl fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeOutcome::Win => "WIN",
            TradeOutcome::Loss => "LOSS",
            TradeOutcome::Draw => "DRAW",
            TradeOutcome::Pending => "PENDING",
            TradeOutcome::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// A binary-option trade from entry to expiry.
///
/// Created `Pending` on entry; the outcome is set exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub asset: String,
    pub direction: Direction,
    pub stake: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub outcome: TradeOutcome,
    pub exit_price: Option<f64>,
    /// Regime in force when the trade was entered.
    pub regime: RegimeLabel,
    #[serde(default)]
    pub setup: Option<EntrySetup>,
}

impl Trade {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: TradeId,
        asset: impl Into<String>,
        direction: Direction,
        stake: f64,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        expiry_seconds: u32,
        regime: RegimeLabel,
    ) -> Self {
        Self {
            id,
            asset: asset.into(),
            direction,
            stake,
            entry_price,
            entry_time,
            expiry_time: entry_time + Duration::seconds(expiry_seconds as i64),
            outcome: TradeOutcome::Pending,
            exit_price: None,
            regime,
            setup: None,
        }
    }

    pub fn with_setup(mut self, setup: Option<EntrySetup>) -> Self {
        self.setup = setup;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.outcome == TradeOutcome::Pending
    }

    /// Settle against an observed exit price. No-op once resolved.
    pub fn resolve(&mut self, exit_price: f64) -> TradeOutcome {
        if self.is_pending() {
            self.exit_price = Some(exit_price);
            self.outcome = TradeOutcome::settle(self.direction, self.entry_price, exit_price);
        }
        self.outcome
    }

    /// Record an outcome reported by the executor. No-op once resolved.
    pub fn record(&mut self, outcome: TradeOutcome) {
        if self.is_pending() {
            self.outcome = outcome;
        }
    }

    /// Mark a still-pending trade as cancelled.
    pub fn cancel(&mut self) {
        self.record(TradeOutcome::Cancelled);
    }

    /// Payout at 1:1 odds: +stake on a win, -stake on a loss, 0 otherwise.
    pub fn pnl(&self) -> f64 {
        match self.outcome {
            TradeOutcome::Win => self.stake,
            TradeOutcome::Loss => -self.stake,
            _ => 0.0,
        }
    }
}
