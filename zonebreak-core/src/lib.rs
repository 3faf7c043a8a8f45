//! ZoneBreak Core: candles, indicators, regime detection and the breakout
//! state machine.
//!
//! This crate contains the signal engine proper:
//! - Domain types (candles, series, trades, ids)
//! - Tick-to-candle aggregation and 1m to 15m folding
//! - RSI, Bollinger and ADX indicators behind a common trait
//! - Regime classifier on slow candles
//! - Per-asset breakout state machine and the pipeline that drives it
//! - Feed/executor traits and the synthetic market generator

pub mod aggregator;
pub mod breakout;
pub mod config;
pub mod domain;
pub mod feed;
pub mod fingerprint;
pub mod indicators;
pub mod pipeline;
pub mod regime;
pub mod rng;
pub mod snapshot;
pub mod synthetic;

pub use breakout::{Action, AssetState, BreakoutMachine, BreakoutPhase, PhaseKind, Reason};
pub use config::{ConfigError, EngineConfig};
pub use pipeline::AssetPipeline;
pub use regime::{RegimeClassifier, RegimeLabel};
pub use snapshot::{DecisionSnapshot, ZoneStatus};
