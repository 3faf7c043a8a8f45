//! ZoneBreak runner: backtests, live sessions, reports and artifacts.
//!
//! This crate builds on `zonebreak-core` to provide:
//! - TOML run configuration layered over the engine config
//! - Synthetic-market backtests, one asset per rayon task
//! - Backtests over recorded candle tapes imported from CSV
//! - Win rate, regime breakdown and classifier accuracy metrics
//! - Live sessions with one worker thread per asset
//! - Replay feed and simulated executor for offline sessions
//! - JSON/CSV artifact export keyed by run fingerprint

pub mod backtest;
pub mod config;
pub mod export;
pub mod metrics;
pub mod replay;
pub mod report;
pub mod session;

pub use backtest::{
    generate_market, run_backtest, run_history, run_market, run_series, AssetRun, Backtest,
    BacktestError,
};
pub use config::{BacktestConfig, BacktestSettings, ConfigError, SessionSettings};
pub use export::{load_candles_csv, load_report, save_artifacts, ExportError};
pub use metrics::{win_rate, ClassifierAccuracy, GroundTruth, TradeStats};
pub use replay::{PriceBoard, ReplayFeed, SimulatedExecutor};
pub use report::{AssetReport, BacktestReport, SCHEMA_VERSION};
pub use session::{FeedStatus, Session, SessionError, SessionEvent, StopReason, WorkerStats};

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn results_cross_threads() {
        assert_send::<Backtest>();
        assert_sync::<BacktestReport>();
        assert_send::<SessionEvent>();
        assert_send::<WorkerStats>();
        assert_send::<Session>();
        assert_sync::<SimulatedExecutor>();
        assert_sync::<PriceBoard>();
    }
}
