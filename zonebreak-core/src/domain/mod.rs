//! Domain types for the signal engine.

pub mod candle;
pub mod ids;
pub mod series;
pub mod trade;

pub use candle::{Candle, Resolution, Tick};
pub use ids::{ConfigHash, DatasetHash, TradeId};
pub use series::{CandleSeries, CandleWindow, Gap, SeriesError};
pub use trade::{Direction, EntrySetup, Trade, TradeOutcome};
