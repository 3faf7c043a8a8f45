//! Per-candle decision record published to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::breakout::{Action, PhaseKind, Reason};
use crate::indicators::IndicatorSnapshot;
use crate::regime::RegimeLabel;

/// Where the last close sits relative to the Bollinger bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneStatus {
    Inside,
    AboveUpper,
    BelowLower,
    /// Indicators not available yet.
    Unknown,
}

impl ZoneStatus {
    pub fn of(close: f64, snapshot: Option<&IndicatorSnapshot>) -> Self {
        match snapshot {
            None => ZoneStatus::Unknown,
            Some(s) if s.is_above_upper(close) => ZoneStatus::AboveUpper,
            Some(s) if s.is_below_lower(close) => ZoneStatus::BelowLower,
            Some(_) => ZoneStatus::Inside,
        }
    }
}

impl fmt::Display for ZoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ZoneStatus::Inside => "INSIDE",
            ZoneStatus::AboveUpper => "ABOVE_UPPER",
            ZoneStatus::BelowLower => "BELOW_LOWER",
            ZoneStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Emitted after every fast-candle close.
///
/// `action` is the action taken at the open of the candle being reported,
/// so the candle that entered a trade carries `ENTER-UP`/`ENTER-DOWN`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSnapshot {
    pub asset: String,
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub rsi: Option<f64>,
    pub adx: Option<f64>,
    pub bb_width: Option<f64>,
    pub zone_status: ZoneStatus,
    pub state: PhaseKind,
    pub action: Action,
    pub regime: RegimeLabel,
    pub reason: Reason,
}

impl fmt::Display for DecisionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let num = |v: Option<f64>, prec: usize| match v {
            Some(x) => format!("{x:.prec$}"),
            None => "-".to_string(),
        };
        write!(
            f,
            "{} {} close={:.5} rsi={} adx={} width={} zone={} regime={} state={} action={} ({})",
            self.timestamp.format("%Y-%m-%d %H:%M"),
            self.asset,
            self.close,
            num(self.rsi, 1),
            num(self.adx, 1),
            num(self.bb_width, 5),
            self.zone_status,
            self.regime,
            self.state,
            self.action,
            self.reason,
        )
    }
}
