//! Per-asset breakout state machine.
//!
//! ```text
//! WAIT ──pierce──▶ ZONE_OUTLIER ──RSI confirms──▶ CONFIRMED ──next open──▶ ENTER
//!   ▲                   │                             │                       │
//!   └──fakeout/choppy───┴──────────choppy/gap─────────┘          entry candle closes
//!   ▲                                                                         ▼
//!   └───────────────────────────── cooldown elapsed ◀──────────────────── COOLDOWN
//! ```
//!
//! Exactly one phase is active per asset. Choppy regimes cancel pending
//! signals but never interrupt an entered trade or its cooldown.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::domain::{Candle, Direction, EntrySetup};
use crate::indicators::IndicatorSnapshot;
use crate::regime::RegimeLabel;

/// Which Bollinger band a close pierced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneSide {
    Upper,
    Lower,
}

impl ZoneSide {
    pub fn direction(self) -> Direction {
        match self {
            ZoneSide::Upper => Direction::Up,
            ZoneSide::Lower => Direction::Down,
        }
    }

    /// Side pierced by `close`, if any. Touching a band is not a pierce.
    pub fn of_close(close: f64, snapshot: &IndicatorSnapshot) -> Option<Self> {
        if snapshot.is_above_upper(close) {
            Some(ZoneSide::Upper)
        } else if snapshot.is_below_lower(close) {
            Some(ZoneSide::Lower)
        } else {
            None
        }
    }
}

/// Breakout lifecycle. Each phase carries only the data valid in it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakoutPhase {
    Wait,
    ZoneOutlier {
        side: ZoneSide,
        pierced_at: DateTime<Utc>,
        /// Reached by swinging from the opposite band.
        reversed: bool,
    },
    Confirmed {
        direction: Direction,
        confirmed_at: DateTime<Utc>,
        setup: EntrySetup,
    },
    Enter {
        direction: Direction,
        entry_candle_start: DateTime<Utc>,
        setup: EntrySetup,
    },
    Cooldown {
        until: DateTime<Utc>,
    },
}

impl BreakoutPhase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            BreakoutPhase::Wait => PhaseKind::Wait,
            BreakoutPhase::ZoneOutlier { .. } => PhaseKind::ZoneOutlier,
            BreakoutPhase::Confirmed { .. } => PhaseKind::Confirmed,
            BreakoutPhase::Enter { .. } => PhaseKind::Enter,
            BreakoutPhase::Cooldown { .. } => PhaseKind::Cooldown,
        }
    }
}

/// Data-free phase tag for reporting and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseKind {
    Wait,
    ZoneOutlier,
    Confirmed,
    Enter,
    Cooldown,
}

impl PhaseKind {
    pub const ALL: [PhaseKind; 5] = [
        PhaseKind::Wait,
        PhaseKind::ZoneOutlier,
        PhaseKind::Confirmed,
        PhaseKind::Enter,
        PhaseKind::Cooldown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseKind::Wait => "WAIT",
            PhaseKind::ZoneOutlier => "ZONE_OUTLIER",
            PhaseKind::Confirmed => "CONFIRMED",
            PhaseKind::Enter => "ENTER",
            PhaseKind::Cooldown => "COOLDOWN",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action the machine asks its owner to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Action {
    #[default]
    Wait,
    Enter(Direction),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Wait => f.write_str("WAIT"),
            Action::Enter(Direction::Up) => f.write_str("ENTER-UP"),
            Action::Enter(Direction::Down) => f.write_str("ENTER-DOWN"),
        }
    }
}

/// Why the machine is where it is after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    InsufficientHistory,
    NoBreakout,
    RegimeChoppy,
    BandPierced,
    AwaitingRsi,
    OppositePierce,
    RsiConfirmed,
    Fakeout,
    RegimeFlip,
    DataGap,
    MissingIndicators,
    Entered,
    EntryCandleClosed,
    CoolingDown,
    CooldownElapsed,
    ExecutionFailure,
    StaleBreakout,
    Abandoned,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::InsufficientHistory => "INSUFFICIENT_HISTORY",
            Reason::NoBreakout => "NO_BREAKOUT",
            Reason::RegimeChoppy => "REGIME_CHOPPY",
            Reason::BandPierced => "BAND_PIERCED",
            Reason::AwaitingRsi => "AWAITING_RSI",
            Reason::OppositePierce => "OPPOSITE_PIERCE",
            Reason::RsiConfirmed => "RSI_CONFIRMED",
            Reason::Fakeout => "FAKEOUT",
            Reason::RegimeFlip => "REGIME_FLIP",
            Reason::DataGap => "DATA_GAP",
            Reason::MissingIndicators => "MISSING_INDICATORS",
            Reason::Entered => "ENTERED",
            Reason::EntryCandleClosed => "ENTRY_CANDLE_CLOSED",
            Reason::CoolingDown => "COOLING_DOWN",
            Reason::CooldownElapsed => "COOLDOWN_ELAPSED",
            Reason::ExecutionFailure => "EXECUTION_FAILURE",
            Reason::StaleBreakout => "STALE_BREAKOUT",
            Reason::Abandoned => "ABANDONED",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single phase change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: PhaseKind,
    pub to: PhaseKind,
    pub reason: Reason,
    pub at: DateTime<Utc>,
}

/// Everything the machine owns for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetState {
    pub phase: BreakoutPhase,
    pub last_reason: Reason,
    pub error_count: u32,
    /// Side of a breakout whose entry was rejected. Pierces on it are
    /// ignored until a close lands back inside the bands.
    #[serde(default)]
    pub stale_side: Option<ZoneSide>,
}

impl AssetState {
    pub fn zone_outlier_side(&self) -> Option<ZoneSide> {
        match self.phase {
            BreakoutPhase::ZoneOutlier { side, .. } => Some(side),
            _ => None,
        }
    }

    pub fn entry_candle_start(&self) -> Option<DateTime<Utc>> {
        match self.phase {
            BreakoutPhase::Enter {
                entry_candle_start, ..
            } => Some(entry_candle_start),
            _ => None,
        }
    }

    pub fn entry_setup(&self) -> Option<EntrySetup> {
        match self.phase {
            BreakoutPhase::Enter { setup, .. } => Some(setup),
            _ => None,
        }
    }

    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        match self.phase {
            BreakoutPhase::Cooldown { until } => Some(until),
            _ => None,
        }
    }
}

impl Default for AssetState {
    fn default() -> Self {
        Self {
            phase: BreakoutPhase::Wait,
            last_reason: Reason::InsufficientHistory,
            error_count: 0,
            stale_side: None,
        }
    }
}

/// Thresholds the machine needs from [`EngineConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineConfig {
    pub rsi_upper: f64,
    pub rsi_lower: f64,
    pub expiry_seconds: u32,
    pub cooldown_candles: u32,
}

impl From<&EngineConfig> for MachineConfig {
    fn from(c: &EngineConfig) -> Self {
        Self {
            rsi_upper: c.rsi_upper,
            rsi_lower: c.rsi_lower,
            expiry_seconds: c.expiry_seconds,
            cooldown_candles: c.cooldown_candles,
        }
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct BreakoutMachine {
    config: MachineConfig,
    state: AssetState,
}

impl BreakoutMachine {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            state: AssetState::default(),
        }
    }

    pub fn state(&self) -> &AssetState {
        &self.state
    }

    pub fn phase(&self) -> BreakoutPhase {
        self.state.phase
    }

    pub fn last_reason(&self) -> Reason {
        self.state.last_reason
    }

    fn confirms(&self, side: ZoneSide, rsi: f64) -> bool {
        match side {
            ZoneSide::Upper => rsi > self.config.rsi_upper,
            ZoneSide::Lower => rsi < self.config.rsi_lower,
        }
    }

    fn go(
        &mut self,
        to: BreakoutPhase,
        reason: Reason,
        at: DateTime<Utc>,
        out: &mut Vec<Transition>,
    ) {
        let from = self.state.phase.kind();
        self.state.phase = to;
        self.state.last_reason = reason;
        let t = Transition {
            from,
            to: to.kind(),
            reason,
            at,
        };
        debug!(from = %t.from, to = %t.to, reason = %t.reason, at = %at, "breakout transition");
        out.push(t);
    }

    fn stay(&mut self, reason: Reason) {
        self.state.last_reason = reason;
    }

    /// A fast candle opened at `start`. A confirmed signal enters here.
    pub fn on_candle_open(&mut self, start: DateTime<Utc>) -> (Action, Option<Transition>) {
        let BreakoutPhase::Confirmed {
            direction, setup, ..
        } = self.state.phase
        else {
            return (Action::Wait, None);
        };
        let mut out = Vec::with_capacity(1);
        self.go(
            BreakoutPhase::Enter {
                direction,
                entry_candle_start: start,
                setup,
            },
            Reason::Entered,
            start,
            &mut out,
        );
        (Action::Enter(direction), out.pop())
    }

    /// A fast candle closed. `snapshot` is `None` while the window is warming up.
    pub fn on_candle_close(
        &mut self,
        candle: &Candle,
        snapshot: Option<&IndicatorSnapshot>,
        regime: RegimeLabel,
    ) -> Vec<Transition> {
        let mut out = Vec::new();
        let at = candle.end_time();

        match self.state.phase {
            BreakoutPhase::Enter {
                entry_candle_start, ..
            } => {
                if candle.start_time < entry_candle_start {
                    self.stay(Reason::Entered);
                    return out;
                }
                let until = entry_candle_start
                    + Duration::seconds(self.config.expiry_seconds as i64)
                    + candle.resolution.duration() * self.config.cooldown_candles as i32;
                if at >= until {
                    self.go(BreakoutPhase::Wait, Reason::CooldownElapsed, at, &mut out);
                } else {
                    self.go(
                        BreakoutPhase::Cooldown { until },
                        Reason::EntryCandleClosed,
                        at,
                        &mut out,
                    );
                }
            }
            BreakoutPhase::Cooldown { until } => {
                if at >= until {
                    self.go(BreakoutPhase::Wait, Reason::CooldownElapsed, at, &mut out);
                } else {
                    self.stay(Reason::CoolingDown);
                }
            }
            BreakoutPhase::Wait => match snapshot {
                None => self.stay(Reason::InsufficientHistory),
                Some(snap) => self.evaluate_from_wait(candle, snap, regime, &mut out),
            },
            BreakoutPhase::ZoneOutlier { side, reversed, .. } => {
                let Some(snap) = snapshot else {
                    self.go(BreakoutPhase::Wait, Reason::MissingIndicators, at, &mut out);
                    return out;
                };
                if regime != RegimeLabel::Trending {
                    self.go(BreakoutPhase::Wait, Reason::RegimeFlip, at, &mut out);
                    return out;
                }
                match ZoneSide::of_close(candle.close, snap) {
                    None => self.go(BreakoutPhase::Wait, Reason::Fakeout, at, &mut out),
                    Some(pierced) if self.confirms(pierced, snap.rsi) => self.go(
                        BreakoutPhase::Confirmed {
                            direction: pierced.direction(),
                            confirmed_at: at,
                            setup: if reversed || pierced != side {
                                EntrySetup::Reversal
                            } else {
                                EntrySetup::Delayed
                            },
                        },
                        Reason::RsiConfirmed,
                        at,
                        &mut out,
                    ),
                    Some(pierced) if pierced == side => self.stay(Reason::AwaitingRsi),
                    Some(pierced) => self.go(
                        BreakoutPhase::ZoneOutlier {
                            side: pierced,
                            pierced_at: at,
                            reversed: true,
                        },
                        Reason::OppositePierce,
                        at,
                        &mut out,
                    ),
                }
            }
            BreakoutPhase::Confirmed { .. } => {
                if snapshot.is_none() {
                    self.go(BreakoutPhase::Wait, Reason::MissingIndicators, at, &mut out);
                } else if regime != RegimeLabel::Trending {
                    self.go(BreakoutPhase::Wait, Reason::RegimeFlip, at, &mut out);
                } else {
                    self.stay(Reason::RsiConfirmed);
                }
            }
        }

        out
    }

    fn evaluate_from_wait(
        &mut self,
        candle: &Candle,
        snap: &IndicatorSnapshot,
        regime: RegimeLabel,
        out: &mut Vec<Transition>,
    ) {
        let at = candle.end_time();
        let Some(side) = ZoneSide::of_close(candle.close, snap) else {
            self.state.stale_side = None;
            self.stay(Reason::NoBreakout);
            return;
        };
        if self.state.stale_side == Some(side) {
            self.stay(Reason::StaleBreakout);
            return;
        }
        self.state.stale_side = None;
        if regime != RegimeLabel::Trending {
            self.stay(Reason::RegimeChoppy);
            return;
        }
        self.go(
            BreakoutPhase::ZoneOutlier {
                side,
                pierced_at: at,
                reversed: false,
            },
            Reason::BandPierced,
            at,
            out,
        );
        if self.confirms(side, snap.rsi) {
            self.go(
                BreakoutPhase::Confirmed {
                    direction: side.direction(),
                    confirmed_at: at,
                    setup: EntrySetup::Immediate,
                },
                Reason::RsiConfirmed,
                at,
                out,
            );
        }
    }

    /// The candle window was rebuilt after a hole. Pending signals are dropped.
    pub fn on_data_gap(&mut self, at: DateTime<Utc>) -> Option<Transition> {
        self.cancel_pending(Reason::DataGap, at)
    }

    /// Order placement failed. The entry is abandoned without retry: the
    /// same impulse cannot re-arm until price returns inside the bands.
    pub fn on_execution_failure(&mut self, at: DateTime<Utc>) -> Option<Transition> {
        let BreakoutPhase::Enter { direction, .. } = self.state.phase else {
            return None;
        };
        self.state.error_count += 1;
        self.state.stale_side = Some(match direction {
            Direction::Up => ZoneSide::Upper,
            Direction::Down => ZoneSide::Lower,
        });
        let mut out = Vec::with_capacity(1);
        self.go(BreakoutPhase::Wait, Reason::ExecutionFailure, at, &mut out);
        out.pop()
    }

    /// Drop any not-yet-entered signal (session shutdown).
    pub fn abandon(&mut self, at: DateTime<Utc>) -> Option<Transition> {
        self.cancel_pending(Reason::Abandoned, at)
    }

    fn cancel_pending(&mut self, reason: Reason, at: DateTime<Utc>) -> Option<Transition> {
        match self.state.phase.kind() {
            PhaseKind::ZoneOutlier | PhaseKind::Confirmed => {
                let mut out = Vec::with_capacity(1);
                self.go(BreakoutPhase::Wait, reason, at, &mut out);
                out.pop()
            }
            _ => None,
        }
    }
}

impl Default for BreakoutMachine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Resolution;
    use chrono::TimeZone;

    fn minute(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap() + Duration::minutes(i)
    }

    fn candle(i: i64, close: f64) -> Candle {
        Candle::new(minute(i), Resolution::OneMinute, 1.0, close.max(1.0), close.min(1.0), close)
    }

    fn snap(rsi: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi,
            bb_mean: 1.0,
            bb_upper: 1.01,
            bb_lower: 0.99,
            bb_width: 0.02,
            adx: Some(30.0),
            timestamp: minute(0),
        }
    }

    const T: RegimeLabel = RegimeLabel::Trending;
    const C: RegimeLabel = RegimeLabel::Choppy;

    #[test]
    fn pierce_and_confirm_on_same_close() {
        let mut m = BreakoutMachine::default();
        let ts = m.on_candle_close(&candle(0, 1.02), Some(&snap(70.0)), T);
        let kinds: Vec<_> = ts.iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            kinds,
            vec![
                (PhaseKind::Wait, PhaseKind::ZoneOutlier),
                (PhaseKind::ZoneOutlier, PhaseKind::Confirmed)
            ]
        );
        let (action, t) = m.on_candle_open(minute(1));
        assert_eq!(action, Action::Enter(Direction::Up));
        assert_eq!(action.to_string(), "ENTER-UP");
        assert_eq!(t.unwrap().to, PhaseKind::Enter);
        assert_eq!(m.state().entry_candle_start(), Some(minute(1)));
        assert_eq!(m.state().entry_setup(), Some(EntrySetup::Immediate));
    }

    #[test]
    fn lower_band_enters_down() {
        let mut m = BreakoutMachine::default();
        m.on_candle_close(&candle(0, 0.98), Some(&snap(20.0)), T);
        let (action, _) = m.on_candle_open(minute(1));
        assert_eq!(action.to_string(), "ENTER-DOWN");
    }

    #[test]
    fn pierce_without_rsi_waits_in_zone() {
        let mut m = BreakoutMachine::default();
        m.on_candle_close(&candle(0, 1.02), Some(&snap(60.0)), T);
        assert_eq!(m.state().zone_outlier_side(), Some(ZoneSide::Upper));
        assert_eq!(m.on_candle_open(minute(1)).0, Action::Wait);

        m.on_candle_close(&candle(1, 1.02), Some(&snap(60.0)), T);
        assert_eq!(m.last_reason(), Reason::AwaitingRsi);

        let ts = m.on_candle_close(&candle(2, 1.03), Some(&snap(66.0)), T);
        assert_eq!(ts[0].to, PhaseKind::Confirmed);
        m.on_candle_open(minute(3));
        assert_eq!(m.state().entry_setup(), Some(EntrySetup::Delayed));
    }

    #[test]
    fn close_back_inside_is_fakeout() {
        let mut m = BreakoutMachine::default();
        m.on_candle_close(&candle(0, 1.02), Some(&snap(60.0)), T);
        let ts = m.on_candle_close(&candle(1, 1.0), Some(&snap(60.0)), T);
        assert_eq!(ts[0].reason, Reason::Fakeout);
        assert_eq!(m.phase(), BreakoutPhase::Wait);
    }

    #[test]
    fn touching_band_is_not_a_pierce() {
        let mut m = BreakoutMachine::default();
        let ts = m.on_candle_close(&candle(0, 1.01), Some(&snap(90.0)), T);
        assert!(ts.is_empty());
        assert_eq!(m.last_reason(), Reason::NoBreakout);
    }

    #[test]
    fn opposite_pierce_switches_side() {
        let mut m = BreakoutMachine::default();
        m.on_candle_close(&candle(0, 1.02), Some(&snap(60.0)), T);
        let ts = m.on_candle_close(&candle(1, 0.98), Some(&snap(40.0)), T);
        assert_eq!(ts[0].reason, Reason::OppositePierce);
        assert_eq!(m.state().zone_outlier_side(), Some(ZoneSide::Lower));

        m.on_candle_close(&candle(2, 0.97), Some(&snap(20.0)), T);
        assert_eq!(m.on_candle_open(minute(3)).0, Action::Enter(Direction::Down));
        assert_eq!(m.state().entry_setup(), Some(EntrySetup::Reversal));
    }

    #[test]
    fn choppy_regime_blocks_entry_from_wait() {
        let mut m = BreakoutMachine::default();
        let ts = m.on_candle_close(&candle(0, 1.05), Some(&snap(90.0)), C);
        assert!(ts.is_empty());
        assert_eq!(m.last_reason(), Reason::RegimeChoppy);
    }

    #[test]
    fn regime_flip_cancels_pending_signals() {
        let mut m = BreakoutMachine::default();
        m.on_candle_close(&candle(0, 1.02), Some(&snap(60.0)), T);
        let ts = m.on_candle_close(&candle(1, 1.02), Some(&snap(70.0)), C);
        assert_eq!(ts[0].reason, Reason::RegimeFlip);
        assert_eq!(m.phase(), BreakoutPhase::Wait);
    }

    #[test]
    fn entry_candle_close_starts_cooldown_then_waits() {
        let mut m = BreakoutMachine::default();
        m.on_candle_close(&candle(0, 1.02), Some(&snap(70.0)), T);
        m.on_candle_open(minute(1));

        // Choppy does not interrupt the trade
        let ts = m.on_candle_close(&candle(1, 1.03), Some(&snap(70.0)), C);
        assert_eq!(ts[0].to, PhaseKind::Cooldown);
        assert_eq!(m.state().cooldown_until(), Some(minute(3)));

        // Breakout during cooldown is ignored
        let ts = m.on_candle_close(&candle(2, 1.05), Some(&snap(90.0)), T);
        assert_eq!(ts[0].to, PhaseKind::Wait);
        assert_eq!(ts[0].reason, Reason::CooldownElapsed);
        assert_eq!(m.on_candle_open(minute(3)).0, Action::Wait);
    }

    #[test]
    fn zero_cooldown_returns_straight_to_wait() {
        let mut m = BreakoutMachine::new(MachineConfig {
            cooldown_candles: 0,
            ..Default::default()
        });
        m.on_candle_close(&candle(0, 1.02), Some(&snap(70.0)), T);
        m.on_candle_open(minute(1));
        let ts = m.on_candle_close(&candle(1, 1.0), Some(&snap(50.0)), T);
        assert_eq!(ts[0].to, PhaseKind::Wait);
    }

    #[test]
    fn data_gap_cancels_only_pending_phases() {
        let mut m = BreakoutMachine::default();
        assert!(m.on_data_gap(minute(0)).is_none());
        m.on_candle_close(&candle(0, 1.02), Some(&snap(60.0)), T);
        let t = m.on_data_gap(minute(1)).unwrap();
        assert_eq!(t.reason, Reason::DataGap);

        m.on_candle_close(&candle(2, 1.02), Some(&snap(70.0)), T);
        m.on_candle_open(minute(3));
        assert!(m.on_data_gap(minute(4)).is_none());
        assert_eq!(m.phase().kind(), PhaseKind::Enter);
    }

    #[test]
    fn missing_snapshot_cancels_zone() {
        let mut m = BreakoutMachine::default();
        m.on_candle_close(&candle(0, 1.02), Some(&snap(60.0)), T);
        let ts = m.on_candle_close(&candle(1, 1.02), None, T);
        assert_eq!(ts[0].reason, Reason::MissingIndicators);
    }

    #[test]
    fn execution_failure_returns_to_wait_and_counts() {
        let mut m = BreakoutMachine::default();
        assert!(m.on_execution_failure(minute(0)).is_none());
        m.on_candle_close(&candle(0, 0.98), Some(&snap(10.0)), T);
        m.on_candle_open(minute(1));
        let t = m.on_execution_failure(minute(1)).unwrap();
        assert_eq!(t.to, PhaseKind::Wait);
        assert_eq!(m.state().error_count, 1);
        assert_eq!(m.state().stale_side, Some(ZoneSide::Lower));
    }

    #[test]
    fn rejected_breakout_is_not_retried_while_outside_band() {
        let mut m = BreakoutMachine::default();
        m.on_candle_close(&candle(0, 1.02), Some(&snap(70.0)), T);
        let (action, _) = m.on_candle_open(minute(1));
        assert_eq!(action, Action::Enter(Direction::Up));
        m.on_execution_failure(minute(1));

        let mut entries = Vec::new();
        for (i, close) in [(1, 1.03), (2, 1.04), (3, 1.05)] {
            let ts = m.on_candle_close(&candle(i, close), Some(&snap(80.0)), T);
            assert!(ts.is_empty(), "candle {i} re-armed: {ts:?}");
            assert_eq!(m.last_reason(), Reason::StaleBreakout);
            if let (Action::Enter(d), _) = m.on_candle_open(minute(i + 1)) {
                entries.push((i, d));
            }
        }
        assert!(entries.is_empty(), "retried at {entries:?}");
        assert_eq!(m.state().error_count, 1);
    }

    #[test]
    fn stale_side_clears_once_price_returns_inside() {
        let mut m = BreakoutMachine::default();
        m.on_candle_close(&candle(0, 1.02), Some(&snap(70.0)), T);
        m.on_candle_open(minute(1));
        m.on_execution_failure(minute(1));
        m.on_candle_close(&candle(1, 1.03), Some(&snap(80.0)), T);

        m.on_candle_close(&candle(2, 1.0), Some(&snap(55.0)), T);
        assert_eq!(m.state().stale_side, None);
        assert_eq!(m.last_reason(), Reason::NoBreakout);

        m.on_candle_close(&candle(3, 1.02), Some(&snap(70.0)), T);
        assert_eq!(m.on_candle_open(minute(4)).0, Action::Enter(Direction::Up));
    }

    #[test]
    fn opposite_pierce_is_fresh_after_rejection() {
        let mut m = BreakoutMachine::default();
        m.on_candle_close(&candle(0, 1.02), Some(&snap(70.0)), T);
        m.on_candle_open(minute(1));
        m.on_execution_failure(minute(1));

        m.on_candle_close(&candle(1, 0.98), Some(&snap(20.0)), T);
        assert_eq!(m.state().stale_side, None);
        assert_eq!(m.on_candle_open(minute(2)).0, Action::Enter(Direction::Down));
    }

    #[test]
    fn abandon_drops_confirmed_signal() {
        let mut m = BreakoutMachine::default();
        m.on_candle_close(&candle(0, 1.02), Some(&snap(70.0)), T);
        assert_eq!(m.abandon(minute(1)).unwrap().reason, Reason::Abandoned);
        assert_eq!(m.on_candle_open(minute(1)).0, Action::Wait);
    }

    #[test]
    fn phase_serializes_with_state_tag() {
        let json = serde_json::to_string(&BreakoutPhase::Wait).unwrap();
        assert_eq!(json, r#"{"state":"WAIT"}"#);
    }
}
