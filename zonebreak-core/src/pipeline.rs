//! Per-asset signal pipeline.
//!
//! Wires fast candles through the rolling windows, indicator engine, regime
//! classifier and breakout machine. One pipeline per asset; it owns all of
//! that asset's mutable state and shares nothing.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::aggregator::CandleFolder;
use crate::breakout::{
    Action, AssetState, BreakoutMachine, MachineConfig, PhaseKind, Transition,
};
use crate::config::EngineConfig;
use crate::domain::{Candle, CandleWindow, EntrySetup, Resolution, SeriesError};
use crate::indicators::{IndicatorEngine, IndicatorSnapshot};
use crate::regime::{RegimeClassifier, RegimeLabel};
use crate::snapshot::{DecisionSnapshot, ZoneStatus};

/// Result of an open event.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOutcome {
    pub action: Action,
    pub transitions: Vec<Transition>,
    /// Regime in force when the action was decided.
    pub regime: RegimeLabel,
    /// How the signal was confirmed, set with `Action::Enter`.
    pub setup: Option<EntrySetup>,
}

/// Result of feeding one closed fast candle.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseOutcome {
    pub decision: DecisionSnapshot,
    pub snapshot: Option<IndicatorSnapshot>,
    pub transitions: Vec<Transition>,
    /// A slow candle closed and the regime was recomputed.
    pub regime_updated: bool,
    /// The fast window was rebuilt after a hole before this candle.
    pub gap: Option<SeriesError>,
}

#[derive(Debug, Clone)]
pub struct AssetPipeline {
    asset: String,
    engine: IndicatorEngine,
    fast: CandleWindow,
    slow: CandleWindow,
    folder: CandleFolder,
    classifier: RegimeClassifier,
    machine: BreakoutMachine,
    forced_regime: Option<RegimeLabel>,
    open_action: Action,
    gaps: u64,
}

impl AssetPipeline {
    pub fn new(asset: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            asset: asset.into(),
            engine: IndicatorEngine::from_config(config),
            fast: CandleWindow::new(Resolution::OneMinute, config.window_capacity),
            slow: CandleWindow::new(Resolution::FifteenMinute, config.window_capacity),
            folder: CandleFolder::new(Resolution::FifteenMinute),
            classifier: RegimeClassifier::from_config(config),
            machine: BreakoutMachine::new(MachineConfig::from(config)),
            forced_regime: None,
            open_action: Action::Wait,
            gaps: 0,
        }
    }

    /// Pin the regime instead of classifying it (scenario testing).
    pub fn with_forced_regime(mut self, regime: RegimeLabel) -> Self {
        self.forced_regime = Some(regime);
        self
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn regime(&self) -> RegimeLabel {
        self.forced_regime.unwrap_or_else(|| self.classifier.label())
    }

    /// Whether the regime label comes from a warmed-up classifier.
    pub fn regime_ready(&self) -> bool {
        self.forced_regime.is_some() || self.classifier.is_ready()
    }

    pub fn classifier(&self) -> &RegimeClassifier {
        &self.classifier
    }

    pub fn state(&self) -> &AssetState {
        self.machine.state()
    }

    pub fn phase_kind(&self) -> PhaseKind {
        self.machine.phase().kind()
    }

    /// Holes detected in the fast candle stream so far.
    pub fn gaps(&self) -> u64 {
        self.gaps
    }

    /// A fast candle opened. Returns `Action::Enter` when a confirmed signal
    /// should be traded at `open`.
    pub fn on_fast_open(&mut self, start: DateTime<Utc>, open: f64) -> OpenOutcome {
        let mut transitions = Vec::new();

        // A confirmation never carries across a hole in the stream.
        if let Some(last) = self.fast.last() {
            if start != last.end_time() {
                transitions.extend(self.machine.on_data_gap(start));
            }
        }

        let (action, t) = self.machine.on_candle_open(start);
        transitions.extend(t);
        if let Action::Enter(direction) = action {
            info!(asset = %self.asset, %direction, price = open, at = %start, "entry signal");
        }
        self.open_action = action;
        OpenOutcome {
            action,
            transitions,
            regime: self.regime(),
            setup: match action {
                Action::Enter(_) => self.machine.state().entry_setup(),
                Action::Wait => None,
            },
        }
    }

    /// A fast candle closed.
    ///
    /// Out-of-order candles are rejected with no effect. A hole is handled
    /// in place (window rebuilt, pending signal cancelled) and reported in
    /// [`CloseOutcome::gap`].
    pub fn on_fast_close(&mut self, candle: &Candle) -> Result<CloseOutcome, SeriesError> {
        let mut transitions = Vec::new();

        let gap = match self.fast.push(*candle) {
            Ok(()) => None,
            Err(err @ SeriesError::DataGap { .. }) => {
                warn!(asset = %self.asset, error = %err, "fast window rebuilt");
                self.gaps += 1;
                transitions.extend(self.machine.on_data_gap(candle.start_time));
                Some(err)
            }
            Err(err) => return Err(err),
        };

        let completed = self.folder.push(candle);
        let regime_updated = !completed.is_empty();
        for slow in completed {
            self.on_slow_close(slow);
        }

        let snapshot = match self.engine.snapshot(self.fast.as_slice()) {
            Ok(s) => Some(s),
            Err(err) => {
                debug!(asset = %self.asset, error = %err, "no fast snapshot");
                None
            }
        };

        let regime = self.regime();
        transitions.extend(
            self.machine
                .on_candle_close(candle, snapshot.as_ref(), regime),
        );

        let decision = DecisionSnapshot {
            asset: self.asset.clone(),
            timestamp: candle.end_time(),
            close: candle.close,
            rsi: snapshot.map(|s| s.rsi),
            adx: snapshot.and_then(|s| s.adx),
            bb_width: snapshot.map(|s| s.bb_width),
            zone_status: ZoneStatus::of(candle.close, snapshot.as_ref()),
            state: self.machine.phase().kind(),
            action: std::mem::take(&mut self.open_action),
            regime,
            reason: self.machine.last_reason(),
        };

        Ok(CloseOutcome {
            decision,
            snapshot,
            transitions,
            regime_updated,
            gap,
        })
    }

    fn on_slow_close(&mut self, slow: Candle) {
        match self.slow.push(slow) {
            Ok(()) => {}
            Err(err @ SeriesError::DataGap { .. }) => {
                warn!(asset = %self.asset, error = %err, "slow window rebuilt");
                self.classifier.reset();
            }
            Err(err) => {
                warn!(asset = %self.asset, error = %err, "slow candle rejected");
                return;
            }
        }

        let snapshot = self.engine.snapshot(self.slow.as_slice()).ok();
        let before = self.classifier.label();
        let after = self.classifier.on_slow_close(snapshot.as_ref());
        if before != after {
            info!(asset = %self.asset, from = %before, to = %after, at = %slow.end_time(), "regime change");
        }
    }

    /// The executor rejected the entry for the current trade. The candle's
    /// snapshot will then report no action.
    pub fn on_execution_failure(&mut self, at: DateTime<Utc>) -> Option<Transition> {
        let t = self.machine.on_execution_failure(at);
        if t.is_some() {
            self.open_action = Action::Wait;
        }
        t
    }

    /// Drop a pending signal (session shutdown).
    pub fn abandon(&mut self, at: DateTime<Utc>) -> Option<Transition> {
        self.machine.abandon(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn minute(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap() + Duration::minutes(i)
    }

    fn flat(i: i64) -> Candle {
        Candle::opened_at(minute(i), Resolution::OneMinute, 1.1)
    }

    fn step(p: &mut AssetPipeline, c: &Candle) -> CloseOutcome {
        p.on_fast_open(c.start_time, c.open);
        p.on_fast_close(c).unwrap()
    }

    #[test]
    fn warmup_reports_insufficient_history() {
        let mut p = AssetPipeline::new("EURUSD", &EngineConfig::default());
        let out = step(&mut p, &flat(0));
        assert!(out.snapshot.is_none());
        assert_eq!(out.decision.zone_status, ZoneStatus::Unknown);
        assert_eq!(out.decision.state, PhaseKind::Wait);
    }

    #[test]
    fn slow_candle_closes_every_fifteen_minutes() {
        let mut p = AssetPipeline::new("EURUSD", &EngineConfig::default());
        let updates: Vec<bool> = (0..30).map(|i| step(&mut p, &flat(i)).regime_updated).collect();
        let idx: Vec<usize> = updates
            .iter()
            .enumerate()
            .filter(|(_, u)| **u)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(idx, vec![14, 29]);
    }

    #[test]
    fn gap_is_reported_and_counted() {
        let mut p = AssetPipeline::new("EURUSD", &EngineConfig::default());
        for i in 0..25 {
            step(&mut p, &flat(i));
        }
        let out = step(&mut p, &flat(30));
        assert!(matches!(out.gap, Some(SeriesError::DataGap { .. })));
        assert!(out.snapshot.is_none());
        assert_eq!(p.gaps(), 1);
    }

    #[test]
    fn out_of_order_is_rejected() {
        let mut p = AssetPipeline::new("EURUSD", &EngineConfig::default());
        step(&mut p, &flat(0));
        step(&mut p, &flat(1));
        assert!(p.on_fast_close(&flat(1)).is_err());
        assert_eq!(p.gaps(), 0);
    }

    #[test]
    fn forced_regime_overrides_classifier() {
        let p = AssetPipeline::new("EURUSD", &EngineConfig::default())
            .with_forced_regime(RegimeLabel::Trending);
        assert_eq!(p.regime(), RegimeLabel::Trending);
        assert!(p.regime_ready());
    }
}
