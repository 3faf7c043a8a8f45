//! Backtest reports: per-asset summaries and the combined run report.
//!
//! Reports carry a `schema_version`; newer versions are rejected on load.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use zonebreak_core::domain::{ConfigHash, DatasetHash, Resolution};
use zonebreak_core::fingerprint::RunFingerprint;
use zonebreak_core::synthetic::MarketMode;

use crate::backtest::AssetRun;
use crate::metrics::{
    classifier_accuracy, reason_counts, regime_performance, regime_time_breakdown,
    setup_performance, time_in_state, ClassifierAccuracy, GroundTruth, RegimeShare, StateTime,
    TradeStats,
};

/// Current schema version for persisted reports.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetReport {
    pub asset: String,
    pub dataset_hash: DatasetHash,
    pub total_candles: usize,
    pub total_trades: usize,
    pub win_rate: f64,
    pub trades: TradeStats,
    pub regime_time_breakdown: BTreeMap<String, RegimeShare>,
    /// `None` when the series has no ground truth.
    pub classifier_accuracy: Option<ClassifierAccuracy>,
    pub regime_performance: BTreeMap<String, TradeStats>,
    /// Win rate per entry setup (immediate, delayed, reversal).
    #[serde(default)]
    pub setup_performance: BTreeMap<String, TradeStats>,
    pub time_in_state: BTreeMap<String, StateTime>,
    pub reason_counts: BTreeMap<String, usize>,
    pub data_gaps: u64,
    pub errors: u32,
}

impl AssetReport {
    pub fn from_run(
        run: &AssetRun,
        dataset_hash: DatasetHash,
        truth: Option<&GroundTruth>,
        grace_slow_candles: usize,
    ) -> Self {
        let trades = TradeStats::compute(&run.trades);
        Self {
            asset: run.asset.clone(),
            dataset_hash,
            total_candles: run.candles,
            total_trades: trades.total,
            win_rate: trades.win_rate,
            regime_time_breakdown: regime_time_breakdown(
                &run.samples,
                Resolution::OneMinute.seconds(),
            ),
            classifier_accuracy: truth
                .map(|t| classifier_accuracy(&run.samples, t, grace_slow_candles)),
            regime_performance: regime_performance(&run.trades),
            setup_performance: setup_performance(&run.trades),
            time_in_state: time_in_state(run.start, run.end, &run.transitions),
            reason_counts: reason_counts(&run.decisions),
            data_gaps: run.gaps,
            errors: run.errors,
            trades,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub seed: u64,
    pub mode: MarketMode,
    pub config_hash: ConfigHash,
    pub run_hash: ConfigHash,
    pub total_candles: usize,
    pub total_trades: usize,
    pub win_rate: f64,
    pub trades: TradeStats,
    pub regime_time_breakdown: BTreeMap<String, RegimeShare>,
    #[serde(default)]
    pub setup_performance: BTreeMap<String, TradeStats>,
    pub classifier_accuracy: Option<ClassifierAccuracy>,
    pub accuracy_threshold: f64,
    /// Whether pooled accuracy met the threshold; `None` without ground truth.
    pub accuracy_passed: Option<bool>,
    pub assets: Vec<AssetReport>,
}

impl BacktestReport {
    pub fn new(
        fingerprint: &RunFingerprint,
        assets: Vec<AssetReport>,
        accuracy_threshold: f64,
    ) -> Self {
        let trades = assets
            .iter()
            .fold(TradeStats::default(), |acc, a| acc.merge(&a.trades));

        let mut breakdown: BTreeMap<String, RegimeShare> = BTreeMap::new();
        for a in &assets {
            for (label, share) in &a.regime_time_breakdown {
                let e = breakdown.entry(label.clone()).or_default();
                e.candles += share.candles;
                e.seconds += share.seconds;
            }
        }
        let mut setups: BTreeMap<String, TradeStats> = BTreeMap::new();
        for a in &assets {
            for (setup, stats) in &a.setup_performance {
                let e = setups.entry(setup.clone()).or_default();
                *e = e.merge(stats);
            }
        }

        let total_candles: usize = assets.iter().map(|a| a.total_candles).sum();
        for share in breakdown.values_mut() {
            share.fraction = if total_candles == 0 {
                0.0
            } else {
                share.candles as f64 / total_candles as f64
            };
        }

        let classifier_accuracy = assets
            .iter()
            .filter_map(|a| a.classifier_accuracy.as_ref())
            .fold(None, |acc: Option<ClassifierAccuracy>, a| {
                Some(match acc {
                    Some(prev) => prev.merge(a),
                    None => a.clone(),
                })
            });
        let accuracy_passed = classifier_accuracy
            .as_ref()
            .map(|a| a.accuracy >= accuracy_threshold);

        Self {
            schema_version: SCHEMA_VERSION,
            seed: fingerprint.seed,
            mode: fingerprint.mode,
            config_hash: fingerprint.config_hash.clone(),
            run_hash: fingerprint.run_hash(),
            total_candles,
            total_trades: trades.total,
            win_rate: trades.win_rate,
            trades,
            regime_time_breakdown: breakdown,
            setup_performance: setups,
            classifier_accuracy,
            accuracy_threshold,
            accuracy_passed,
            assets,
        }
    }

    /// Plain-text summary for terminals and logs.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "run {} | seed {} | mode {} | {} assets | {} candles",
            self.run_hash.short(),
            self.seed,
            self.mode,
            self.assets.len(),
            self.total_candles
        );
        let t = &self.trades;
        let _ = writeln!(
            out,
            "trades {} (W {} / L {} / D {} / pending {} / cancelled {}) win rate {:.1}% pnl {:+.2}",
            t.total,
            t.wins,
            t.losses,
            t.draws,
            t.pending,
            t.cancelled,
            t.win_rate * 100.0,
            t.net_pnl
        );
        for (label, share) in &self.regime_time_breakdown {
            let _ = writeln!(
                out,
                "  {label:<9} {:>6} candles ({:.1}%)",
                share.candles,
                share.fraction * 100.0
            );
        }
        for (setup, stats) in self.setup_performance.iter().filter(|(_, s)| s.total > 0) {
            let _ = writeln!(
                out,
                "  {setup:<9} {:>4} trades win rate {:>5.1}%",
                stats.total,
                stats.win_rate * 100.0
            );
        }
        if let Some(acc) = &self.classifier_accuracy {
            let verdict = match self.accuracy_passed {
                Some(true) => "PASS",
                _ => "FAIL",
            };
            let _ = writeln!(
                out,
                "classifier accuracy {:.2}% over {} candles (threshold {:.0}%: {verdict})",
                acc.accuracy * 100.0,
                acc.scored,
                self.accuracy_threshold * 100.0
            );
            let _ = writeln!(
                out,
                "  without grace window {:.2}% over {} candles",
                acc.ungraced_accuracy * 100.0,
                acc.ungraced_scored
            );
        }
        for a in &self.assets {
            let _ = writeln!(
                out,
                "  {:<8} trades {:>4} win rate {:>5.1}% gaps {} errors {}",
                a.asset,
                a.total_trades,
                a.win_rate * 100.0,
                a.data_gaps,
                a.errors
            );
        }
        out
    }
}
