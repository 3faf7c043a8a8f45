//! Backtest metrics: pure functions over trades, decisions and regime samples.
//!
//! Every metric is a pure function: recorded run data in, summary out.
//! No dependencies on the pipeline or the generator's internals.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use zonebreak_core::breakout::{PhaseKind, Transition};
use zonebreak_core::domain::{EntrySetup, Trade, TradeOutcome};
use zonebreak_core::regime::RegimeLabel;
use zonebreak_core::snapshot::DecisionSnapshot;
use zonebreak_core::synthetic::{Segment, SyntheticMarket};

/// Fast candles per slow candle, for grace windows expressed in slow candles.
const FAST_PER_SLOW: usize = 15;

// ─── Trades ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub draws: usize,
    pub pending: usize,
    pub cancelled: usize,
    /// wins / (wins + losses); 0 when nothing resolved to a win or loss.
    pub win_rate: f64,
    pub net_pnl: f64,
}

impl TradeStats {
    pub fn compute<'a>(trades: impl IntoIterator<Item = &'a Trade>) -> Self {
        let mut s = Self::default();
        for t in trades {
            s.add(t);
        }
        s
    }

    /// Count one more trade in its current outcome.
    pub fn add(&mut self, t: &Trade) {
        self.total += 1;
        self.net_pnl += t.pnl();
        match t.outcome {
            TradeOutcome::Win => self.wins += 1,
            TradeOutcome::Loss => self.losses += 1,
            TradeOutcome::Draw => self.draws += 1,
            TradeOutcome::Pending => self.pending += 1,
            TradeOutcome::Cancelled => self.cancelled += 1,
        }
        self.win_rate = ratio(self.wins, self.wins + self.losses);
    }

    /// Combine stats from several assets.
    pub fn merge(&self, other: &Self) -> Self {
        let wins = self.wins + other.wins;
        let losses = self.losses + other.losses;
        Self {
            total: self.total + other.total,
            wins,
            losses,
            draws: self.draws + other.draws,
            pending: self.pending + other.pending,
            cancelled: self.cancelled + other.cancelled,
            win_rate: ratio(wins, wins + losses),
            net_pnl: self.net_pnl + other.net_pnl,
        }
    }
}

/// wins / (wins + losses). Pending, cancelled and drawn trades are excluded.
pub fn win_rate(trades: &[Trade]) -> f64 {
    TradeStats::compute(trades).win_rate
}

/// Trade statistics grouped by the regime in force at entry.
pub fn regime_performance(trades: &[Trade]) -> BTreeMap<String, TradeStats> {
    [RegimeLabel::Trending, RegimeLabel::Choppy]
        .into_iter()
        .map(|label| {
            let stats = TradeStats::compute(trades.iter().filter(|t| t.regime == label));
            (label.as_str().to_string(), stats)
        })
        .collect()
}

/// Trade statistics grouped by how each entry was confirmed. Trades with no
/// recorded setup are left out.
pub fn setup_performance(trades: &[Trade]) -> BTreeMap<String, TradeStats> {
    EntrySetup::ALL
        .into_iter()
        .map(|setup| {
            let stats = TradeStats::compute(trades.iter().filter(|t| t.setup == Some(setup)));
            (setup.as_str().to_string(), stats)
        })
        .collect()
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

// ─── Regime ─────────────────────────────────────────────────────────

/// The classifier's view at one fast candle close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeSample {
    pub candle_start: DateTime<Utc>,
    pub label: RegimeLabel,
    /// Whether the label came from a warmed-up classifier.
    pub ready: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimeShare {
    pub candles: usize,
    pub seconds: i64,
    pub fraction: f64,
}

/// Time spent under each regime label, counted in fast candles.
pub fn regime_time_breakdown(
    samples: &[RegimeSample],
    candle_seconds: i64,
) -> BTreeMap<String, RegimeShare> {
    let total = samples.len();
    [RegimeLabel::Trending, RegimeLabel::Choppy]
        .into_iter()
        .map(|label| {
            let candles = samples.iter().filter(|s| s.label == label).count();
            let share = RegimeShare {
                candles,
                seconds: candles as i64 * candle_seconds,
                fraction: ratio(candles, total),
            };
            (label.as_str().to_string(), share)
        })
        .collect()
}

/// Generator segments anchored in time, so samples from a series with holes
/// still find their label.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruth {
    origin: DateTime<Utc>,
    segments: Vec<Segment>,
}

impl GroundTruth {
    /// `None` when the market carries no segments.
    pub fn of(market: &SyntheticMarket) -> Option<Self> {
        let origin = market.series.first()?.start_time;
        market.has_ground_truth().then(|| Self {
            origin,
            segments: market.segments.clone(),
        })
    }

    fn index_of(&self, ts: DateTime<Utc>) -> Option<usize> {
        let minutes = (ts - self.origin).num_minutes();
        usize::try_from(minutes).ok()
    }

    pub fn label_at(&self, ts: DateTime<Utc>) -> Option<RegimeLabel> {
        let i = self.index_of(ts)?;
        self.segments.iter().find(|s| s.contains(i)).map(|s| s.label)
    }

    /// True if `ts` falls within `grace` candles after a segment boundary.
    pub fn in_grace(&self, ts: DateTime<Utc>, grace: usize) -> bool {
        let Some(i) = self.index_of(ts) else {
            return false;
        };
        self.segments
            .iter()
            .skip(1)
            .any(|s| i >= s.start && i < s.start + grace)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierAccuracy {
    pub scored: usize,
    pub correct: usize,
    pub accuracy: f64,
    /// Rows: truth, columns: predicted.
    pub trending_as_trending: usize,
    pub trending_as_choppy: usize,
    pub choppy_as_trending: usize,
    pub choppy_as_choppy: usize,
    /// The same ready samples scored without skipping any grace window.
    #[serde(default)]
    pub ungraced_scored: usize,
    #[serde(default)]
    pub ungraced_correct: usize,
    #[serde(default)]
    pub ungraced_accuracy: f64,
}

impl ClassifierAccuracy {
    /// Pool the confusion counts of several assets.
    pub fn merge(&self, other: &Self) -> Self {
        let mut m = Self {
            trending_as_trending: self.trending_as_trending + other.trending_as_trending,
            trending_as_choppy: self.trending_as_choppy + other.trending_as_choppy,
            choppy_as_trending: self.choppy_as_trending + other.choppy_as_trending,
            choppy_as_choppy: self.choppy_as_choppy + other.choppy_as_choppy,
            ungraced_scored: self.ungraced_scored + other.ungraced_scored,
            ungraced_correct: self.ungraced_correct + other.ungraced_correct,
            ..Self::default()
        };
        m.ungraced_accuracy = ratio(m.ungraced_correct, m.ungraced_scored);
        m.scored = m.trending_as_trending
            + m.trending_as_choppy
            + m.choppy_as_trending
            + m.choppy_as_choppy;
        m.correct = m.trending_as_trending + m.choppy_as_choppy;
        m.accuracy = ratio(m.correct, m.scored);
        m
    }
}

/// Agreement between classifier labels and ground truth.
///
/// Only samples from a ready classifier are scored, and samples within
/// `grace_slow_candles` slow candles after a segment boundary are skipped:
/// the trailing indicators need that long to see a new regime.
pub fn classifier_accuracy(
    samples: &[RegimeSample],
    truth: &GroundTruth,
    grace_slow_candles: usize,
) -> ClassifierAccuracy {
    let grace = grace_slow_candles * FAST_PER_SLOW;
    let mut acc = ClassifierAccuracy::default();

    for s in samples.iter().filter(|s| s.ready) {
        let Some(actual) = truth.label_at(s.candle_start) else {
            continue;
        };
        acc.ungraced_scored += 1;
        if actual == s.label {
            acc.ungraced_correct += 1;
        }
        if truth.in_grace(s.candle_start, grace) {
            continue;
        }
        acc.scored += 1;
        match (actual, s.label) {
            (RegimeLabel::Trending, RegimeLabel::Trending) => acc.trending_as_trending += 1,
            (RegimeLabel::Trending, RegimeLabel::Choppy) => acc.trending_as_choppy += 1,
            (RegimeLabel::Choppy, RegimeLabel::Trending) => acc.choppy_as_trending += 1,
            (RegimeLabel::Choppy, RegimeLabel::Choppy) => acc.choppy_as_choppy += 1,
        }
    }
    acc.correct = acc.trending_as_trending + acc.choppy_as_choppy;
    acc.accuracy = ratio(acc.correct, acc.scored);
    acc.ungraced_accuracy = ratio(acc.ungraced_correct, acc.ungraced_scored);
    acc
}

// ─── Breakout states ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateTime {
    pub visits: usize,
    pub seconds: i64,
    pub avg_seconds: f64,
}

/// Time spent in each phase between `start` and `end`, replayed from the
/// transition log. The machine starts in WAIT.
pub fn time_in_state(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    transitions: &[Transition],
) -> BTreeMap<String, StateTime> {
    let mut totals: BTreeMap<PhaseKind, (usize, Duration)> = PhaseKind::ALL
        .into_iter()
        .map(|k| (k, (0, Duration::zero())))
        .collect();

    let mut current = PhaseKind::Wait;
    let mut since = start;
    if let Some(e) = totals.get_mut(&current) {
        e.0 += 1;
    }

    for t in transitions {
        let at = t.at.max(since).min(end.max(since));
        if let Some(e) = totals.get_mut(&current) {
            e.1 = e.1 + (at - since);
        }
        current = t.to;
        since = at;
        if let Some(e) = totals.get_mut(&current) {
            e.0 += 1;
        }
    }
    if let Some(e) = totals.get_mut(&current) {
        e.1 = e.1 + (end.max(since) - since);
    }

    totals
        .into_iter()
        .map(|(kind, (visits, dur))| {
            let seconds = dur.num_seconds();
            let avg_seconds = if visits == 0 {
                0.0
            } else {
                seconds as f64 / visits as f64
            };
            (
                kind.as_str().to_string(),
                StateTime {
                    visits,
                    seconds,
                    avg_seconds,
                },
            )
        })
        .collect()
}

/// How often each reason was reported at a candle close.
pub fn reason_counts(decisions: &[DecisionSnapshot]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for d in decisions {
        *counts.entry(d.reason.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}
