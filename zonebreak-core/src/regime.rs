//! Market regime classification on the slow (15-minute) timeframe.
//!
//! TRENDING iff ADX > threshold AND the current bb_width exceeds the median
//! bb_width of the prior `lookback` slow snapshots. Everything else, including
//! an unwarmed classifier, is CHOPPY.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::indicators::IndicatorSnapshot;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeLabel {
    Trending,
    #[default]
    Choppy,
}

impl RegimeLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            RegimeLabel::Trending => "TRENDING",
            RegimeLabel::Choppy => "CHOPPY",
        }
    }
}

impl fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Median of a slice; mean of the two middle values for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// The regime rule as a pure function.
pub fn classify(adx: f64, bb_width: f64, prior_widths: &[f64], adx_threshold: f64) -> RegimeLabel {
    match median(prior_widths) {
        Some(m) if adx > adx_threshold && bb_width > m => RegimeLabel::Trending,
        _ => RegimeLabel::Choppy,
    }
}

/// Stateful classifier fed one slow snapshot per 15-minute close.
///
/// The label only changes inside [`RegimeClassifier::on_slow_close`], so
/// reading it between closes always returns the same value.
#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    lookback: usize,
    adx_threshold: f64,
    widths: VecDeque<f64>,
    label: RegimeLabel,
    ready: bool,
    updated_at: Option<DateTime<Utc>>,
}

impl RegimeClassifier {
    pub fn new(lookback: usize, adx_threshold: f64) -> Self {
        assert!(lookback >= 1, "regime lookback must be >= 1");
        Self {
            lookback,
            adx_threshold,
            widths: VecDeque::with_capacity(lookback),
            label: RegimeLabel::Choppy,
            ready: false,
            updated_at: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.regime_lookback, config.adx_threshold)
    }

    pub fn label(&self) -> RegimeLabel {
        self.label
    }

    /// True once the last classification had ADX and a full width history.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Prior widths currently held, oldest first.
    pub fn prior_widths(&self) -> Vec<f64> {
        self.widths.iter().copied().collect()
    }

    /// Reclassify on a slow close. `None` means the slow window could not
    /// produce a snapshot; the label falls back to CHOPPY.
    pub fn on_slow_close(&mut self, snapshot: Option<&IndicatorSnapshot>) -> RegimeLabel {
        let Some(snap) = snapshot else {
            self.label = RegimeLabel::Choppy;
            self.ready = false;
            return self.label;
        };
        self.updated_at = Some(snap.timestamp);

        let prior = self.prior_widths();
        match snap.adx {
            Some(adx) if prior.len() == self.lookback => {
                self.label = classify(adx, snap.bb_width, &prior, self.adx_threshold);
                self.ready = true;
            }
            _ => {
                self.label = RegimeLabel::Choppy;
                self.ready = false;
            }
        }

        if self.widths.len() == self.lookback {
            self.widths.pop_front();
        }
        self.widths.push_back(snap.bb_width);

        self.label
    }

    /// Forget the width history (slow-window gap).
    pub fn reset(&mut self) {
        self.widths.clear();
        self.label = RegimeLabel::Choppy;
        self.ready = false;
    }
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
