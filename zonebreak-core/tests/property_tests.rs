//! Property tests for engine invariants.
//!
//! Uses proptest to verify:
//! 1. Indicator bounds: RSI and ADX stay in [0, 100], bands are ordered
//! 2. Aggregation: candles built from ticks are sane and strictly ordered
//! 3. Folding: a slow candle spans exactly its fast constituents
//! 4. Breakout lifecycle: every entry follows a confirmation
//! 5. Settlement: binary outcomes are symmetric in direction

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use zonebreak_core::aggregator::{fold_candles, CandleAggregator, CandleEvent};
use zonebreak_core::breakout::{Action, PhaseKind};
use zonebreak_core::domain::{Candle, Direction, Resolution, TradeOutcome};
use zonebreak_core::indicators::{Adx, Indicator, IndicatorEngine, Rsi};
use zonebreak_core::pipeline::AssetPipeline;
use zonebreak_core::regime::{classify, RegimeLabel};
use zonebreak_core::synthetic::{generate, MarketMode};
use zonebreak_core::EngineConfig;

// ── Strategies (proptest) ────────────────────────────────────────────

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
}

fn arb_closes(min: usize, max: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.9..1.1_f64, min..max)
}

fn candles_from(closes: &[f64], wick: f64) -> Vec<Candle> {
    let mut prev = closes[0];
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let open = prev;
            prev = c;
            Candle::new(
                epoch() + Duration::minutes(i as i64),
                Resolution::OneMinute,
                open,
                open.max(c) + wick,
                open.min(c) - wick,
                c,
            )
        })
        .collect()
}

// ── 1. Indicator bounds ──────────────────────────────────────────────

proptest! {
    #[test]
    fn rsi_is_bounded(closes in arb_closes(16, 120)) {
        let candles = candles_from(&closes, 0.0);
        for v in Rsi::new(14).compute(&candles).into_iter().filter(|v| !v.is_nan()) {
            prop_assert!((0.0..=100.0).contains(&v), "rsi {}", v);
        }
    }

    #[test]
    fn adx_is_bounded(closes in arb_closes(30, 120), wick in 0.0..0.01_f64) {
        let candles = candles_from(&closes, wick);
        for v in Adx::new(14).compute(&candles).into_iter().filter(|v| !v.is_nan()) {
            prop_assert!((0.0..=100.0 + 1e-9).contains(&v), "adx {}", v);
        }
    }

    #[test]
    fn bands_are_ordered(closes in arb_closes(20, 80)) {
        let candles = candles_from(&closes, 0.0);
        let snap = IndicatorEngine::default().snapshot(&candles).unwrap();
        prop_assert!(snap.bb_lower <= snap.bb_mean);
        prop_assert!(snap.bb_mean <= snap.bb_upper);
        prop_assert!(snap.bb_width >= 0.0);
    }

    #[test]
    fn regime_needs_both_conditions(
        adx in 0.0..60.0_f64,
        width in 0.0..0.01_f64,
        prior in prop::collection::vec(0.0..0.01_f64, 15),
    ) {
        let label = classify(adx, width, &prior, 20.0);
        let mut sorted = prior.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = sorted[7];
        let expected = if adx > 20.0 && width > median {
            RegimeLabel::Trending
        } else {
            RegimeLabel::Choppy
        };
        prop_assert_eq!(label, expected);
    }
}

// ── 2. Aggregation ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn aggregated_candles_are_sane_and_ordered(
        steps in prop::collection::vec((1_i64..45, -0.001..0.001_f64), 1..300),
    ) {
        let mut agg = CandleAggregator::new(Resolution::OneMinute);
        let mut ts = epoch();
        let mut price = 1.1;
        let mut closed = Vec::new();
        let mut opens = 0;

        for (dt, dp) in steps {
            ts += Duration::seconds(dt);
            price += dp;
            for ev in agg.on_tick(price, ts) {
                match ev {
                    CandleEvent::Opened { .. } => opens += 1,
                    CandleEvent::Closed(c) => closed.push(c),
                }
            }
        }

        prop_assert_eq!(opens, closed.len() + 1);
        for c in &closed {
            prop_assert!(c.is_sane());
        }
        for pair in closed.windows(2) {
            prop_assert!(pair[0].start_time < pair[1].start_time);
        }
    }
}

// ── 3. Folding ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn folded_candles_span_their_bucket(seed in 0u64..500, count in 15usize..200) {
        let market = generate(seed, count, MarketMode::Default);
        let fast = market.series.candles();
        let slow = fold_candles(fast, Resolution::FifteenMinute);
        prop_assert_eq!(slow.len(), count.div_ceil(15));

        for (k, s) in slow.iter().enumerate() {
            let chunk = &fast[k * 15..((k + 1) * 15).min(count)];
            prop_assert_eq!(s.open, chunk[0].open);
            prop_assert_eq!(s.close, chunk[chunk.len() - 1].close);
            let high = chunk.iter().map(|c| c.high).fold(f64::MIN, f64::max);
            let low = chunk.iter().map(|c| c.low).fold(f64::MAX, f64::min);
            prop_assert_eq!(s.high, high);
            prop_assert_eq!(s.low, low);
        }
    }
}

// ── 4. Breakout lifecycle ────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_entry_follows_a_confirmation(seed in 0u64..1000) {
        let market = generate(seed, 600, MarketMode::Default);
        let mut pipeline = AssetPipeline::new("EURUSD", &EngineConfig::default())
            .with_forced_regime(RegimeLabel::Trending);
        let mut prev_state = PhaseKind::Wait;

        for c in market.series.iter() {
            let open = pipeline.on_fast_open(c.start_time, c.open);
            if let Action::Enter(_) = open.action {
                prop_assert_eq!(prev_state, PhaseKind::Confirmed);
            }
            let out = pipeline.on_fast_close(c).unwrap();
            prev_state = out.decision.state;
            prop_assert_eq!(prev_state, pipeline.phase_kind());
        }
    }
}

// ── 5. Settlement ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn settlement_is_direction_symmetric(entry in 0.5..2.0_f64, exit in 0.5..2.0_f64) {
        let up = TradeOutcome::settle(Direction::Up, entry, exit);
        let down = TradeOutcome::settle(Direction::Down, entry, exit);
        if entry == exit {
            prop_assert_eq!(up, TradeOutcome::Draw);
            prop_assert_eq!(down, TradeOutcome::Draw);
        } else {
            prop_assert_ne!(up, down);
            prop_assert_eq!(up == TradeOutcome::Win, exit > entry);
        }
    }
}
