//! Look-ahead contamination tests for the indicators.
//!
//! No indicator value at candle t may depend on candles after t.
//!
//! Method: compute on a truncated series (candles 0..100) and on the full
//! series (candles 0..200). Values 0..100 must be identical between both runs.

use zonebreak_core::domain::Candle;
use zonebreak_core::indicators::{
    Adx, Bollinger, BollingerBand, Indicator, IndicatorEngine, Rsi,
};
use zonebreak_core::synthetic::{generate, MarketMode};

fn make_test_candles(n: usize) -> Vec<Candle> {
    generate(11, n, MarketMode::Default).series.candles().to_vec()
}

fn assert_no_lookahead(indicator: &dyn Indicator, full: &[Candle], truncated_len: usize) {
    let truncated = &full[..truncated_len];
    let full_result = indicator.compute(full);
    let truncated_result = indicator.compute(truncated);

    assert_eq!(
        truncated_result.len(),
        truncated_len,
        "{}: truncated result length mismatch",
        indicator.name()
    );
    assert_eq!(full_result.len(), full.len());

    for i in 0..truncated_len {
        let t = truncated_result[i];
        let f = full_result[i];

        if t.is_nan() && f.is_nan() {
            continue;
        }

        assert!(
            !t.is_nan() && !f.is_nan(),
            "{}: NaN mismatch at candle {i} (truncated={t}, full={f})",
            indicator.name()
        );
        assert!(
            (t - f).abs() < 1e-10,
            "{}: look-ahead contamination at candle {i}: truncated={t}, full={f}",
            indicator.name()
        );
    }
}

#[test]
fn lookahead_rsi() {
    let candles = make_test_candles(200);
    assert_no_lookahead(&Rsi::new(14), &candles, 100);
    assert_no_lookahead(&Rsi::new(5), &candles, 100);
}

#[test]
fn lookahead_bollinger() {
    let candles = make_test_candles(200);
    for band in [
        BollingerBand::Upper,
        BollingerBand::Middle,
        BollingerBand::Lower,
        BollingerBand::Width,
    ] {
        assert_no_lookahead(&Bollinger::new(20, 2.5, band), &candles, 100);
    }
}

#[test]
fn lookahead_adx() {
    let candles = make_test_candles(200);
    assert_no_lookahead(&Adx::new(14), &candles, 100);
    assert_no_lookahead(&Adx::new(7), &candles, 100);
}

#[test]
fn warmup_lengths_match_lookback() {
    let candles = make_test_candles(100);
    let indicators: Vec<Box<dyn Indicator>> = vec![
        Box::new(Rsi::new(14)),
        Box::new(Bollinger::width(20, 2.5)),
        Box::new(Adx::new(14)),
    ];
    for ind in &indicators {
        let values = ind.compute(&candles);
        let nan_prefix = values.iter().take_while(|v| v.is_nan()).count();
        assert_eq!(nan_prefix, ind.lookback(), "{}", ind.name());
    }
}

/// Snapshots are a pure function of the slice they are given.
#[test]
fn snapshot_ignores_later_candles() {
    let candles = make_test_candles(120);
    let engine = IndicatorEngine::default();
    let early = engine.snapshot(&candles[..60]).unwrap();
    let again = engine.snapshot(&candles[..60]).unwrap();
    assert_eq!(early, again);
    let later = engine.snapshot(&candles[..61]).unwrap();
    assert_ne!(early.timestamp, later.timestamp);
}
