//! Criterion benchmarks for the signal engine hot paths.
//!
//! Benchmarks:
//! 1. Indicator snapshot over a full rolling window
//! 2. Individual indicators over a long series
//! 3. Per-asset pipeline, candle by candle
//! 4. Tick aggregation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use zonebreak_core::aggregator::CandleAggregator;
use zonebreak_core::domain::{Candle, Resolution};
use zonebreak_core::indicators::{Adx, Bollinger, Indicator, IndicatorEngine, Rsi};
use zonebreak_core::pipeline::AssetPipeline;
use zonebreak_core::synthetic::{generate, MarketMode};
use zonebreak_core::EngineConfig;

fn candles(n: usize) -> Vec<Candle> {
    generate(42, n, MarketMode::Zigzag).series.candles().to_vec()
}

fn bench_snapshot(c: &mut Criterion) {
    let window = candles(64);
    let engine = IndicatorEngine::default();
    c.bench_function("snapshot_64", |b| {
        b.iter(|| engine.snapshot(black_box(&window)))
    });
}

fn bench_indicators(c: &mut Criterion) {
    let series = candles(5_000);
    let mut group = c.benchmark_group("indicators");
    let indicators: Vec<Box<dyn Indicator>> = vec![
        Box::new(Rsi::new(14)),
        Box::new(Bollinger::width(20, 2.5)),
        Box::new(Adx::new(14)),
    ];
    for ind in &indicators {
        group.bench_with_input(BenchmarkId::from_parameter(ind.name()), &series, |b, s| {
            b.iter(|| ind.compute(black_box(s)))
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    for n in [1_000usize, 5_000] {
        let series = candles(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &series, |b, s| {
            b.iter(|| {
                let mut p = AssetPipeline::new("EURUSD", &EngineConfig::default());
                for candle in s {
                    p.on_fast_open(candle.start_time, candle.open);
                    let _ = black_box(p.on_fast_close(candle));
                }
            })
        });
    }
    group.finish();
}

fn bench_aggregator(c: &mut Criterion) {
    let series = candles(500);
    let ticks: Vec<_> = series
        .iter()
        .flat_map(|c| {
            [c.open, c.high, c.low, c.close]
                .into_iter()
                .enumerate()
                .map(move |(k, p)| (p, c.start_time + chrono::Duration::seconds(k as i64 * 15)))
        })
        .collect();
    c.bench_function("aggregate_2000_ticks", |b| {
        b.iter(|| {
            let mut agg = CandleAggregator::new(Resolution::OneMinute);
            for &(price, ts) in &ticks {
                black_box(agg.on_tick(price, ts));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_snapshot,
    bench_indicators,
    bench_pipeline,
    bench_aggregator
);
criterion_main!(benches);
