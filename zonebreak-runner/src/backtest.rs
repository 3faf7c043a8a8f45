//! Backtest runner: drives candle series through the signal pipeline.
//!
//! Entry points:
//! - `run_series()`: one asset, one series. No ground truth needed.
//! - `run_market()`: one synthetic market, scored against its segments.
//! - `run_backtest()`: every configured asset in parallel, each on its own
//!   generated market, folded into a [`BacktestReport`].
//! - `run_history()`: recorded series in parallel, reported without
//!   classifier accuracy since there are no labelled segments.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use zonebreak_core::breakout::{Action, Transition};
use zonebreak_core::domain::{CandleSeries, Resolution, SeriesError, Trade, TradeId};
use zonebreak_core::fingerprint::{dataset_hash, RunFingerprint};
use zonebreak_core::pipeline::AssetPipeline;
use zonebreak_core::rng::RngHierarchy;
use zonebreak_core::snapshot::DecisionSnapshot;
use zonebreak_core::synthetic::{MarketGenerator, SyntheticMarket};
use zonebreak_core::EngineConfig;

use crate::config::{BacktestConfig, BacktestSettings, ConfigError};
use crate::metrics::{GroundTruth, RegimeSample};
use crate::report::{AssetReport, BacktestReport};

/// Stream id for market generation in the RNG hierarchy.
const MARKET_STREAM: u64 = 0;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("series for {asset} is empty")]
    EmptySeries { asset: String },
    #[error("series for {asset} rejected: {source}")]
    Series {
        asset: String,
        #[source]
        source: SeriesError,
    },
    #[error("series for {asset} is {actual}, expected 1m candles")]
    Resolution { asset: String, actual: Resolution },
}

/// Everything recorded while replaying one asset.
#[derive(Debug, Clone)]
pub struct AssetRun {
    pub asset: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub candles: usize,
    pub trades: Vec<Trade>,
    pub decisions: Vec<DecisionSnapshot>,
    pub samples: Vec<RegimeSample>,
    pub transitions: Vec<Transition>,
    pub gaps: u64,
    pub errors: u32,
}

/// Result of a full run: the report plus the raw per-asset records.
#[derive(Debug, Clone)]
pub struct Backtest {
    pub report: BacktestReport,
    pub runs: Vec<AssetRun>,
}

/// Replay one-minute candles in order: open (may enter), close, then settle
/// every trade whose expiry has passed at this candle's close.
///
/// Trades still pending when the series ends stay `Pending`.
pub fn run_series(series: &CandleSeries, config: &EngineConfig) -> Result<AssetRun, BacktestError> {
    let asset = series.asset().to_string();
    if series.resolution() != Resolution::OneMinute {
        return Err(BacktestError::Resolution {
            asset,
            actual: series.resolution(),
        });
    }
    let (Some(first), Some(last)) = (series.first(), series.last()) else {
        return Err(BacktestError::EmptySeries { asset });
    };

    let mut pipeline = AssetPipeline::new(asset.clone(), config);
    let mut run = AssetRun {
        asset: asset.clone(),
        start: first.start_time,
        end: last.end_time(),
        candles: series.len(),
        trades: Vec::new(),
        decisions: Vec::with_capacity(series.len()),
        samples: Vec::with_capacity(series.len()),
        transitions: Vec::new(),
        gaps: 0,
        errors: 0,
    };

    for candle in series.iter() {
        let open = pipeline.on_fast_open(candle.start_time, candle.open);
        run.transitions.extend(open.transitions);
        if let Action::Enter(direction) = open.action {
            let id = TradeId::from(run.trades.len() as u64 + 1);
            run.trades.push(Trade::open(
                id,
                asset.as_str(),
                direction,
                config.stake,
                candle.open,
                candle.start_time,
                config.expiry_seconds,
                open.regime,
            )
            .with_setup(open.setup));
        }

        let out = pipeline
            .on_fast_close(candle)
            .map_err(|source| BacktestError::Series {
                asset: asset.clone(),
                source,
            })?;
        run.transitions.extend(out.transitions);
        run.decisions.push(out.decision);

        let end = candle.end_time();
        for trade in run
            .trades
            .iter_mut()
            .filter(|t| t.is_pending() && t.expiry_time <= end)
        {
            trade.resolve(candle.close);
        }

        run.samples.push(RegimeSample {
            candle_start: candle.start_time,
            label: pipeline.regime(),
            ready: pipeline.regime_ready(),
        });
    }

    run.gaps = pipeline.gaps();
    run.errors = pipeline.state().error_count;
    if run.gaps > 0 {
        warn!(asset = %asset, gaps = run.gaps, "series had holes");
    }
    Ok(run)
}

/// Run a synthetic market and score the classifier against its segments.
pub fn run_market(
    market: &SyntheticMarket,
    config: &EngineConfig,
    grace_slow_candles: usize,
) -> Result<(AssetRun, AssetReport), BacktestError> {
    let run = run_series(&market.series, config)?;
    let truth = GroundTruth::of(market);
    let report = AssetReport::from_run(
        &run,
        dataset_hash(&market.series),
        truth.as_ref(),
        grace_slow_candles,
    );
    info!(
        asset = %run.asset,
        candles = run.candles,
        trades = report.total_trades,
        win_rate = report.win_rate,
        accuracy = report.classifier_accuracy.as_ref().map(|a| a.accuracy),
        "asset backtest complete"
    );
    Ok((run, report))
}

/// Market for one configured asset. The seed is derived from the master
/// seed and the asset name, never from the asset's position in the list.
pub fn generate_market(
    generator: &MarketGenerator,
    seeds: &RngHierarchy,
    asset: &str,
    settings: &BacktestSettings,
) -> SyntheticMarket {
    let seed = seeds.sub_seed(asset, MARKET_STREAM);
    generator.generate(asset, seed, settings.candles, settings.mode)
}

/// Generate one market per configured asset and run them in parallel.
///
/// Results do not depend on asset order or thread scheduling.
pub fn run_backtest(config: &BacktestConfig) -> Result<Backtest, BacktestError> {
    config.validate()?;
    let settings = &config.backtest;
    let generator = MarketGenerator::new(config.generator.clone())
        .map_err(|e| BacktestError::Config(ConfigError::Engine(e)))?;
    let seeds = RngHierarchy::new(settings.seed);

    let results: Vec<(AssetRun, AssetReport, SyntheticMarket)> = settings
        .assets
        .par_iter()
        .map(|asset| {
            let market = generate_market(&generator, &seeds, asset, settings);
            let (run, report) = run_market(&market, &config.engine, settings.grace_slow_candles)?;
            Ok((run, report, market))
        })
        .collect::<Result<_, BacktestError>>()?;

    let mut fingerprint =
        RunFingerprint::new(settings.seed, settings.mode, settings.candles, &config.engine);
    let mut runs = Vec::with_capacity(results.len());
    let mut reports = Vec::with_capacity(results.len());
    for (run, report, market) in results {
        fingerprint = fingerprint.with_dataset(&market.series);
        runs.push(run);
        reports.push(report);
    }

    let report = BacktestReport::new(&fingerprint, reports, settings.accuracy_threshold);
    info!(
        run = %report.run_hash.short(),
        assets = report.assets.len(),
        candles = report.total_candles,
        trades = report.total_trades,
        win_rate = report.win_rate,
        "backtest complete"
    );
    Ok(Backtest { report, runs })
}

/// Backtest recorded series (for example an imported candle tape).
///
/// The fingerprint carries the configured seed and mode unchanged; the
/// dataset hashes are what identify the run.
pub fn run_history(series: &[CandleSeries], config: &BacktestConfig) -> Result<Backtest, BacktestError> {
    config.validate()?;
    let settings = &config.backtest;

    let results: Vec<(AssetRun, AssetReport)> = series
        .par_iter()
        .map(|s| {
            let run = run_series(s, &config.engine)?;
            let report =
                AssetReport::from_run(&run, dataset_hash(s), None, settings.grace_slow_candles);
            info!(
                asset = %run.asset,
                candles = run.candles,
                trades = report.total_trades,
                win_rate = report.win_rate,
                "history backtest complete"
            );
            Ok((run, report))
        })
        .collect::<Result<_, BacktestError>>()?;

    let longest = series.iter().map(CandleSeries::len).max().unwrap_or(0);
    let fingerprint = series.iter().fold(
        RunFingerprint::new(settings.seed, settings.mode, longest, &config.engine),
        |fp, s| fp.with_dataset(s),
    );
    let (runs, reports): (Vec<_>, Vec<_>) = results.into_iter().unzip();
    let report = BacktestReport::new(&fingerprint, reports, settings.accuracy_threshold);
    info!(
        run = %report.run_hash.short(),
        assets = report.assets.len(),
        candles = report.total_candles,
        trades = report.total_trades,
        "history backtest complete"
    );
    Ok(Backtest { report, runs })
}
