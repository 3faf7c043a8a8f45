//! ZoneBreak CLI: synthetic data, backtests and replayed live sessions.
//!
//! Commands:
//! - `generate`: write a synthetic candle series as CSV
//! - `backtest`: run one or more assets from flags or a TOML config, or
//!   replay a recorded candle tape with `--candles`
//! - `replay`: drive a live session over replayed synthetic feeds

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use zonebreak_core::feed::QuoteFeed;
use zonebreak_core::rng::RngHierarchy;
use zonebreak_core::synthetic::{MarketGenerator, MarketMode};
use zonebreak_runner::config::BacktestConfig;
use zonebreak_runner::export::export_candles_csv;
use zonebreak_runner::{
    generate_market, load_candles_csv, run_backtest, run_history, save_artifacts, FeedStatus,
    PriceBoard, ReplayFeed, Session, SessionEvent, SimulatedExecutor, WorkerStats,
};

#[derive(Parser)]
#[command(
    name = "zonebreak",
    about = "ZoneBreak: breakout signal engine for short-expiry trades"
)]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Market selection shared by every command.
#[derive(Args, Clone)]
struct MarketArgs {
    /// TOML config file; flags below override its [backtest] table.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Master seed.
    #[arg(long)]
    seed: Option<u64>,

    /// One-minute candles per generated asset.
    #[arg(long)]
    count: Option<usize>,

    /// Market mode: default or zigzag.
    #[arg(long)]
    mode: Option<MarketMode>,

    /// Comma-separated asset names.
    #[arg(long, value_delimiter = ',')]
    assets: Option<Vec<String>>,
}

impl MarketArgs {
    fn resolve(&self) -> Result<BacktestConfig> {
        let mut config = match &self.config {
            Some(path) => BacktestConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => BacktestConfig::default(),
        };
        let b = &mut config.backtest;
        if let Some(seed) = self.seed {
            b.seed = seed;
        }
        if let Some(count) = self.count {
            b.candles = count;
        }
        if let Some(mode) = self.mode {
            b.mode = mode;
        }
        if let Some(assets) = &self.assets {
            b.assets = assets.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a synthetic candle series as CSV.
    Generate {
        #[command(flatten)]
        market: MarketArgs,

        /// Output file. Defaults to stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run a backtest and save its artifacts.
    Backtest {
        #[command(flatten)]
        market: MarketArgs,

        /// Candle CSV to backtest instead of generated markets.
        #[arg(long)]
        candles: Option<PathBuf>,

        /// Output directory for run artifacts. Defaults to the config's.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Print the report without writing artifacts.
        #[arg(long, default_value_t = false)]
        no_save: bool,

        /// Exit non-zero if classifier accuracy is below the threshold.
        #[arg(long, default_value_t = false)]
        require_accuracy: bool,
    },
    /// Run a live session over replayed synthetic feeds.
    Replay {
        #[command(flatten)]
        market: MarketArgs,

        /// Reject every n-th order (0 = never).
        #[arg(long, default_value_t = 0)]
        reject_every: u64,

        /// Drop each feed after this many ticks, once (0 = never).
        #[arg(long, default_value_t = 0)]
        disconnect_after: usize,

        /// Print every decision snapshot.
        #[arg(long, default_value_t = false)]
        snapshots: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Generate { market, out } => run_generate(&market, out),
        Commands::Backtest {
            market,
            candles,
            output_dir,
            no_save,
            require_accuracy,
        } => run_backtest_cmd(&market, candles, output_dir, no_save, require_accuracy),
        Commands::Replay {
            market,
            reject_every,
            disconnect_after,
            snapshots,
        } => run_replay(&market, reject_every, disconnect_after, snapshots),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run_generate(market: &MarketArgs, out: Option<PathBuf>) -> Result<()> {
    let config = market.resolve()?;
    let generator = MarketGenerator::new(config.generator.clone())?;
    let seeds = RngHierarchy::new(config.backtest.seed);
    let b = &config.backtest;

    let mut csv = String::new();
    for (i, asset) in b.assets.iter().enumerate() {
        let m = generate_market(&generator, &seeds, asset, b);
        info!(%asset, candles = m.series.len(), segments = m.segments.len(), "generated");
        let body = export_candles_csv(&m.series)?;
        // Keep a single header when several assets share one file.
        let body = if i == 0 {
            body.as_str()
        } else {
            body.split_once('\n').map_or("", |(_, rest)| rest)
        };
        csv.push_str(body);
    }

    match out {
        Some(path) => {
            std::fs::write(&path, csv).with_context(|| format!("writing {}", path.display()))?;
            println!("Candles written to: {}", path.display());
        }
        None => print!("{csv}"),
    }
    Ok(())
}

fn run_backtest_cmd(
    market: &MarketArgs,
    candles: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    no_save: bool,
    require_accuracy: bool,
) -> Result<()> {
    let config = market.resolve()?;
    let bt = match &candles {
        Some(path) => {
            let series =
                load_candles_csv(path).with_context(|| format!("loading {}", path.display()))?;
            if series.is_empty() {
                bail!("{} has no candles", path.display());
            }
            info!(file = %path.display(), assets = series.len(), "candles loaded");
            run_history(&series, &config)?
        }
        None => run_backtest(&config)?,
    };

    println!();
    print!("{}", bt.report.summary());

    if !no_save {
        let dir = output_dir.unwrap_or_else(|| config.backtest.output_dir.clone());
        let run_dir = save_artifacts(&bt, &dir)?;
        println!("Artifacts saved to: {}", run_dir.display());
    }

    if require_accuracy && bt.report.accuracy_passed == Some(false) {
        bail!(
            "classifier accuracy below threshold {:.2}",
            bt.report.accuracy_threshold
        );
    }
    Ok(())
}

fn run_replay(
    market: &MarketArgs,
    reject_every: u64,
    disconnect_after: usize,
    print_snapshots: bool,
) -> Result<()> {
    let config = market.resolve()?;
    let generator = MarketGenerator::new(config.generator.clone())?;
    let seeds = RngHierarchy::new(config.backtest.seed);
    let b = &config.backtest;

    let board = Arc::new(PriceBoard::new());
    let mut feeds: Vec<Box<dyn QuoteFeed>> = Vec::with_capacity(b.assets.len());
    for asset in &b.assets {
        let m = generate_market(&generator, &seeds, asset, b);
        let mut feed = ReplayFeed::new(&m.series, board.clone());
        if disconnect_after > 0 {
            feed = feed.with_disconnects(vec![disconnect_after]);
        }
        feeds.push(Box::new(feed));
    }
    let executor = Arc::new(SimulatedExecutor::new(board).with_reject_every(reject_every));

    let session = Session::spawn(feeds, executor, &config.engine, &config.session)?;
    let mut snapshots = 0usize;
    for event in session.events().iter() {
        match event {
            SessionEvent::Snapshot(d) => {
                snapshots += 1;
                if print_snapshots {
                    println!(
                        "{} {:<8} {:<12} {:<10} {:<8} {}",
                        d.timestamp.format("%Y-%m-%d %H:%M"),
                        d.asset,
                        d.state.to_string(),
                        d.action.to_string(),
                        d.regime.to_string(),
                        d.reason
                    );
                }
            }
            SessionEvent::TradeOpened(t) => {
                println!(
                    "OPEN   {:<8} #{} {} @ {:.5} ({})",
                    t.asset, t.id, t.direction, t.entry_price, t.entry_time
                );
            }
            SessionEvent::TradeClosed(t) => {
                println!("CLOSE  {:<8} #{} {}", t.asset, t.id, t.outcome);
            }
            SessionEvent::ExecutionFailed { asset, error, .. } => {
                println!("FAILED {asset:<8} {error}");
            }
            SessionEvent::Feed { asset, status } => match status {
                FeedStatus::Connected | FeedStatus::Closed => {}
                other => println!("FEED   {asset:<8} {other:?}"),
            },
            SessionEvent::Finished(_) => {}
        }
    }
    let stats = session.join();

    println!();
    println!("=== Replay Session ===");
    println!("Snapshots:      {snapshots}");
    for s in &stats {
        print_worker(s);
    }
    Ok(())
}

fn print_worker(s: &WorkerStats) {
    let t = &s.trades;
    println!(
        "{:<8} candles {:>6} trades {:>4} (W {} / L {} / D {} / C {}) win rate {:>5.1}% \
         failures {} reconnects {} gaps {} stopped {:?}",
        s.asset,
        s.candles,
        t.total,
        t.wins,
        t.losses,
        t.draws,
        t.cancelled,
        t.win_rate * 100.0,
        s.execution_failures,
        s.reconnects,
        s.gaps,
        s.stopped
    );
}
