//! Artifact export: JSON report plus CSV trade and decision tapes, and the
//! candle tape reader used to backtest recorded history.
//!
//! A run directory is named after the run fingerprint, so re-running the
//! same configuration overwrites the same artifacts:
//!
//! ```text
//! <output_dir>/<run_hash[..12]>/
//!     report.json
//!     trades.csv
//!     decisions.csv
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use zonebreak_core::domain::{Candle, CandleSeries, Resolution, SeriesError, Trade};
use zonebreak_core::snapshot::DecisionSnapshot;

use crate::backtest::Backtest;
use crate::report::{BacktestReport, SCHEMA_VERSION};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv buffer: {0}")]
    Buffer(String),
    #[error("unsupported schema version {found} (max supported: {supported})")]
    Schema { found: u32, supported: u32 },
    #[error("bad candle on line {line}: {reason}")]
    Candle { line: u64, reason: String },
    #[error("candles for {asset} rejected: {source}")]
    Series {
        asset: String,
        #[source]
        source: SeriesError,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ─── JSON ───────────────────────────────────────────────────────────

pub fn export_json(report: &BacktestReport) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Parse a report, rejecting schema versions newer than this build.
pub fn import_json(json: &str) -> Result<BacktestReport, ExportError> {
    let report: BacktestReport = serde_json::from_str(json)?;
    if report.schema_version > SCHEMA_VERSION {
        return Err(ExportError::Schema {
            found: report.schema_version,
            supported: SCHEMA_VERSION,
        });
    }
    Ok(report)
}

// ─── CSV ────────────────────────────────────────────────────────────

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String, ExportError> {
    let data = wtr
        .into_inner()
        .map_err(|e| ExportError::Buffer(e.to_string()))?;
    String::from_utf8(data).map_err(|e| ExportError::Buffer(e.to_string()))
}

fn opt(v: Option<f64>, prec: usize) -> String {
    v.map(|x| format!("{x:.prec$}")).unwrap_or_default()
}

/// Columns: id, asset, direction, stake, entry_time, entry_price,
/// expiry_time, exit_price, outcome, pnl, regime, setup
pub fn export_trades_csv<'a>(trades: impl IntoIterator<Item = &'a Trade>) -> Result<String, ExportError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "id",
        "asset",
        "direction",
        "stake",
        "entry_time",
        "entry_price",
        "expiry_time",
        "exit_price",
        "outcome",
        "pnl",
        "regime",
        "setup",
    ])?;
    for t in trades {
        wtr.write_record([
            t.id.to_string(),
            t.asset.clone(),
            t.direction.to_string(),
            format!("{:.2}", t.stake),
            t.entry_time.to_rfc3339(),
            format!("{:.6}", t.entry_price),
            t.expiry_time.to_rfc3339(),
            opt(t.exit_price, 6),
            t.outcome.to_string(),
            format!("{:.2}", t.pnl()),
            t.regime.to_string(),
            t.setup.map(|s| s.to_string()).unwrap_or_default(),
        ])?;
    }
    finish(wtr)
}

/// One row per fast candle close.
pub fn export_decisions_csv<'a>(
    decisions: impl IntoIterator<Item = &'a DecisionSnapshot>,
) -> Result<String, ExportError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "timestamp",
        "asset",
        "close",
        "rsi",
        "adx",
        "bb_width",
        "zone_status",
        "state",
        "action",
        "regime",
        "reason",
    ])?;
    for d in decisions {
        wtr.write_record([
            d.timestamp.to_rfc3339(),
            d.asset.clone(),
            format!("{:.6}", d.close),
            opt(d.rsi, 4),
            opt(d.adx, 4),
            opt(d.bb_width, 8),
            d.zone_status.to_string(),
            d.state.to_string(),
            d.action.to_string(),
            d.regime.to_string(),
            d.reason.to_string(),
        ])?;
    }
    finish(wtr)
}

/// Candle tape for `generate`: start time plus OHLC.
pub fn export_candles_csv(series: &CandleSeries) -> Result<String, ExportError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["start_time", "asset", "open", "high", "low", "close"])?;
    for c in series.iter() {
        wtr.write_record([
            c.start_time.to_rfc3339(),
            series.asset().to_string(),
            format!("{:.6}", c.open),
            format!("{:.6}", c.high),
            format!("{:.6}", c.low),
            format!("{:.6}", c.close),
        ])?;
    }
    finish(wtr)
}

// ─── Candle import ──────────────────────────────────────────────────

/// One row of a candle tape. `timestamp` is accepted for `start_time`, and
/// `asset` may be left out of single-asset files. Extra columns are ignored.
#[derive(Debug, Deserialize)]
struct CandleRow {
    #[serde(alias = "timestamp")]
    start_time: DateTime<Utc>,
    #[serde(default)]
    asset: Option<String>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

/// Parse one-minute candles, one series per asset in first-seen order.
///
/// Rows of an asset must be in start-time order. Each series is rebuilt
/// through [`CandleSeries::from_candles`], so duplicates and reordering are
/// rejected rather than silently fixed.
pub fn import_candles_csv(
    csv_text: &str,
    default_asset: &str,
) -> Result<Vec<CandleSeries>, ExportError> {
    let resolution = Resolution::OneMinute;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    let headers = rdr.headers()?.clone();
    let mut record = csv::StringRecord::new();
    let mut grouped: Vec<(String, Vec<Candle>)> = Vec::new();
    while rdr.read_record(&mut record)? {
        let row: CandleRow = record.deserialize(Some(&headers))?;
        let line = record.position().map_or(0, |p| p.line());
        if resolution.bucket_start(row.start_time) != row.start_time {
            return Err(ExportError::Candle {
                line,
                reason: format!("{} is not on a minute boundary", row.start_time),
            });
        }
        let candle = Candle::new(row.start_time, resolution, row.open, row.high, row.low, row.close);
        if !candle.is_sane() {
            return Err(ExportError::Candle {
                line,
                reason: "inconsistent OHLC".to_string(),
            });
        }
        let asset = row
            .asset
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| default_asset.to_string());
        match grouped.iter_mut().find(|(name, _)| *name == asset) {
            Some((_, candles)) => candles.push(candle),
            None => grouped.push((asset, vec![candle])),
        }
    }

    grouped
        .into_iter()
        .map(|(asset, candles)| {
            CandleSeries::from_candles(asset.clone(), resolution, candles)
                .map_err(|source| ExportError::Series { asset, source })
        })
        .collect()
}

/// Read a candle tape from disk. The file stem names the asset when the
/// tape has no `asset` column.
pub fn load_candles_csv(path: &Path) -> Result<Vec<CandleSeries>, ExportError> {
    let text = std::fs::read_to_string(path).map_err(io_err(path))?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("ASSET")
        .to_uppercase();
    import_candles_csv(&text, &stem)
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write the full artifact set and return the run directory.
pub fn save_artifacts(backtest: &Backtest, output_dir: &Path) -> Result<PathBuf, ExportError> {
    let run_dir = output_dir.join(backtest.report.run_hash.short());
    std::fs::create_dir_all(&run_dir).map_err(io_err(&run_dir))?;

    let report_path = run_dir.join("report.json");
    std::fs::write(&report_path, export_json(&backtest.report)?).map_err(io_err(&report_path))?;

    let trades_path = run_dir.join("trades.csv");
    let trades = export_trades_csv(backtest.runs.iter().flat_map(|r| r.trades.iter()))?;
    std::fs::write(&trades_path, trades).map_err(io_err(&trades_path))?;

    let decisions_path = run_dir.join("decisions.csv");
    let decisions = export_decisions_csv(backtest.runs.iter().flat_map(|r| r.decisions.iter()))?;
    std::fs::write(&decisions_path, decisions).map_err(io_err(&decisions_path))?;

    Ok(run_dir)
}

/// Load the report from a run directory.
pub fn load_report(dir: &Path) -> Result<BacktestReport, ExportError> {
    let path = dir.join("report.json");
    let json = std::fs::read_to_string(&path).map_err(io_err(&path))?;
    import_json(&json)
}
