//! Artifact round trips through a temporary run directory.

use tempfile::TempDir;

use zonebreak_core::synthetic::{generate, MarketGenerator, MarketMode};
use zonebreak_runner::config::BacktestConfig;
use zonebreak_runner::export::{export_candles_csv, export_json, import_candles_csv, import_json};
use zonebreak_runner::{
    load_candles_csv, load_report, run_backtest, run_history, save_artifacts, ExportError,
    SCHEMA_VERSION,
};

fn small_config() -> BacktestConfig {
    BacktestConfig::from_toml(
        r#"
        [backtest]
        seed = 3
        candles = 1500
        assets = ["EURUSD", "GBPUSD"]
        "#,
    )
    .unwrap()
}

#[test]
fn artifacts_are_written_under_run_hash() {
    let dir = TempDir::new().unwrap();
    let bt = run_backtest(&small_config()).unwrap();
    let run_dir = save_artifacts(&bt, dir.path()).unwrap();

    assert!(run_dir.ends_with(bt.report.run_hash.short()));
    for name in ["report.json", "trades.csv", "decisions.csv"] {
        assert!(run_dir.join(name).is_file(), "{name} missing");
    }

    let decisions = std::fs::read_to_string(run_dir.join("decisions.csv")).unwrap();
    assert_eq!(decisions.lines().count(), 1 + 3000);
    let trades = std::fs::read_to_string(run_dir.join("trades.csv")).unwrap();
    assert_eq!(trades.lines().count(), 1 + bt.report.total_trades);
}

#[test]
fn saved_report_loads_back_identically() {
    let dir = TempDir::new().unwrap();
    let bt = run_backtest(&small_config()).unwrap();
    let run_dir = save_artifacts(&bt, dir.path()).unwrap();
    let loaded = load_report(&run_dir).unwrap();
    assert_eq!(loaded.run_hash, bt.report.run_hash);
    assert_eq!(loaded.assets.len(), 2);
    assert_eq!(loaded.total_trades, bt.report.total_trades);
    assert_eq!(loaded.schema_version, SCHEMA_VERSION);
}

#[test]
fn rerun_overwrites_same_directory() {
    let dir = TempDir::new().unwrap();
    let config = small_config();
    let first = save_artifacts(&run_backtest(&config).unwrap(), dir.path()).unwrap();
    let second = save_artifacts(&run_backtest(&config).unwrap(), dir.path()).unwrap();
    assert_eq!(first, second);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn missing_schema_version_defaults_to_current() {
    let bt = run_backtest(&small_config()).unwrap();
    let json = export_json(&bt.report).unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
    value.as_object_mut().unwrap().remove("schema_version");
    let report = import_json(&value.to_string()).unwrap();
    assert_eq!(report.schema_version, SCHEMA_VERSION);
}

#[test]
fn load_from_missing_dir_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = load_report(&dir.path().join("nope")).unwrap_err();
    assert!(err.to_string().contains("report.json"));
}

// ─── Candle tapes ───────────────────────────────────────────────────

#[test]
fn exported_candles_load_back_and_backtest() {
    let dir = TempDir::new().unwrap();
    let generator = MarketGenerator::default();
    let eur = generator.generate("EURUSD", 11, 900, MarketMode::Zigzag).series;
    let gbp = generator.generate("GBPUSD", 12, 600, MarketMode::Default).series;

    // Same layout `generate` writes for several assets: one header.
    let mut tape = export_candles_csv(&eur).unwrap();
    let second = export_candles_csv(&gbp).unwrap();
    tape.push_str(second.split_once('\n').unwrap().1);
    let path = dir.path().join("candles.csv");
    std::fs::write(&path, tape).unwrap();

    let loaded = load_candles_csv(&path).unwrap();
    assert_eq!(loaded.len(), 2);
    for (original, back) in [&eur, &gbp].into_iter().zip(&loaded) {
        assert_eq!(back.asset(), original.asset());
        assert_eq!(back.len(), original.len());
        for (a, b) in original.iter().zip(back.iter()) {
            assert_eq!(a.start_time, b.start_time);
            assert!((a.close - b.close).abs() < 1e-6);
            assert!((a.high - b.high).abs() < 1e-6);
        }
    }

    let bt = run_history(&loaded, &small_config()).unwrap();
    assert_eq!(bt.report.assets.len(), 2);
    assert_eq!(bt.report.total_candles, 1500);
    assert!(bt.report.classifier_accuracy.is_none());
    assert_eq!(bt.report.accuracy_passed, None);
    assert_eq!(bt.runs[0].decisions.len(), 900);

    let again = run_history(&loaded, &small_config()).unwrap();
    assert_eq!(again.report.run_hash, bt.report.run_hash);
}

#[test]
fn candle_tape_named_after_file_stem() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("usdjpy.csv");
    std::fs::write(
        &path,
        "timestamp,open,high,low,close\n2024-03-01T10:00:00Z,150.1,150.3,150.0,150.2\n",
    )
    .unwrap();
    let loaded = load_candles_csv(&path).unwrap();
    assert_eq!(loaded[0].asset(), "USDJPY");
}

#[test]
fn duplicated_candle_is_rejected() {
    let eur = generate(4, 10, MarketMode::Default).series;
    let tape = export_candles_csv(&eur).unwrap();
    let last_row = tape.lines().last().unwrap().to_string();
    let doubled = format!("{tape}{last_row}\n");
    assert!(matches!(
        import_candles_csv(&doubled, "X"),
        Err(ExportError::Series { .. })
    ));
}
