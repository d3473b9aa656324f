//! Reporting and export — JSON, CSV and Markdown artifact generation.
//!
//! - **JSON**: full round-trip serialization with schema versioning
//! - **CSV**: trade tape and equity curve for external analysis tools
//! - **Markdown**: a per-run report and a multi-run summary table
//!
//! Persisted results carry `schema_version`; newer versions are rejected on
//! load.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::backtest::{BacktestResult, BacktestTrade, EquityPoint, SCHEMA_VERSION};
use crate::data_loader::series_file_name;

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult to JSON")
}

/// Deserialize a `BacktestResult`, rejecting schema versions newer than this
/// build understands.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Trade tape. One row per closed trade.
pub fn export_trades_csv(trades: &[BacktestTrade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "signal_id",
        "side",
        "entry_time",
        "entry_price",
        "entry_fill",
        "stop_loss",
        "take_profit",
        "exit_time",
        "exit_price",
        "exit_fill",
        "exit_reason",
        "position_size",
        "risk_amount",
        "commission",
        "r_multiple",
        "pnl",
        "pnl_percentage",
    ])?;
    for t in trades {
        wtr.write_record([
            t.signal_id.to_string(),
            t.side.to_string(),
            t.entry_time.to_rfc3339(),
            format!("{:.8}", t.entry_price),
            format!("{:.8}", t.entry_fill),
            format!("{:.8}", t.stop_loss),
            format!("{:.8}", t.take_profit),
            t.exit_time.to_rfc3339(),
            format!("{:.8}", t.exit_price),
            format!("{:.8}", t.exit_fill),
            t.exit_reason.to_string(),
            format!("{:.8}", t.position_size),
            format!("{:.2}", t.risk_amount),
            format!("{:.2}", t.commission),
            format!("{:.4}", t.r_multiple),
            format!("{:.2}", t.pnl),
            format!("{:.4}", t.pnl_percentage),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Equity after each trade close.
pub fn export_equity_csv(equity_curve: &[EquityPoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "equity"])?;
    for point in equity_curve {
        wtr.write_record([point.at.to_rfc3339(), format!("{:.2}", point.equity)])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Directory name for a run: series file stem plus the short config hash.
pub fn artifact_dir_name(result: &BacktestResult) -> String {
    let stem = series_file_name(&result.instrument, result.timeframe);
    let stem = stem.trim_end_matches(".csv");
    format!("{stem}_{}", result.config_hash.short())
}

/// Save the artifact set for one run under `output_dir`:
/// - `result.json` — the full `BacktestResult`
/// - `trades.csv` — trade tape
/// - `equity.csv` — equity after each close
/// - `report.md` — human-readable report
///
/// Returns the run directory.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<PathBuf> {
    let run_dir = output_dir.join(artifact_dir_name(result));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("result.json"), export_json(result)?)?;
    std::fs::write(run_dir.join("trades.csv"), export_trades_csv(&result.trades)?)?;
    std::fs::write(
        run_dir.join("equity.csv"),
        export_equity_csv(&result.equity_curve)?,
    )?;
    std::fs::write(run_dir.join("report.md"), generate_report(result))?;

    Ok(run_dir)
}

/// Load a `BacktestResult` from an artifact directory.
pub fn load_artifacts(dir: &Path) -> Result<BacktestResult> {
    let path = dir.join("result.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}

// ─── Markdown reports ───────────────────────────────────────────────

pub fn generate_report(result: &BacktestResult) -> String {
    let s = &result.stats;
    let mut md = String::with_capacity(1024);

    let _ = writeln!(md, "# Backtest: {} {}", result.instrument, result.timeframe);
    let _ = writeln!(md);
    let _ = writeln!(md, "- Config hash: `{}`", result.config_hash.short());
    let _ = writeln!(
        md,
        "- Candles: {} of {}{}",
        result.processed_candles,
        result.candle_count,
        if result.partial { " (partial)" } else { "" }
    );
    let _ = writeln!(md, "- Signals: {}", result.signal_count);
    let _ = writeln!(md, "- Data issues: {}", result.issues.len());
    let _ = writeln!(md);
    let _ = writeln!(md, "| Metric | Value |");
    let _ = writeln!(md, "| --- | --- |");
    let _ = writeln!(md, "| Trades | {} |", s.trade_count);
    let _ = writeln!(md, "| Win rate | {} |", fmt_pct(s.win_rate));
    let _ = writeln!(md, "| Profit factor | {} |", fmt_ratio(s.profit_factor));
    let _ = writeln!(md, "| Max drawdown | {} |", fmt_pct(s.max_drawdown));
    let _ = writeln!(md, "| Total return | {} |", fmt_pct(s.total_return));
    let _ = writeln!(md, "| Average R | {} |", fmt_ratio(s.average_r));
    let _ = writeln!(md, "| Max consecutive losses | {} |", s.max_consecutive_losses);
    let _ = writeln!(md, "| Final equity | {:.2} |", s.final_equity);
    if !result.open_trades.is_empty() {
        let _ = writeln!(md);
        let _ = writeln!(md, "{} trade(s) still open at end of data.", result.open_trades.len());
    }
    md
}

/// One row per run, sorted as given.
pub fn summary_table(results: &[BacktestResult]) -> String {
    let mut md = String::new();
    let _ = writeln!(
        md,
        "| Series | Trades | Win rate | Profit factor | Max DD | Return |"
    );
    let _ = writeln!(md, "| --- | --- | --- | --- | --- | --- |");
    for r in results {
        let s = &r.stats;
        let _ = writeln!(
            md,
            "| {} {}{} | {} | {} | {} | {} | {} |",
            r.instrument,
            r.timeframe,
            if r.partial { " *" } else { "" },
            s.trade_count,
            fmt_pct(s.win_rate),
            fmt_ratio(s.profit_factor),
            fmt_pct(s.max_drawdown),
            fmt_pct(s.total_return),
        );
    }
    md
}

// ─── Helpers ────────────────────────────────────────────────────────

fn fmt_pct(v: f64) -> String {
    if v.is_nan() {
        "n/a".into()
    } else {
        format!("{:.2}%", v * 100.0)
    }
}

fn fmt_ratio(v: f64) -> String {
    if v.is_nan() {
        "n/a".into()
    } else if v.is_infinite() {
        "inf".into()
    } else {
        format!("{v:.2}")
    }
}
