use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use kickoff_edge::backtest::{VetoStatus, run_backtest};
use kickoff_edge::config::{EngineConfig, load_dotenv};
use kickoff_edge::logging::init_logging;
use kickoff_edge::store;
use kickoff_edge::tables;

/// Rolling-origin backtest over a history table.
#[derive(Parser, Debug)]
#[command(name = "backtest")]
struct Cli {
    #[arg(long)]
    history: Option<PathBuf>,
    #[arg(long, env = "KICKOFF_DB")]
    db: Option<PathBuf>,
    /// Output directory for slices, summary, ROI and veto tables.
    #[arg(long, default_value = "backtest_out")]
    out: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the configured number of folds per league.
    #[arg(long)]
    folds: Option<usize>,
}

fn main() -> Result<()> {
    load_dotenv();
    init_logging();
    let cli = Cli::parse();

    let mut cfg = EngineConfig::load(cli.config.as_deref()).context("load config")?;
    if let Some(folds) = cli.folds {
        cfg.backtest.folds = folds;
    }

    let history = match (&cli.history, &cli.db) {
        (Some(path), _) => tables::read_history(path)
            .with_context(|| format!("read history {}", path.display()))?,
        (None, Some(db)) => {
            let conn =
                store::open_db(db).with_context(|| format!("open sqlite db {}", db.display()))?;
            store::load_history(&conn).context("load history from sqlite")?
        }
        (None, None) => anyhow::bail!("either --history or --db is required"),
    };

    let report = run_backtest(&history, &cfg);
    tables::write_backtest(&cli.out, &report)
        .with_context(|| format!("write backtest tables to {}", cli.out.display()))?;

    println!("Backtest complete");
    println!("Folds: {}", report.folds.len());
    println!("Evaluated rows: {}", report.rows.len());
    for row in report.summary.iter().filter(|r| r.league == "ALL") {
        println!(
            "{:<10} n={:<6} logloss={} brier={} ece={}",
            row.variant.as_str(),
            row.n,
            fmt_opt(row.log_loss),
            fmt_opt(row.brier),
            fmt_opt(row.ece),
        );
    }
    let vetoed: Vec<String> = report
        .vetoes
        .iter()
        .filter(|v| v.status == VetoStatus::Veto)
        .map(|v| format!("{} {}", v.league, v.odds_bucket))
        .collect();
    println!("Vetoed slices: {}", vetoed.len());
    for slice in vetoed {
        println!("  {slice}");
    }
    if report.rows.is_empty() {
        println!("No folds could be planned; history is too short");
    }
    println!("Tables: {}", cli.out.display());
    Ok(())
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.4}")).unwrap_or_else(|| "NA".to_string())
}
