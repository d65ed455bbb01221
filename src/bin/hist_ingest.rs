use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;

use kickoff_edge::config::load_dotenv;
use kickoff_edge::logging::init_logging;
use kickoff_edge::store;
use kickoff_edge::tables;

/// Loads historical results CSVs into the SQLite history store.
#[derive(Parser, Debug)]
#[command(name = "hist_ingest")]
struct Cli {
    /// One or more history CSVs, ingested in the order given.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    #[arg(long, env = "KICKOFF_DB")]
    db: Option<PathBuf>,
}

fn main() -> Result<()> {
    load_dotenv();
    init_logging();
    let cli = Cli::parse();

    let db_path = cli
        .db
        .clone()
        .ok_or_else(|| anyhow!("no sqlite path; pass --db or set KICKOFF_DB"))?;
    let mut conn =
        store::open_db(&db_path).with_context(|| format!("open sqlite db {}", db_path.display()))?;

    let mut inserted = 0usize;
    let mut updated = 0usize;
    let mut per_league: BTreeMap<String, usize> = BTreeMap::new();
    for input in &cli.inputs {
        let rows = tables::read_history(input)
            .with_context(|| format!("read history {}", input.display()))?;
        for m in &rows {
            *per_league.entry(m.league.clone()).or_default() += 1;
        }
        let summary = store::upsert_matches(&mut conn, &rows)
            .with_context(|| format!("upsert {}", input.display()))?;
        inserted += summary.inserted;
        updated += summary.updated;
    }
    let total = store::count_matches(&conn).context("count stored matches")?;

    println!("Historical ingest complete");
    println!("DB: {}", db_path.display());
    println!("Files: {}", cli.inputs.len());
    println!("Inserted: {inserted}  Updated: {updated}  Stored: {total}");
    for (league, n) in &per_league {
        println!("league {league}: rows={n}");
    }
    Ok(())
}
