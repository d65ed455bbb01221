use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};

use kickoff_edge::artifacts::{TrainedArtifacts, load_artifacts, save_artifacts};
use kickoff_edge::config::{EngineConfig, load_dotenv};
use kickoff_edge::elo::{RatingBook, replay_history};
use kickoff_edge::logging::init_logging;
use kickoff_edge::predict::Predictor;
use kickoff_edge::records::{AuxSignals, MatchRecord, UpcomingFixture};
use kickoff_edge::staking::{StakeCandidate, VetoSet, size_stakes};
use kickoff_edge::store::{self, TrainingRun};
use kickoff_edge::tables;
use kickoff_edge::training::train;

#[derive(Parser, Debug)]
#[command(name = "kickoff_edge", about = "Match probability fusion, calibration and staking")]
struct Cli {
    /// TOML config; falls back to KICKOFF_CONFIG, then built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit blend weights and calibrators from history.
    Train {
        #[command(flatten)]
        source: HistorySource,
        #[arg(long)]
        artifacts: PathBuf,
    },
    /// Score upcoming fixtures with saved artifacts.
    Predict {
        #[command(flatten)]
        source: HistorySource,
        #[arg(long)]
        artifacts: PathBuf,
        #[arg(long)]
        fixtures: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Size stakes for a predictions table.
    Stake {
        #[arg(long)]
        predictions: PathBuf,
        /// Fixtures table carrying auxiliary signals.
        #[arg(long)]
        fixtures: Option<PathBuf>,
        #[arg(long)]
        vetoes: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Train, predict and stake in one pass.
    Run {
        #[command(flatten)]
        source: HistorySource,
        #[arg(long)]
        artifacts: PathBuf,
        #[arg(long)]
        fixtures: PathBuf,
        #[arg(long)]
        vetoes: Option<PathBuf>,
        #[arg(long)]
        predictions_out: PathBuf,
        #[arg(long)]
        stakes_out: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
struct HistorySource {
    /// Historical results CSV. Takes precedence over --db.
    #[arg(long)]
    history: Option<PathBuf>,
    /// SQLite store written by hist_ingest.
    #[arg(long, env = "KICKOFF_DB")]
    db: Option<PathBuf>,
}

impl HistorySource {
    fn load(&self) -> Result<Vec<MatchRecord>> {
        match (&self.history, &self.db) {
            (Some(path), _) => tables::read_history(path)
                .with_context(|| format!("read history {}", path.display())),
            (None, Some(db)) => {
                let conn = store::open_db(db)
                    .with_context(|| format!("open sqlite db {}", db.display()))?;
                store::load_history(&conn).context("load history from sqlite")
            }
            (None, None) => Err(anyhow!("either --history or --db is required")),
        }
    }
}

fn main() -> Result<()> {
    load_dotenv();
    init_logging();

    let cli = Cli::parse();
    let cfg = EngineConfig::load(cli.config.as_deref()).context("load config")?;

    match cli.command {
        Command::Train { source, artifacts } => {
            let history = source.load()?;
            run_train(&history, &source, &artifacts, &cfg)?;
        }
        Command::Predict {
            source,
            artifacts,
            fixtures,
            out,
        } => {
            let history = source.load()?;
            let trained = load_artifacts(&artifacts)
                .with_context(|| format!("load artifacts {}", artifacts.display()))?;
            if let Some(db) = &source.db {
                warn_if_not_latest_run(db, &trained)?;
            }
            run_predict(&history, &trained, &fixtures, &out, &cfg)?;
        }
        Command::Stake {
            predictions,
            fixtures,
            vetoes,
            out,
        } => {
            run_stake(&predictions, fixtures.as_deref(), vetoes.as_deref(), &out, &cfg)?;
        }
        Command::Run {
            source,
            artifacts,
            fixtures,
            vetoes,
            predictions_out,
            stakes_out,
        } => {
            let history = source.load()?;
            let trained = run_train(&history, &source, &artifacts, &cfg)?;
            run_predict(&history, &trained, &fixtures, &predictions_out, &cfg)?;
            run_stake(
                &predictions_out,
                Some(&fixtures),
                vetoes.as_deref(),
                &stakes_out,
                &cfg,
            )?;
        }
    }
    Ok(())
}

fn run_train(
    history: &[MatchRecord],
    source: &HistorySource,
    path: &Path,
    cfg: &EngineConfig,
) -> Result<TrainedArtifacts> {
    let model = train(history, cfg);
    let artifacts = TrainedArtifacts::from_model(history, &model);
    save_artifacts(path, &artifacts)
        .with_context(|| format!("write artifacts {}", path.display()))?;

    if let Some(db) = &source.db {
        let conn = store::open_db(db).with_context(|| format!("open sqlite db {}", db.display()))?;
        store::record_training_run(&conn, &TrainingRun::from(&artifacts))
            .context("record training run")?;
    }

    println!(
        "trained on {} rows ({} resolved, {} priced); global weight {:.2}, {} league overrides, {} model-only",
        artifacts.rows_total,
        artifacts.rows_resolved,
        artifacts.rows_with_market,
        artifacts.blend.global,
        artifacts.blend.leagues.len(),
        artifacts.blend.model_only.len(),
    );
    println!("artifacts: {}", path.display());
    Ok(artifacts)
}

fn warn_if_not_latest_run(db: &Path, trained: &TrainedArtifacts) -> Result<()> {
    let conn = store::open_db(db).with_context(|| format!("open sqlite db {}", db.display()))?;
    match store::latest_training_fingerprint(&conn).context("read latest training run")? {
        Some(latest) if latest != trained.fingerprint => {
            tracing::warn!(%latest, artifacts = %trained.fingerprint, "artifacts are not from the latest recorded training run");
        }
        Some(_) => {}
        None => tracing::debug!("no training runs recorded in the store"),
    }
    Ok(())
}

fn rating_book(history: &[MatchRecord], cfg: &EngineConfig) -> RatingBook {
    replay_history(history, RatingBook::new(cfg.elo.initial_rating), &cfg.elo).book
}

fn run_predict(
    history: &[MatchRecord],
    trained: &TrainedArtifacts,
    fixtures_path: &Path,
    out: &Path,
    cfg: &EngineConfig,
) -> Result<()> {
    if !trained.matches_history(history) {
        tracing::warn!("artifacts were trained on a different history; retrain to refresh them");
    }
    let book = rating_book(history, cfg);
    if book.is_empty() {
        tracing::warn!("history has no resolved matches; every team sits at the initial rating");
    }
    let fixtures = tables::read_fixtures(fixtures_path)
        .with_context(|| format!("read fixtures {}", fixtures_path.display()))?;

    let predictor = Predictor::new(&book, &trained.blend, &trained.calibrators, cfg);
    let predictions = predictor.predict_all(&fixtures);
    tables::write_predictions(out, &predictions)
        .with_context(|| format!("write predictions {}", out.display()))?;
    println!("{} predictions -> {}", predictions.len(), out.display());
    Ok(())
}

fn run_stake(
    predictions_path: &Path,
    fixtures_path: Option<&Path>,
    vetoes_path: Option<&Path>,
    out: &Path,
    cfg: &EngineConfig,
) -> Result<()> {
    let predictions = tables::read_predictions(predictions_path)
        .with_context(|| format!("read predictions {}", predictions_path.display()))?;

    let mut aux_by_fixture: HashMap<String, AuxSignals> = HashMap::new();
    if let Some(path) = fixtures_path {
        let fixtures: Vec<UpcomingFixture> = tables::read_fixtures(path)
            .with_context(|| format!("read fixtures {}", path.display()))?;
        for f in fixtures {
            aux_by_fixture.insert(f.fixture_id, f.aux);
        }
    }

    let vetoes = match vetoes_path {
        Some(path) => tables::read_vetoes(path)
            .with_context(|| format!("read vetoes {}", path.display()))?,
        None => VetoSet::new(),
    };

    let candidates: Vec<StakeCandidate> = predictions
        .into_iter()
        .map(|row| {
            let aux = aux_by_fixture.remove(&row.fixture_id).unwrap_or_default();
            row.into_candidate(aux)
        })
        .collect();

    let decisions = size_stakes(&candidates, &vetoes, &cfg.staking, &cfg.signals);
    tables::write_stakes(out, &decisions)
        .with_context(|| format!("write stakes {}", out.display()))?;

    let bets = decisions.iter().filter(|d| d.is_bet()).count();
    let exposure: f64 = decisions.iter().map(|d| d.final_stake).sum();
    println!(
        "{} decisions, {} bets, total exposure {:.4} -> {}",
        decisions.len(),
        bets,
        exposure,
        out.display()
    );
    Ok(())
}
