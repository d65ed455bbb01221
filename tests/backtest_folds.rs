use chrono::Days;

use kickoff_edge::backtest::{Variant, run_backtest};
use kickoff_edge::config::EngineConfig;
use kickoff_edge::records::{MatchRecord, Odds};
use kickoff_edge::synthetic::{SyntheticLeague, generate_history};
use kickoff_edge::tables::write_backtest;

fn history() -> Vec<MatchRecord> {
    generate_history(
        &[
            SyntheticLeague::new("Alpha", 10, 2),
            SyntheticLeague::new("Beta", 8, 2).with_odds_coverage(0.0),
        ],
        17,
    )
}

#[test]
fn validation_rows_never_precede_their_training_cut() {
    let history = history();
    let report = run_backtest(&history, &EngineConfig::default());

    assert_eq!(report.folds.iter().filter(|f| f.league == "Alpha").count(), 3);
    assert_eq!(report.folds.iter().filter(|f| f.league == "Beta").count(), 3);
    assert!(!report.rows.is_empty());
    for row in &report.rows {
        let fold = report
            .folds
            .iter()
            .find(|f| f.league == row.league && f.index == row.fold)
            .expect("fold exists");
        assert!(row.date > fold.train_end);
        assert!(row.date <= fold.valid_end);
    }
}

#[test]
fn repeated_runs_agree() {
    let history = history();
    let cfg = EngineConfig::default();
    let a = run_backtest(&history, &cfg);
    let b = run_backtest(&history, &cfg);
    assert_eq!(a.folds, b.folds);
    assert_eq!(a.summary, b.summary);
    assert_eq!(a.slices, b.slices);
    assert_eq!(a.roi, b.roi);
}

#[test]
fn unpriced_league_scores_model_but_not_market() {
    let report = run_backtest(&history(), &EngineConfig::default());
    let find = |variant: Variant, league: &str| {
        report
            .summary
            .iter()
            .find(|r| r.variant == variant && r.league == league)
            .expect("summary row")
    };

    let market = find(Variant::Market, "Beta");
    assert_eq!(market.n, 0);
    assert_eq!(market.log_loss, None);

    let model = find(Variant::Model, "Beta");
    assert!(model.n > 0);
    assert!(model.log_loss.is_some());
    let calibrated = find(Variant::Calibrated, "Beta");
    assert_eq!(calibrated.log_loss, model.log_loss);

    let pooled = find(Variant::Model, "ALL");
    assert_eq!(pooled.folds, report.folds.len());
    assert_eq!(pooled.n, report.rows.len());
    assert!(report.roi.iter().all(|r| r.league != "Beta"));
}

#[test]
fn unresolved_fixtures_do_not_change_the_report() {
    let history = history();
    let cfg = EngineConfig::default();
    let base = run_backtest(&history, &cfg);

    let mut extended = history.clone();
    let last = extended.last().cloned().expect("rows");
    for i in 0..4 {
        let mut future = last.clone();
        future.row = extended.len();
        future.date = last.date.checked_add_days(Days::new(7 + i)).expect("date");
        future.result = None;
        future.odds = Odds::new(2.1, 3.3, 3.6);
        extended.push(future);
    }
    let with_future = run_backtest(&extended, &cfg);
    assert_eq!(base.folds, with_future.folds);
    assert_eq!(base.summary, with_future.summary);
}

#[test]
fn report_tables_are_written() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("bt");
    let report = run_backtest(&history(), &EngineConfig::default());
    write_backtest(&out, &report).expect("write");

    for name in ["slices.csv", "summary.csv", "roi_by_slice.csv", "vetoes.csv"] {
        assert!(out.join(name).exists(), "{name} missing");
    }
    let summary = std::fs::read_to_string(out.join("summary.csv")).expect("read");
    assert!(summary.starts_with("variant,league,folds,n,log_loss,brier,ece,accuracy"));
    assert!(summary.lines().any(|l| l.starts_with("calibrated,ALL,")));
    let vetoes = std::fs::read_to_string(out.join("vetoes.csv")).expect("read");
    assert!(vetoes.starts_with("league,odds_bucket,n_bets,roi,veto"));
}
