use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::blend::{BlendSample, blend};
use crate::config::EngineConfig;
use crate::market::odds_bucket;
use crate::metrics::{ece_1x2, evaluate_probs};
use crate::prob::{Outcome, Prob3};
use crate::records::{MatchRecord, Odds};
use crate::staking::kelly_fraction;
use crate::training::{build_frame, fit_from_samples};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Validation windows per league when no explicit cut dates are given.
    pub folds: usize,
    /// Share of a league's dates reserved for the first training window.
    pub min_train_fraction: f64,
    /// Explicit fold boundaries; consecutive pairs become
    /// `(train_end, valid_end]`. Overrides `folds` when non-empty.
    pub cuts: Vec<NaiveDate>,
    pub ece_bins: usize,
    /// Slices below this many rows report `n` only.
    pub min_slice_rows: usize,
    pub roi_kelly_cap: f64,
    pub veto_min_bets: usize,
    pub veto_roi_threshold: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            folds: 3,
            min_train_fraction: 0.5,
            cuts: Vec::new(),
            ece_bins: 10,
            min_slice_rows: 30,
            roi_kelly_cap: 0.05,
            veto_min_bets: 30,
            veto_roi_threshold: -0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Market,
    Model,
    Blended,
    Calibrated,
}

impl Variant {
    pub const ALL: [Variant; 4] = [
        Variant::Market,
        Variant::Model,
        Variant::Blended,
        Variant::Calibrated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Market => "market",
            Variant::Model => "model",
            Variant::Blended => "blended",
            Variant::Calibrated => "calibrated",
        }
    }

    fn index(self) -> usize {
        match self {
            Variant::Market => 0,
            Variant::Model => 1,
            Variant::Blended => 2,
            Variant::Calibrated => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fold {
    pub league: String,
    pub index: usize,
    pub train_end: NaiveDate,
    pub valid_end: NaiveDate,
}

/// Validation-window boundaries over one league's sorted dates.
pub fn plan_folds(league: &str, dates: &[NaiveDate], cfg: &BacktestConfig) -> Vec<Fold> {
    let mut uniq: Vec<NaiveDate> = dates.to_vec();
    uniq.sort();
    uniq.dedup();

    let bounds: Vec<(NaiveDate, NaiveDate)> = if !cfg.cuts.is_empty() {
        cfg.cuts.windows(2).map(|w| (w[0], w[1])).filter(|(a, b)| a < b).collect()
    } else {
        let n = uniq.len();
        if n < 2 || cfg.folds == 0 {
            return Vec::new();
        }
        let start = ((n as f64 * cfg.min_train_fraction.clamp(0.0, 1.0)).floor() as usize).clamp(1, n - 1);
        let remaining = n - start;
        let k = cfg.folds.min(remaining);
        (0..k)
            .map(|i| {
                let lo = start + i * remaining / k;
                let hi = start + (i + 1) * remaining / k;
                (uniq[lo - 1], uniq[hi - 1])
            })
            .collect()
    };

    bounds
        .into_iter()
        .enumerate()
        .map(|(index, (train_end, valid_end))| Fold {
            league: league.to_string(),
            index,
            train_end,
            valid_end,
        })
        .collect()
}

/// One validation row scored under every variant. Undefined variants hold
/// the NaN triple.
#[derive(Debug, Clone)]
pub struct EvalRow {
    pub league: String,
    pub fold: usize,
    pub date: NaiveDate,
    pub row: usize,
    pub outcome: Outcome,
    pub odds: Odds,
    pub preds: [Prob3; 4],
}

impl EvalRow {
    pub fn pred(&self, variant: Variant) -> Prob3 {
        self.preds[variant.index()]
    }

    pub fn week(&self) -> String {
        iso_week_label(self.date)
    }
}

pub fn iso_week_label(date: NaiveDate) -> String {
    let w = date.iso_week();
    format!("{}-W{:02}", w.year(), w.week())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SliceMetrics {
    pub variant: Variant,
    pub league: String,
    pub week: String,
    pub odds_bucket: String,
    pub n: usize,
    pub log_loss: Option<f64>,
    pub brier: Option<f64>,
    pub ece: Option<f64>,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub variant: Variant,
    pub league: String,
    pub folds: usize,
    pub n: usize,
    pub log_loss: Option<f64>,
    pub brier: Option<f64>,
    pub ece: Option<f64>,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoiSlice {
    pub league: String,
    pub odds_bucket: String,
    pub bets: usize,
    pub turnover: f64,
    pub pnl: f64,
    pub roi: Option<f64>,
    pub hit_rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VetoStatus {
    Veto,
    Keep,
    /// Too few bets to judge.
    NotAssessed,
}

impl VetoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VetoStatus::Veto => "Y",
            VetoStatus::Keep => "N",
            VetoStatus::NotAssessed => "NA",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VetoRow {
    pub league: String,
    pub odds_bucket: String,
    pub bets: usize,
    pub roi: Option<f64>,
    pub status: VetoStatus,
}

#[derive(Debug, Clone, Default)]
pub struct BacktestReport {
    pub folds: Vec<Fold>,
    pub rows: Vec<EvalRow>,
    pub slices: Vec<SliceMetrics>,
    pub summary: Vec<SummaryRow>,
    pub roi: Vec<RoiSlice>,
    pub vetoes: Vec<VetoRow>,
}

fn eval_fold(
    fold: &Fold,
    samples: &[BlendSample],
    odds_by_row: &BTreeMap<usize, Odds>,
    cfg: &EngineConfig,
) -> Vec<EvalRow> {
    let train: Vec<BlendSample> = samples
        .iter()
        .filter(|s| s.date <= fold.train_end)
        .cloned()
        .collect();
    let (weights, calibrators) = fit_from_samples(&train, cfg);

    samples
        .iter()
        .filter(|s| s.league == fold.league && s.date > fold.train_end && s.date <= fold.valid_end)
        .map(|s| {
            let (blended, calibrated) = if weights.is_model_only(&s.league) {
                (s.model, s.model)
            } else {
                let b = blend(weights.weight_for(&s.league), &s.market, &s.model);
                let c = calibrators.apply(&s.league, &b, cfg.calibration.prob_floor);
                (b, c)
            };
            EvalRow {
                league: s.league.clone(),
                fold: fold.index,
                date: s.date,
                row: s.row,
                outcome: s.outcome,
                odds: odds_by_row.get(&s.row).copied().unwrap_or_default(),
                preds: [s.market, s.model, blended, calibrated],
            }
        })
        .collect()
}

fn gated(value: f64, n: usize, min_rows: usize) -> Option<f64> {
    (n >= min_rows && value.is_finite()).then_some(value)
}

fn score(rows: &[&EvalRow], variant: Variant, bins: usize) -> (usize, f64, f64, f64, f64) {
    let mut preds = Vec::with_capacity(rows.len());
    let mut outcomes = Vec::with_capacity(rows.len());
    for r in rows {
        let p = r.pred(variant);
        if p.is_finite() {
            preds.push(p);
            outcomes.push(r.outcome);
        }
    }
    let m = evaluate_probs(&preds, &outcomes);
    let ece = ece_1x2(&preds, &outcomes, bins);
    (m.samples, m.log_loss, m.brier, ece, m.accuracy)
}

/// League x ISO week x home-price bucket, per variant.
pub fn slice_metrics(rows: &[EvalRow], cfg: &BacktestConfig) -> Vec<SliceMetrics> {
    let mut groups: BTreeMap<(String, String, &'static str), Vec<&EvalRow>> = BTreeMap::new();
    for r in rows {
        groups
            .entry((r.league.clone(), r.week(), odds_bucket(r.odds.home)))
            .or_default()
            .push(r);
    }

    let mut out = Vec::new();
    for variant in Variant::ALL {
        for ((league, week, bucket), group) in &groups {
            let (n, ll, brier, ece, acc) = score(group, variant, cfg.ece_bins);
            if n == 0 {
                continue;
            }
            out.push(SliceMetrics {
                variant,
                league: league.clone(),
                week: week.clone(),
                odds_bucket: bucket.to_string(),
                n,
                log_loss: gated(ll, n, cfg.min_slice_rows),
                brier: gated(brier, n, cfg.min_slice_rows),
                ece: gated(ece, n, cfg.min_slice_rows),
                accuracy: gated(acc, n, cfg.min_slice_rows),
            });
        }
    }
    out
}

/// Per league and pooled (`ALL`) metrics over every validation window.
pub fn summarize(rows: &[EvalRow], folds: &[Fold], cfg: &BacktestConfig) -> Vec<SummaryRow> {
    let mut by_league: BTreeMap<&str, Vec<&EvalRow>> = BTreeMap::new();
    for r in rows {
        by_league.entry(r.league.as_str()).or_default().push(r);
    }
    let all: Vec<&EvalRow> = rows.iter().collect();

    let mut out = Vec::new();
    for variant in Variant::ALL {
        let groups = by_league
            .iter()
            .map(|(league, group)| (league.to_string(), group.as_slice()))
            .chain(std::iter::once(("ALL".to_string(), all.as_slice())));
        for (league, group) in groups {
            let (n, ll, brier, ece, acc) = score(group, variant, cfg.ece_bins);
            let fold_count = if league == "ALL" {
                folds.len()
            } else {
                folds.iter().filter(|f| f.league == league).count()
            };
            out.push(SummaryRow {
                variant,
                league,
                folds: fold_count,
                n,
                log_loss: gated(ll, n, 1),
                brier: gated(brier, n, 1),
                ece: gated(ece, n, 1),
                accuracy: gated(acc, n, 1),
            });
        }
    }
    out
}

/// Backs the side where the calibrated probability most exceeds the market,
/// sized at capped Kelly, and books the result by league and price bucket.
pub fn roi_slices(rows: &[EvalRow], cfg: &BacktestConfig) -> Vec<RoiSlice> {
    #[derive(Default)]
    struct Acc {
        bets: usize,
        hits: usize,
        turnover: f64,
        pnl: f64,
    }
    let mut acc: BTreeMap<(String, &'static str), Acc> = BTreeMap::new();

    for r in rows {
        let market = r.pred(Variant::Market);
        let p = r.pred(Variant::Calibrated);
        if !market.is_finite() || !p.is_finite() {
            continue;
        }
        let edges = Prob3::new(p.home - market.home, p.draw - market.draw, p.away - market.away);
        let side = edges.argmax();
        if edges.get(side) <= 0.0 {
            continue;
        }
        let Some(price) = r.odds.price(side).filter(|o| o.is_finite() && *o > 1.0) else {
            continue;
        };
        let stake = kelly_fraction(p.get(side), price, cfg.roi_kelly_cap);
        if stake <= 0.0 {
            continue;
        }
        let won = r.outcome == side;
        let slot = acc
            .entry((r.league.clone(), odds_bucket(Some(price))))
            .or_default();
        slot.bets += 1;
        slot.turnover += stake;
        if won {
            slot.hits += 1;
            slot.pnl += (price - 1.0) * stake;
        } else {
            slot.pnl -= stake;
        }
    }

    acc.into_iter()
        .map(|((league, bucket), a)| {
            let enough = a.bets >= cfg.min_slice_rows && a.turnover > 0.0;
            RoiSlice {
                league,
                odds_bucket: bucket.to_string(),
                bets: a.bets,
                turnover: a.turnover,
                pnl: a.pnl,
                roi: enough.then(|| a.pnl / a.turnover),
                hit_rate: enough.then(|| a.hits as f64 / a.bets as f64),
            }
        })
        .collect()
}

pub fn vetoes_from_roi(roi: &[RoiSlice], cfg: &BacktestConfig) -> Vec<VetoRow> {
    roi.iter()
        .map(|s| {
            let status = match s.roi {
                Some(v) if s.bets >= cfg.veto_min_bets && v < cfg.veto_roi_threshold => VetoStatus::Veto,
                Some(_) if s.bets >= cfg.veto_min_bets => VetoStatus::Keep,
                _ => VetoStatus::NotAssessed,
            };
            VetoRow {
                league: s.league.clone(),
                odds_bucket: s.odds_bucket.clone(),
                bets: s.bets,
                roi: s.roi,
                status,
            }
        })
        .collect()
}

/// Rolling-origin replay over the whole history. Leagues are independent
/// and run in parallel; output order does not depend on scheduling.
pub fn run_backtest(history: &[MatchRecord], cfg: &EngineConfig) -> BacktestReport {
    let frame = build_frame(history, &cfg.elo);
    let odds_by_row: BTreeMap<usize, Odds> = history.iter().map(|m| (m.row, m.odds)).collect();

    let mut dates_by_league: BTreeMap<&str, Vec<NaiveDate>> = BTreeMap::new();
    for s in &frame.samples {
        dates_by_league.entry(s.league.as_str()).or_default().push(s.date);
    }
    let folds: Vec<Fold> = dates_by_league
        .iter()
        .flat_map(|(league, dates)| plan_folds(league, dates, &cfg.backtest))
        .collect();
    tracing::info!(
        leagues = dates_by_league.len(),
        folds = folds.len(),
        samples = frame.samples.len(),
        "backtest plan"
    );

    let mut rows: Vec<EvalRow> = folds
        .par_iter()
        .flat_map_iter(|fold| eval_fold(fold, &frame.samples, &odds_by_row, cfg))
        .collect();
    rows.sort_by(|a, b| {
        a.league
            .cmp(&b.league)
            .then(a.date.cmp(&b.date))
            .then(a.row.cmp(&b.row))
    });

    let slices = slice_metrics(&rows, &cfg.backtest);
    let summary = summarize(&rows, &folds, &cfg.backtest);
    let roi = roi_slices(&rows, &cfg.backtest);
    let vetoes = vetoes_from_roi(&roi, &cfg.backtest);
    let vetoed = vetoes.iter().filter(|v| v.status == VetoStatus::Veto).count();
    tracing::info!(
        rows = rows.len(),
        slices = slices.len(),
        roi_slices = roi.len(),
        vetoed,
        "backtest complete"
    );

    BacktestReport {
        folds,
        rows,
        slices,
        summary,
        roi,
        vetoes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).expect("valid date")
    }

    fn row(league: &str, day: u32, outcome: Outcome, pred: Prob3, odds: Odds) -> EvalRow {
        EvalRow {
            league: league.to_string(),
            fold: 0,
            date: d(day),
            row: day as usize,
            outcome,
            odds,
            preds: [pred; 4],
        }
    }

    #[test]
    fn folds_move_forward_without_overlap() {
        let dates: Vec<NaiveDate> = (1..=20).map(d).collect();
        let folds = plan_folds("L", &dates, &BacktestConfig::default());
        assert_eq!(folds.len(), 3);
        assert_eq!(folds[0].train_end, d(10));
        for pair in folds.windows(2) {
            assert_eq!(pair[0].valid_end, pair[1].train_end);
        }
        assert_eq!(folds.last().expect("folds").valid_end, d(20));
        assert!(folds.iter().all(|f| f.train_end < f.valid_end));
    }

    #[test]
    fn explicit_cuts_override_automatic_folds() {
        let cfg = BacktestConfig {
            cuts: vec![d(5), d(10), d(15)],
            ..BacktestConfig::default()
        };
        let folds = plan_folds("L", &[d(1), d(2)], &cfg);
        assert_eq!(folds.len(), 2);
        assert_eq!((folds[1].train_end, folds[1].valid_end), (d(10), d(15)));
    }

    #[test]
    fn single_date_league_has_no_folds() {
        assert!(plan_folds("L", &[d(1), d(1)], &BacktestConfig::default()).is_empty());
    }

    #[test]
    fn small_slices_withhold_rates() {
        let rows: Vec<EvalRow> = (1..=5)
            .map(|i| row("L", i, Outcome::Home, Prob3::new(0.5, 0.3, 0.2), Odds::new(2.0, 3.4, 4.0)))
            .collect();
        let slices = slice_metrics(&rows, &BacktestConfig::default());
        assert!(!slices.is_empty());
        for s in &slices {
            assert!(s.n < 30);
            assert!(s.log_loss.is_none() && s.brier.is_none() && s.ece.is_none());
        }
    }

    #[test]
    fn week_labels_use_iso_calendar() {
        assert_eq!(iso_week_label(NaiveDate::from_ymd_opt(2021, 1, 3).expect("valid date")), "2020-W53");
        assert_eq!(iso_week_label(d(4)), "2024-W10");
    }

    #[test]
    fn losing_slice_is_vetoed() {
        // Calibrated favours home far beyond the market; home never wins.
        let mut rows = Vec::new();
        for i in 0..40 {
            let mut r = row("L", 1 + (i % 28), Outcome::Away, Prob3::new(0.6, 0.2, 0.2), Odds::new(2.0, 3.5, 4.0));
            r.preds[Variant::Market.index()] = Prob3::new(0.45, 0.28, 0.27);
            rows.push(r);
        }
        let cfg = BacktestConfig::default();
        let roi = roi_slices(&rows, &cfg);
        assert_eq!(roi.len(), 1);
        assert_eq!(roi[0].bets, 40);
        assert!((roi[0].roi.expect("assessed") + 1.0).abs() < 1e-12);
        let vetoes = vetoes_from_roi(&roi, &cfg);
        assert_eq!(vetoes[0].status, VetoStatus::Veto);
        assert_eq!(vetoes[0].odds_bucket, "(1.8,2.2]");
    }

    #[test]
    fn thin_roi_slice_is_not_assessed() {
        let mut r = row("L", 1, Outcome::Home, Prob3::new(0.6, 0.2, 0.2), Odds::new(2.0, 3.5, 4.0));
        r.preds[Variant::Market.index()] = Prob3::new(0.45, 0.28, 0.27);
        let cfg = BacktestConfig::default();
        let roi = roi_slices(&[r], &cfg);
        assert_eq!(roi[0].roi, None);
        assert_eq!(vetoes_from_roi(&roi, &cfg)[0].status, VetoStatus::NotAssessed);
    }
}
