use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::prob::{Outcome, Prob3, log_loss};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendConfig {
    pub grid_min: f64,
    pub grid_max: f64,
    pub grid_step: f64,
    /// Used when nothing is scorable. Must sit on the grid.
    pub default_weight: f64,
    /// Resolved rows a league needs before it gets its own weight.
    pub min_league_rows: usize,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            grid_min: 0.50,
            grid_max: 0.95,
            grid_step: 0.05,
            default_weight: 0.85,
            min_league_rows: 200,
        }
    }
}

/// One resolved historical row with both signals attached.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendSample {
    pub league: String,
    pub date: NaiveDate,
    pub row: usize,
    pub market: Prob3,
    pub model: Prob3,
    pub outcome: Outcome,
}

impl BlendSample {
    pub fn has_market(&self) -> bool {
        self.market.is_finite()
    }
}

/// Trust placed in the market versus the rating model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    pub global: f64,
    #[serde(default)]
    pub leagues: BTreeMap<String, f64>,
    /// Leagues with resolved history but no priced rows at all.
    #[serde(default)]
    pub model_only: BTreeSet<String>,
}

impl BlendWeights {
    pub fn uniform(global: f64) -> Self {
        Self {
            global,
            leagues: BTreeMap::new(),
            model_only: BTreeSet::new(),
        }
    }

    pub fn weight_for(&self, league: &str) -> f64 {
        self.leagues.get(league).copied().unwrap_or(self.global)
    }

    pub fn is_model_only(&self, league: &str) -> bool {
        self.model_only.contains(league)
    }
}

/// `w * market + (1 - w) * model`, renormalized. Falls back to the model
/// triple when the market is undefined.
pub fn blend(w: f64, market: &Prob3, model: &Prob3) -> Prob3 {
    if !market.is_finite() {
        return *model;
    }
    market.mix(model, w).normalized()
}

/// Candidate weights, ascending. Built from integer steps so grid points
/// compare exactly against configured values like the default.
pub fn weight_grid(cfg: &BlendConfig) -> Vec<f64> {
    if cfg.grid_step.is_nan() || cfg.grid_step <= 0.0 || cfg.grid_max < cfg.grid_min {
        return vec![cfg.default_weight];
    }
    let steps = ((cfg.grid_max - cfg.grid_min) / cfg.grid_step + 1e-9).floor() as usize;
    (0..=steps)
        .map(|i| {
            let w = cfg.grid_min + i as f64 * cfg.grid_step;
            ((w * 1e6).round() / 1e6).clamp(0.0, 1.0)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightFit {
    pub weight: f64,
    pub scored: usize,
    pub log_loss: f64,
}

/// Grid search for the weight with the lowest mean log-loss over rows whose
/// market is defined. Ties keep the smaller weight.
pub fn learn_weight<'a, I>(samples: I, grid: &[f64], default_weight: f64) -> WeightFit
where
    I: IntoIterator<Item = &'a BlendSample>,
{
    let scorable: Vec<&BlendSample> = samples.into_iter().filter(|s| s.has_market()).collect();
    if scorable.is_empty() || grid.is_empty() {
        return WeightFit {
            weight: default_weight,
            scored: 0,
            log_loss: f64::NAN,
        };
    }

    let n = scorable.len() as f64;
    let mut best = WeightFit {
        weight: default_weight,
        scored: scorable.len(),
        log_loss: f64::INFINITY,
    };
    for &w in grid {
        let loss = scorable
            .iter()
            .map(|s| log_loss(&blend(w, &s.market, &s.model), s.outcome))
            .sum::<f64>()
            / n;
        if loss < best.log_loss - 1e-12 {
            best.weight = w;
            best.log_loss = loss;
        }
    }
    best
}

/// Fits the global weight, per-league overrides, and the model-only set.
pub fn learn_blend_weights(samples: &[BlendSample], cfg: &BlendConfig) -> BlendWeights {
    let grid = weight_grid(cfg);
    let global = learn_weight(samples, &grid, cfg.default_weight);

    let mut by_league: BTreeMap<&str, Vec<&BlendSample>> = BTreeMap::new();
    for s in samples {
        by_league.entry(s.league.as_str()).or_default().push(s);
    }

    let mut weights = BlendWeights::uniform(global.weight);
    for (league, rows) in by_league {
        let priced = rows.iter().filter(|s| s.has_market()).count();
        if priced == 0 {
            weights.model_only.insert(league.to_string());
            continue;
        }
        if rows.len() < cfg.min_league_rows {
            continue;
        }
        let fit = learn_weight(rows.iter().copied(), &grid, global.weight);
        tracing::debug!(
            league,
            weight = fit.weight,
            scored = fit.scored,
            log_loss = fit.log_loss,
            "league blend weight"
        );
        weights.leagues.insert(league.to_string(), fit.weight);
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(league: &str, row: usize, market: Prob3, model: Prob3, outcome: Outcome) -> BlendSample {
        BlendSample {
            league: league.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
            row,
            market,
            model,
            outcome,
        }
    }

    #[test]
    fn grid_spans_configured_range() {
        let grid = weight_grid(&BlendConfig::default());
        assert_eq!(grid.len(), 10);
        assert_eq!(grid[0], 0.5);
        assert_eq!(grid[9], 0.95);
        assert!(grid.contains(&0.85));
    }

    #[test]
    fn blend_without_market_returns_model() {
        let model = Prob3::new(0.5, 0.3, 0.2);
        assert_eq!(blend(0.9, &Prob3::nan(), &model), model);
    }

    #[test]
    fn blend_sums_to_one() {
        let p = blend(0.7, &Prob3::new(0.5, 0.3, 0.2), &Prob3::new(0.2, 0.3, 0.5));
        assert!((p.sum() - 1.0).abs() < 1e-12);
        assert!((p.home - 0.41).abs() < 1e-12);
    }

    #[test]
    fn accurate_model_pulls_weight_to_grid_floor() {
        let market = Prob3::new(0.2, 0.3, 0.5);
        let model = Prob3::new(0.8, 0.1, 0.1);
        let rows: Vec<_> = (0..50).map(|i| sample("L", i, market, model, Outcome::Home)).collect();
        let fit = learn_weight(&rows, &weight_grid(&BlendConfig::default()), 0.85);
        assert_eq!(fit.weight, 0.5);
        assert_eq!(fit.scored, 50);
    }

    #[test]
    fn accurate_market_pulls_weight_to_grid_ceiling() {
        let market = Prob3::new(0.8, 0.1, 0.1);
        let model = Prob3::new(0.2, 0.3, 0.5);
        let rows: Vec<_> = (0..50).map(|i| sample("L", i, market, model, Outcome::Home)).collect();
        let fit = learn_weight(&rows, &weight_grid(&BlendConfig::default()), 0.85);
        assert_eq!(fit.weight, 0.95);
    }

    #[test]
    fn identical_signals_tie_to_smallest_weight() {
        let p = Prob3::new(0.4, 0.3, 0.3);
        let rows: Vec<_> = (0..10).map(|i| sample("L", i, p, p, Outcome::Draw)).collect();
        let fit = learn_weight(&rows, &weight_grid(&BlendConfig::default()), 0.85);
        assert_eq!(fit.weight, 0.5);
    }

    #[test]
    fn no_scorable_rows_uses_default() {
        let rows = vec![sample("L", 0, Prob3::nan(), Prob3::uniform(), Outcome::Home)];
        let fit = learn_weight(&rows, &weight_grid(&BlendConfig::default()), 0.85);
        assert_eq!(fit.weight, 0.85);
        assert_eq!(fit.scored, 0);
    }

    #[test]
    fn small_leagues_inherit_global_and_unpriced_leagues_are_model_only() {
        let market = Prob3::new(0.8, 0.1, 0.1);
        let model = Prob3::new(0.2, 0.3, 0.5);
        let mut rows: Vec<_> = (0..250).map(|i| sample("Big", i, market, model, Outcome::Home)).collect();
        rows.extend((0..20).map(|i| sample("Small", 300 + i, model, market, Outcome::Home)));
        rows.extend((0..5).map(|i| sample("Bare", 400 + i, Prob3::nan(), model, Outcome::Home)));

        let weights = learn_blend_weights(&rows, &BlendConfig::default());
        assert!(weights.leagues.contains_key("Big"));
        assert!(!weights.leagues.contains_key("Small"));
        assert_eq!(weights.weight_for("Small"), weights.global);
        assert!(weights.is_model_only("Bare"));
        assert!(!weights.is_model_only("Big"));
        for w in weights.leagues.values().chain(std::iter::once(&weights.global)) {
            assert!((0.0..=1.0).contains(w));
        }
    }
}
