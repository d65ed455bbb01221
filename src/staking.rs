use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::market::odds_bucket;
use crate::prob::{Outcome, Prob3};
use crate::records::{AuxSignals, Odds};
use crate::signals::{self, RiskAssessment, SignalConfig};

pub const REASON_NO_PRICE: &str = "no_price";
pub const REASON_NO_EDGE: &str = "no_edge";
pub const REASON_NO_PREDICTION: &str = "no_prediction";
pub const REASON_VETO: &str = "anti_model_veto";
pub const REASON_PER_BET_CAP: &str = "per_bet_cap";
pub const REASON_CLUSTER: &str = "cluster_haircut";
pub const REASON_DAILY_CAP: &str = "daily_cap";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StakingConfig {
    /// Ceiling on the raw Kelly fraction before risk multipliers.
    pub kelly_cap: f64,
    /// Ceiling on the per-side Kelly shown next to predictions.
    pub display_kelly_cap: f64,
    pub per_bet_cap: f64,
    pub daily_cap: f64,
    /// Simultaneous bets a league may carry before the haircut applies.
    pub cluster_target: f64,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            kelly_cap: 1.0,
            display_kelly_cap: 0.10,
            per_bet_cap: 0.02,
            daily_cap: 0.07,
            cluster_target: 5.0,
        }
    }
}

/// Kelly fraction for one side, clipped to `[0, cap]`. Zero for
/// non-finite probabilities and prices that pay nothing.
pub fn kelly_fraction(p: f64, price: f64, cap: f64) -> f64 {
    let b = price - 1.0;
    if !p.is_finite() || !b.is_finite() || b <= 0.0 {
        return 0.0;
    }
    let f = (b * p - (1.0 - p)) / b;
    f.clamp(0.0, cap.max(0.0))
}

/// Display Kelly per side against the fixture's own prices.
pub fn display_kelly(probs: &Prob3, odds: &Odds, cap: f64) -> Prob3 {
    let side = |o: Outcome| match odds.price(o) {
        Some(price) => kelly_fraction(probs.get(o), price, cap),
        None => 0.0,
    };
    Prob3::new(side(Outcome::Home), side(Outcome::Draw), side(Outcome::Away))
}

/// League and odds-bucket slices that historically lose money.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VetoSet {
    slices: BTreeSet<(String, String)>,
}

impl VetoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, league: impl Into<String>, bucket: impl Into<String>) {
        self.slices.insert((league.into(), bucket.into()));
    }

    pub fn is_vetoed(&self, league: &str, bucket: &str) -> bool {
        self.slices.contains(&(league.to_string(), bucket.to_string()))
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

/// Everything staking needs about one fixture.
#[derive(Debug, Clone, PartialEq)]
pub struct StakeCandidate {
    pub fixture_id: String,
    pub league: String,
    pub probs: Prob3,
    pub odds: Odds,
    pub aux: AuxSignals,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StakeDecision {
    pub fixture_id: String,
    pub selection: Outcome,
    pub league: String,
    pub price: Option<f64>,
    pub prob: f64,
    pub base_kelly: f64,
    pub risk_factor: f64,
    pub final_stake: f64,
    pub reasons: Vec<String>,
}

impl StakeDecision {
    pub fn reasons_joined(&self) -> String {
        self.reasons.join(";")
    }

    pub fn is_bet(&self) -> bool {
        self.final_stake > 0.0
    }
}

fn usable_price(price: Option<f64>) -> Option<f64> {
    price.filter(|o| o.is_finite() && *o > 0.0)
}

/// Sizes a single selection. Portfolio caps come later.
pub fn size_selection(
    candidate: &StakeCandidate,
    selection: Outcome,
    risk: &RiskAssessment,
    vetoes: &VetoSet,
    cfg: &StakingConfig,
) -> StakeDecision {
    let prob = candidate.probs.get(selection);
    let price = candidate.odds.price(selection);
    let mut reasons: Vec<String> = Vec::new();

    let base_kelly = match (prob.is_finite(), usable_price(price)) {
        (false, _) => {
            reasons.push(REASON_NO_PREDICTION.to_string());
            0.0
        }
        (true, None) => {
            reasons.push(REASON_NO_PRICE.to_string());
            0.0
        }
        (true, Some(o)) => {
            let k = kelly_fraction(prob, o, cfg.kelly_cap);
            if k <= 0.0 {
                reasons.push(REASON_NO_EDGE.to_string());
            }
            k
        }
    };
    reasons.extend(risk.reasons.iter().cloned());

    let mut final_stake = base_kelly * risk.factor;
    if final_stake > 0.0 && vetoes.is_vetoed(&candidate.league, odds_bucket(price)) {
        reasons.push(REASON_VETO.to_string());
        final_stake = 0.0;
    }
    if final_stake > cfg.per_bet_cap {
        reasons.push(REASON_PER_BET_CAP.to_string());
    }
    let final_stake = final_stake.clamp(0.0, cfg.per_bet_cap.max(0.0));

    StakeDecision {
        fixture_id: candidate.fixture_id.clone(),
        selection,
        league: candidate.league.clone(),
        price,
        prob,
        base_kelly,
        risk_factor: risk.factor,
        final_stake,
        reasons,
    }
}

/// Cluster haircut then daily cap, each a single deterministic rescale.
pub fn apply_portfolio_caps(decisions: &mut [StakeDecision], cfg: &StakingConfig) {
    let mut per_league: BTreeMap<String, usize> = BTreeMap::new();
    for d in decisions.iter().filter(|d| d.is_bet()) {
        *per_league.entry(d.league.clone()).or_default() += 1;
    }
    for d in decisions.iter_mut().filter(|d| d.final_stake > 0.0) {
        let count = per_league.get(&d.league).copied().unwrap_or(1).max(1);
        let haircut = (cfg.cluster_target / count as f64).min(1.0);
        if haircut < 1.0 {
            d.final_stake *= haircut;
            d.reasons.push(REASON_CLUSTER.to_string());
        }
    }

    let total: f64 = decisions.iter().map(|d| d.final_stake).sum();
    if total > cfg.daily_cap && total > 0.0 {
        let scale = cfg.daily_cap / total;
        tracing::info!(total, scale, "daily cap applied");
        for d in decisions.iter_mut().filter(|d| d.final_stake > 0.0) {
            d.final_stake *= scale;
            d.reasons.push(REASON_DAILY_CAP.to_string());
        }
    }
}

/// Three decisions per fixture (home, draw, away) in input order, after the
/// portfolio pass.
pub fn size_stakes(
    candidates: &[StakeCandidate],
    vetoes: &VetoSet,
    staking: &StakingConfig,
    signal_cfg: &SignalConfig,
) -> Vec<StakeDecision> {
    let mut decisions = Vec::with_capacity(candidates.len() * 3);
    for candidate in candidates {
        let risk = signals::assess(&candidate.aux, &candidate.league, &candidate.probs, signal_cfg);
        for selection in Outcome::ALL {
            let decision = size_selection(candidate, selection, &risk, vetoes, staking);
            tracing::debug!(
                fixture = %decision.fixture_id,
                selection = selection.label(),
                base_kelly = decision.base_kelly,
                risk_factor = decision.risk_factor,
                stake = decision.final_stake,
                "sized"
            );
            decisions.push(decision);
        }
    }
    apply_portfolio_caps(&mut decisions, staking);
    decisions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, league: &str, probs: Prob3, odds: Odds) -> StakeCandidate {
        StakeCandidate {
            fixture_id: id.to_string(),
            league: league.to_string(),
            probs,
            odds,
            aux: AuxSignals::default(),
        }
    }

    #[test]
    fn kelly_zero_without_edge() {
        assert_eq!(kelly_fraction(0.5, 2.0, 1.0), 0.0);
        assert_eq!(kelly_fraction(0.4, 2.0, 1.0), 0.0);
        assert_eq!(kelly_fraction(0.9, 1.0, 1.0), 0.0);
        assert_eq!(kelly_fraction(f64::NAN, 3.0, 1.0), 0.0);
    }

    #[test]
    fn kelly_positive_with_edge() {
        let f = kelly_fraction(0.55, 2.0, 1.0);
        assert!((f - 0.10).abs() < 1e-12);
        assert!(kelly_fraction(0.34, 3.0, 1.0) > 0.0);
        assert_eq!(kelly_fraction(0.9, 3.0, 0.05), 0.05);
    }

    #[test]
    fn every_selection_gets_a_decision() {
        let c = candidate(
            "f1",
            "L",
            Prob3::new(0.6, 0.25, 0.15),
            Odds {
                home: Some(2.0),
                draw: Some(3.2),
                away: None,
            },
        );
        let out = size_stakes(&[c], &VetoSet::new(), &StakingConfig::default(), &SignalConfig::default());
        assert_eq!(out.len(), 3);
        assert!(out[0].is_bet());
        assert_eq!(out[0].final_stake, 0.02);
        assert!(out[0].reasons.contains(&REASON_PER_BET_CAP.to_string()));
        assert_eq!(out[1].reasons, vec![REASON_NO_EDGE.to_string()]);
        assert_eq!(out[2].reasons, vec![REASON_NO_PRICE.to_string()]);
    }

    #[test]
    fn nan_prediction_is_flagged() {
        let c = candidate("f1", "L", Prob3::nan(), Odds::new(2.0, 3.0, 4.0));
        let out = size_stakes(&[c], &VetoSet::new(), &StakingConfig::default(), &SignalConfig::default());
        assert!(out.iter().all(|d| d.final_stake == 0.0));
        assert!(out.iter().all(|d| d.reasons == vec![REASON_NO_PREDICTION.to_string()]));
    }

    #[test]
    fn veto_zeroes_the_slice() {
        let c = candidate("f1", "L", Prob3::new(0.6, 0.25, 0.15), Odds::new(2.0, 3.2, 6.0));
        let mut vetoes = VetoSet::new();
        vetoes.insert("L", "(1.8,2.2]");
        let out = size_stakes(&[c], &vetoes, &StakingConfig::default(), &SignalConfig::default());
        assert_eq!(out[0].final_stake, 0.0);
        assert!(out[0].reasons.contains(&REASON_VETO.to_string()));
    }

    #[test]
    fn cluster_haircut_scales_crowded_league() {
        let cfg = StakingConfig {
            daily_cap: 10.0,
            ..StakingConfig::default()
        };
        let cands: Vec<_> = (0..10)
            .map(|i| candidate(&format!("f{i}"), "L", Prob3::new(0.6, 0.25, 0.15), Odds::new(2.0, 3.2, 5.0)))
            .collect();
        let out = size_stakes(&cands, &VetoSet::new(), &cfg, &SignalConfig::default());
        let bets: Vec<_> = out.iter().filter(|d| d.is_bet()).collect();
        assert_eq!(bets.len(), 10);
        for d in bets {
            assert!((d.final_stake - 0.01).abs() < 1e-12);
            assert!(d.reasons.contains(&REASON_CLUSTER.to_string()));
        }
    }

    #[test]
    fn daily_cap_bounds_the_run() {
        let cands: Vec<_> = (0..8)
            .map(|i| {
                candidate(
                    &format!("f{i}"),
                    &format!("L{i}"),
                    Prob3::new(0.6, 0.25, 0.15),
                    Odds::new(2.0, 3.2, 5.0),
                )
            })
            .collect();
        let cfg = StakingConfig::default();
        let out = size_stakes(&cands, &VetoSet::new(), &cfg, &SignalConfig::default());
        let total: f64 = out.iter().map(|d| d.final_stake).sum();
        assert!(total <= cfg.daily_cap + 1e-12);
        assert!((total - cfg.daily_cap).abs() < 1e-9);
        for d in &out {
            assert!((0.0..=cfg.per_bet_cap).contains(&d.final_stake));
        }
    }

    #[test]
    fn risk_reasons_survive_on_decisions() {
        let mut c = candidate("f1", "L", Prob3::new(0.6, 0.25, 0.15), Odds::new(2.0, 3.2, 5.0));
        c.aux.contradiction_flags = 2;
        let out = size_stakes(&[c], &VetoSet::new(), &StakingConfig::default(), &SignalConfig::default());
        assert!((out[0].risk_factor - 0.6).abs() < 1e-12);
        assert!(out[0].reasons.contains(&signals::REASON_CONTRADICTION.to_string()));
    }
}
