use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::market::two_way_yes;
use crate::prob::Prob3;
use crate::records::AuxSignals;

pub const REASON_CONTRADICTION: &str = "market_contradiction";
pub const REASON_THIN_MARKET: &str = "high_dispersion_no_timing";
pub const REASON_DIVERGENCE: &str = "cross_signal_divergence";
pub const REASON_LIQUIDITY: &str = "liquidity_tier";

/// Risk multipliers and the thresholds that fire them. All hand-tuned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub contradiction_penalty: f64,
    pub thin_market_penalty: f64,
    pub divergence_penalty: f64,
    /// Multiplier per liquidity tier; tier `n` reads index `n - 1`, deeper
    /// tiers reuse the last entry.
    pub tier_scale: Vec<f64>,
    /// Tier for leagues whose fixtures carry no tier column.
    pub league_tiers: BTreeMap<String, u8>,
    pub thin_market_min_books: u32,
    /// Main totals line at or under which near-parity BTTS prices contradict.
    pub low_total_line: f64,
    /// Largest BTTS yes/no decimal price gap still counted as parity.
    pub btts_parity_gap: f64,
    pub over_strong: f64,
    pub btts_weak: f64,
    /// Goals implied by the 1X2 triple: `base + slope * (pH - pA)`.
    pub goals_1x2_base: f64,
    pub goals_1x2_slope: f64,
    /// Goals implied by the totals market when over / under lands.
    pub goals_if_over: f64,
    pub goals_if_under: f64,
    pub divergence_goals: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            contradiction_penalty: 0.6,
            thin_market_penalty: 0.7,
            divergence_penalty: 0.5,
            tier_scale: vec![1.0, 0.85, 0.70],
            league_tiers: BTreeMap::new(),
            thin_market_min_books: 12,
            low_total_line: 2.0,
            btts_parity_gap: 0.2,
            over_strong: 0.58,
            btts_weak: 0.50,
            goals_1x2_base: 2.3,
            goals_1x2_slope: 0.8,
            goals_if_over: 3.1,
            goals_if_under: 2.1,
            divergence_goals: 0.4,
        }
    }
}

impl SignalConfig {
    pub fn tier_multiplier(&self, tier: u8) -> f64 {
        if tier <= 1 || self.tier_scale.is_empty() {
            return 1.0;
        }
        let idx = (tier as usize - 1).min(self.tier_scale.len() - 1);
        self.tier_scale[idx]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    /// Product of every fired multiplier, in `(0, 1]`.
    pub factor: f64,
    pub reasons: Vec<String>,
}

impl RiskAssessment {
    pub fn clean() -> Self {
        Self {
            factor: 1.0,
            reasons: Vec::new(),
        }
    }

    fn penalise(&mut self, multiplier: f64, reason: impl Into<String>) {
        self.factor *= multiplier;
        self.reasons.push(reason.into());
    }
}

/// Low totals line priced against a coin-flip BTTS market.
pub fn btts_parity_against_low_total(aux: &AuxSignals, cfg: &SignalConfig) -> bool {
    match (aux.ou_main_total, aux.btts_yes_price, aux.btts_no_price) {
        (Some(total), Some(yes), Some(no)) if total.is_finite() && yes.is_finite() && no.is_finite() => {
            total <= cfg.low_total_line && (yes - no).abs() < cfg.btts_parity_gap
        }
        _ => false,
    }
}

/// Over favoured while BTTS-yes is not.
pub fn over_against_btts(aux: &AuxSignals, cfg: &SignalConfig) -> bool {
    let over = two_way_yes(aux.over_price, aux.under_price);
    let btts_yes = two_way_yes(aux.btts_yes_price, aux.btts_no_price);
    matches!((over, btts_yes), (Some(o), Some(b)) if o > cfg.over_strong && b < cfg.btts_weak)
}

/// Upstream flags or either totals/BTTS rule.
pub fn market_contradiction(aux: &AuxSignals, cfg: &SignalConfig) -> bool {
    aux.contradiction_flags > 0
        || btts_parity_against_low_total(aux, cfg)
        || over_against_btts(aux, cfg)
}

/// Many books quoting with no opening or closing line to anchor them.
pub fn thin_market_without_timing(aux: &AuxSignals, cfg: &SignalConfig) -> bool {
    matches!(aux.bookmaker_count, Some(n) if n >= cfg.thin_market_min_books)
        && !aux.has_opening_odds
        && !aux.has_closing_odds
}

/// Goal count implied by the 1X2 triple.
pub fn goals_from_1x2(probs: &Prob3, cfg: &SignalConfig) -> f64 {
    cfg.goals_1x2_base + cfg.goals_1x2_slope * (probs.home - probs.away)
}

/// Goal count implied by the vig-stripped over probability.
pub fn goals_from_totals(p_over: f64, cfg: &SignalConfig) -> f64 {
    p_over * cfg.goals_if_over + (1.0 - p_over) * cfg.goals_if_under
}

/// 1X2 and totals markets disagree about the goal count.
pub fn cross_signal_divergence(aux: &AuxSignals, probs: &Prob3, cfg: &SignalConfig) -> bool {
    let Some(p_over) = two_way_yes(aux.over_price, aux.under_price) else {
        return false;
    };
    let from_1x2 = goals_from_1x2(probs, cfg);
    from_1x2.is_finite() && (from_1x2 - goals_from_totals(p_over, cfg)).abs() > cfg.divergence_goals
}

pub fn liquidity_tier(aux: &AuxSignals, league: &str, cfg: &SignalConfig) -> u8 {
    aux.liquidity_tier
        .or_else(|| cfg.league_tiers.get(league).copied())
        .unwrap_or(1)
        .max(1)
}

/// Fixture-level risk factor shared by all three selections. `probs` is the
/// fixture's predicted 1X2 triple.
pub fn assess(aux: &AuxSignals, league: &str, probs: &Prob3, cfg: &SignalConfig) -> RiskAssessment {
    let mut risk = RiskAssessment::clean();
    if market_contradiction(aux, cfg) {
        risk.penalise(cfg.contradiction_penalty, REASON_CONTRADICTION);
    }
    if thin_market_without_timing(aux, cfg) {
        risk.penalise(cfg.thin_market_penalty, REASON_THIN_MARKET);
    }
    if cross_signal_divergence(aux, probs, cfg) {
        risk.penalise(cfg.divergence_penalty, REASON_DIVERGENCE);
    }
    let tier = liquidity_tier(aux, league, cfg);
    if tier > 1 {
        risk.penalise(cfg.tier_multiplier(tier), format!("{REASON_LIQUIDITY}_{tier}"));
    }
    risk
}

#[cfg(test)]
mod tests {
    use super::*;

    fn even() -> Prob3 {
        Prob3::new(0.4, 0.3, 0.3)
    }

    #[test]
    fn clean_fixture_has_unit_factor() {
        let risk = assess(&AuxSignals::default(), "L", &even(), &SignalConfig::default());
        assert_eq!(risk.factor, 1.0);
        assert!(risk.reasons.is_empty());
    }

    #[test]
    fn penalties_multiply() {
        let aux = AuxSignals {
            contradiction_flags: 1,
            bookmaker_count: Some(14),
            liquidity_tier: Some(2),
            ..AuxSignals::default()
        };
        let risk = assess(&aux, "L", &even(), &SignalConfig::default());
        assert!((risk.factor - 0.6 * 0.7 * 0.85).abs() < 1e-12);
        assert_eq!(
            risk.reasons,
            vec![REASON_CONTRADICTION, REASON_THIN_MARKET, "liquidity_tier_2"]
        );
    }

    #[test]
    fn timing_data_clears_thin_market() {
        let aux = AuxSignals {
            bookmaker_count: Some(20),
            has_closing_odds: true,
            ..AuxSignals::default()
        };
        assert!(!thin_market_without_timing(&aux, &SignalConfig::default()));
        let few = AuxSignals {
            bookmaker_count: Some(11),
            ..AuxSignals::default()
        };
        assert!(!thin_market_without_timing(&few, &SignalConfig::default()));
    }

    #[test]
    fn btts_parity_compares_raw_prices() {
        let cfg = SignalConfig::default();
        let parity = AuxSignals {
            ou_main_total: Some(2.0),
            btts_yes_price: Some(1.90),
            btts_no_price: Some(1.95),
            ..AuxSignals::default()
        };
        assert!(btts_parity_against_low_total(&parity, &cfg));
        assert!(market_contradiction(&parity, &cfg));

        let gap = AuxSignals {
            btts_yes_price: Some(1.70),
            btts_no_price: Some(2.05),
            ..parity.clone()
        };
        assert!(!btts_parity_against_low_total(&gap, &cfg));

        let high_line = AuxSignals {
            ou_main_total: Some(2.5),
            ..parity.clone()
        };
        assert!(!btts_parity_against_low_total(&high_line, &cfg));

        // Over/under prices do not suppress the parity rule.
        let priced = AuxSignals {
            over_price: Some(2.0),
            under_price: Some(1.8),
            ..parity
        };
        assert!(btts_parity_against_low_total(&priced, &cfg));
    }

    #[test]
    fn strong_over_with_weak_btts_contradicts() {
        let cfg = SignalConfig::default();
        // p_over = 0.60, p_btts_yes = 0.45
        let aux = AuxSignals {
            over_price: Some(1.0 / 0.60),
            under_price: Some(1.0 / 0.40),
            btts_yes_price: Some(1.0 / 0.45),
            btts_no_price: Some(1.0 / 0.55),
            ..AuxSignals::default()
        };
        assert!(over_against_btts(&aux, &cfg));
        assert!(market_contradiction(&aux, &cfg));

        let agreeing = AuxSignals {
            btts_yes_price: Some(1.0 / 0.55),
            btts_no_price: Some(1.0 / 0.45),
            ..aux.clone()
        };
        assert!(!over_against_btts(&agreeing, &cfg));

        let no_btts = AuxSignals {
            btts_yes_price: None,
            btts_no_price: None,
            ..aux
        };
        assert!(!over_against_btts(&no_btts, &cfg));
    }

    #[test]
    fn divergence_compares_1x2_goals_with_totals() {
        let cfg = SignalConfig::default();
        // p_over = 0.9 implies 3.0 goals.
        let aux = AuxSignals {
            over_price: Some(1.0 / 0.9),
            under_price: Some(1.0 / 0.1),
            ..AuxSignals::default()
        };
        // Balanced triple implies 2.3 goals: gap 0.7.
        let balanced = Prob3::new(0.35, 0.30, 0.35);
        assert!((goals_from_1x2(&balanced, &cfg) - 2.3).abs() < 1e-12);
        assert!((goals_from_totals(0.9, &cfg) - 3.0).abs() < 1e-12);
        assert!(cross_signal_divergence(&aux, &balanced, &cfg));

        // Strong home favourite implies 2.9 goals: gap 0.1.
        let favourite = Prob3::new(0.80, 0.15, 0.05);
        assert!(!cross_signal_divergence(&aux, &favourite, &cfg));

        assert!(!cross_signal_divergence(&AuxSignals::default(), &balanced, &cfg));
        let unpredicted = Prob3::new(f64::NAN, f64::NAN, f64::NAN);
        assert!(!cross_signal_divergence(&aux, &unpredicted, &cfg));

        let risk = assess(&aux, "L", &balanced, &cfg);
        assert_eq!(risk.reasons, vec![REASON_DIVERGENCE]);
        assert!((risk.factor - 0.5).abs() < 1e-12);
    }

    #[test]
    fn tier_falls_back_to_league_map() {
        let mut cfg = SignalConfig::default();
        cfg.league_tiers.insert("Minor".to_string(), 3);
        assert_eq!(liquidity_tier(&AuxSignals::default(), "Minor", &cfg), 3);
        assert_eq!(liquidity_tier(&AuxSignals::default(), "Major", &cfg), 1);
        assert!((cfg.tier_multiplier(3) - 0.70).abs() < 1e-12);
        assert!((cfg.tier_multiplier(7) - 0.70).abs() < 1e-12);
    }
}
