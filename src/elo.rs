use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::prob::Prob3;
use crate::records::{CompetitionBucket, FinalScore, MatchRecord};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EloConfig {
    pub k: f64,
    pub initial_rating: f64,
    pub home_adv_domestic: f64,
    pub home_adv_continental: f64,
    // Draw heuristic pD = draw_base + draw_bump * exp(-|dR| / draw_scale).
    // Hand-tuned; candidates for refitting against observed draw rates.
    pub draw_base: f64,
    pub draw_bump: f64,
    pub draw_scale: f64,
    pub prob_floor: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            k: 20.0,
            initial_rating: 1500.0,
            home_adv_domestic: 60.0,
            home_adv_continental: 50.0,
            draw_base: 0.18,
            draw_bump: 0.10,
            draw_scale: 200.0,
            prob_floor: 1e-6,
        }
    }
}

impl EloConfig {
    pub fn home_advantage(&self, bucket: CompetitionBucket) -> f64 {
        match bucket {
            CompetitionBucket::Domestic => self.home_adv_domestic,
            CompetitionBucket::Continental => self.home_adv_continental,
        }
    }
}

/// Team strength table for a single rating pass. Owned by whoever runs the
/// pass; never shared and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingBook {
    ratings: HashMap<String, f64>,
    initial: f64,
}

impl RatingBook {
    pub fn new(initial: f64) -> Self {
        Self {
            ratings: HashMap::new(),
            initial,
        }
    }

    /// Current rating, or the replacement-level prior for unseen teams.
    pub fn rating(&self, team: &str) -> f64 {
        self.ratings.get(team).copied().unwrap_or(self.initial)
    }

    pub fn contains(&self, team: &str) -> bool {
        self.ratings.contains_key(team)
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    /// One sequential Elo update. Both sides move by the same amount in
    /// opposite directions.
    pub fn apply_result(
        &mut self,
        home_team: &str,
        away_team: &str,
        score: FinalScore,
        home_adv: f64,
        cfg: &EloConfig,
    ) {
        let rh = self.rating(home_team);
        let ra = self.rating(away_team);
        let expected_home = expected_score(rh - ra + home_adv);
        let delta = cfg.k * (score.home_points() - expected_home);
        self.ratings.insert(home_team.to_string(), rh + delta);
        self.ratings.insert(away_team.to_string(), ra - delta);
    }

    pub fn match_probs(&self, home_team: &str, away_team: &str, home_adv: f64, cfg: &EloConfig) -> Prob3 {
        match_probs(self.rating(home_team), self.rating(away_team), home_adv, cfg)
    }
}

/// Base-10 logistic on a rating gap.
pub fn expected_score(diff: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf(-diff / 400.0))
}

pub fn draw_probability(diff: f64, cfg: &EloConfig) -> f64 {
    cfg.draw_base + cfg.draw_bump * (-diff.abs() / cfg.draw_scale).exp()
}

/// 1X2 triple for a pairing. Every component stays in `[floor, 1 - floor]`
/// and the triple sums to one for any rating gap: home is clamped so the away
/// remainder never drops under the floor.
pub fn match_probs(r_home: f64, r_away: f64, home_adv: f64, cfg: &EloConfig) -> Prob3 {
    let floor = cfg.prob_floor;
    let diff = r_home - r_away;
    let p_draw = draw_probability(diff, cfg).min(1.0 - 2.0 * floor).max(floor);
    let p_home = ((1.0 - p_draw) * expected_score(diff + home_adv))
        .min(1.0 - p_draw - floor)
        .max(floor);
    let p_away = (1.0 - p_home - p_draw).max(floor);
    Prob3::new(p_home, p_draw, p_away)
}

#[derive(Debug, Clone)]
pub struct Replay {
    pub book: RatingBook,
    /// Pre-match model triple for every input record, in input order.
    pub pre_match: Vec<Prob3>,
    pub updates: usize,
}

/// Walks the table once in `(date, row)` order. Each row is scored with the
/// ratings it sees before kickoff; only resolved rows update ratings.
pub fn replay_history(records: &[MatchRecord], book: RatingBook, cfg: &EloConfig) -> Replay {
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|&a, &b| {
        records[a]
            .date
            .cmp(&records[b].date)
            .then(records[a].row.cmp(&records[b].row))
    });

    let mut book = book;
    let mut pre_match = vec![Prob3::nan(); records.len()];
    let mut updates = 0usize;
    for idx in order {
        let m = &records[idx];
        let home_adv = cfg.home_advantage(m.competition);
        pre_match[idx] = book.match_probs(&m.home_team, &m.away_team, home_adv, cfg);
        if let Some(score) = m.result {
            book.apply_result(&m.home_team, &m.away_team, score, home_adv, cfg);
            updates += 1;
        }
    }

    Replay {
        book,
        pre_match,
        updates,
    }
}
