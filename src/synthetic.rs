//! Seeded league histories for benches and tests.

use chrono::{Days, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::elo::{EloConfig, match_probs};
use crate::prob::Outcome;
use crate::records::{CompetitionBucket, FinalScore, MatchRecord, Odds};

#[derive(Debug, Clone)]
pub struct SyntheticLeague {
    pub name: String,
    pub teams: usize,
    pub seasons: usize,
    pub competition: CompetitionBucket,
    /// Share of rows that carry a full 1X2 price.
    pub odds_coverage: f64,
    /// Trailing rounds left without a result.
    pub unresolved_rounds: usize,
}

impl SyntheticLeague {
    pub fn new(name: &str, teams: usize, seasons: usize) -> Self {
        Self {
            name: name.to_string(),
            teams,
            seasons,
            competition: CompetitionBucket::Domestic,
            odds_coverage: 1.0,
            unresolved_rounds: 0,
        }
    }

    pub fn with_odds_coverage(mut self, share: f64) -> Self {
        self.odds_coverage = share.clamp(0.0, 1.0);
        self
    }

    pub fn with_unresolved_rounds(mut self, rounds: usize) -> Self {
        self.unresolved_rounds = rounds;
        self
    }

    pub fn team_name(&self, idx: usize) -> String {
        format!("{} {:02}", self.name, idx + 1)
    }
}

/// Double round-robin by the circle method. Pairs are `(home, away)`.
fn round_robin(teams: usize) -> Vec<Vec<(usize, usize)>> {
    let n = if teams % 2 == 0 { teams } else { teams + 1 };
    if n < 2 {
        return Vec::new();
    }
    let mut slots: Vec<usize> = (0..n).collect();
    let mut first_half = Vec::with_capacity(n - 1);
    for round in 0..n - 1 {
        let mut pairs = Vec::with_capacity(n / 2);
        for i in 0..n / 2 {
            let (a, b) = (slots[i], slots[n - 1 - i]);
            if a >= teams || b >= teams {
                continue;
            }
            if (round + i) % 2 == 0 {
                pairs.push((a, b));
            } else {
                pairs.push((b, a));
            }
        }
        first_half.push(pairs);
        let last = slots.pop().unwrap_or(0);
        slots.insert(1, last);
    }
    let second_half: Vec<Vec<(usize, usize)>> = first_half
        .iter()
        .map(|round| round.iter().map(|&(h, a)| (a, h)).collect())
        .collect();
    first_half.into_iter().chain(second_half).collect()
}

fn sample_score(outcome: Outcome, rng: &mut StdRng) -> FinalScore {
    match outcome {
        Outcome::Home => {
            let home = rng.gen_range(1..4);
            FinalScore {
                home,
                away: rng.gen_range(0..home),
            }
        }
        Outcome::Draw => {
            let goals = rng.gen_range(0..3);
            FinalScore {
                home: goals,
                away: goals,
            }
        }
        Outcome::Away => {
            let away = rng.gen_range(1..4);
            FinalScore {
                home: rng.gen_range(0..away),
                away,
            }
        }
    }
}

/// Generates every league's schedule and interleaves them by date. Team
/// strengths are hidden ratings; results and prices are drawn from them.
pub fn generate_history(leagues: &[SyntheticLeague], seed: u64) -> Vec<MatchRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let cfg = EloConfig::default();
    let start = NaiveDate::from_ymd_opt(2021, 8, 7).unwrap_or_default();
    let mut out = Vec::new();

    for league in leagues {
        let strength: Vec<f64> = (0..league.teams)
            .map(|_| cfg.initial_rating + rng.gen_range(-220.0..220.0))
            .collect();
        let schedule = round_robin(league.teams);
        let total_rounds = schedule.len() * league.seasons;
        let home_adv = cfg.home_advantage(league.competition);

        for season in 0..league.seasons {
            for (r, pairs) in schedule.iter().enumerate() {
                let round_idx = season * schedule.len() + r;
                let days = (season * 364 + r * 7) as u64;
                let date = start.checked_add_days(Days::new(days)).unwrap_or(start);
                let resolved = round_idx + league.unresolved_rounds < total_rounds;

                for &(h, a) in pairs {
                    let truth = match_probs(strength[h], strength[a], home_adv, &cfg);
                    let u: f64 = rng.gen_range(0.0..1.0);
                    let outcome = if u < truth.home {
                        Outcome::Home
                    } else if u < truth.home + truth.draw {
                        Outcome::Draw
                    } else {
                        Outcome::Away
                    };
                    let score = sample_score(outcome, &mut rng);

                    let odds = if rng.gen_bool(league.odds_coverage) {
                        let noisy = |p: f64, rng: &mut StdRng| (p + rng.gen_range(-0.03..0.03)).max(0.03);
                        let (ph, pd, pa) = (
                            noisy(truth.home, &mut rng),
                            noisy(truth.draw, &mut rng),
                            noisy(truth.away, &mut rng),
                        );
                        let s = (ph + pd + pa) / 1.05;
                        Odds::new(s / ph, s / pd, s / pa)
                    } else {
                        Odds::none()
                    };

                    out.push(MatchRecord {
                        row: 0,
                        date,
                        league: league.name.clone(),
                        competition: league.competition,
                        home_team: league.team_name(h),
                        away_team: league.team_name(a),
                        result: resolved.then_some(score),
                        odds,
                    });
                }
            }
        }
    }

    out.sort_by(|a, b| a.date.cmp(&b.date).then(a.league.cmp(&b.league)));
    for (i, m) in out.iter_mut().enumerate() {
        m.row = i;
    }
    out
}
