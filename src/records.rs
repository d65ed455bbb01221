use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::prob::{Outcome, classify_outcome};

const CONTINENTAL_TOKENS: &[&str] = &[
    "champions league",
    "uefa champions",
    "ucl",
    "europa league",
    "uefa europa",
    "uel",
    "conference league",
    "uecl",
    "libertadores",
    "sudamericana",
    "club world cup",
];

/// Which home-advantage constant a match is rated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompetitionBucket {
    #[default]
    Domestic,
    Continental,
}

impl CompetitionBucket {
    pub fn from_tag(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "domestic" | "league" | "dom" => Some(Self::Domestic),
            "continental" | "cont" | "tournament" | "uefa" => Some(Self::Continental),
            _ => None,
        }
    }

    /// Table-layer fallback when a row carries no explicit tag.
    pub fn from_league_name(league: &str) -> Self {
        let lower = league.to_ascii_lowercase();
        let continental = CONTINENTAL_TOKENS.iter().any(|tok| {
            if tok.len() <= 4 {
                lower
                    .split(|ch: char| !ch.is_ascii_alphanumeric())
                    .any(|word| word == *tok)
            } else {
                lower.contains(tok)
            }
        });
        if continental {
            Self::Continental
        } else {
            Self::Domestic
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Domestic => "domestic",
            Self::Continental => "continental",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalScore {
    pub home: u32,
    pub away: u32,
}

impl FinalScore {
    pub fn outcome(&self) -> Outcome {
        classify_outcome(self.home, self.away)
    }

    /// Elo actual score for the home side.
    pub fn home_points(&self) -> f64 {
        match self.outcome() {
            Outcome::Home => 1.0,
            Outcome::Draw => 0.5,
            Outcome::Away => 0.0,
        }
    }
}

/// Decimal prices for the three 1X2 selections. Each side may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Odds {
    pub home: Option<f64>,
    pub draw: Option<f64>,
    pub away: Option<f64>,
}

impl Odds {
    pub fn new(home: f64, draw: f64, away: f64) -> Self {
        Self {
            home: Some(home),
            draw: Some(draw),
            away: Some(away),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn price(&self, outcome: Outcome) -> Option<f64> {
        match outcome {
            Outcome::Home => self.home,
            Outcome::Draw => self.draw,
            Outcome::Away => self.away,
        }
    }

    pub fn complete(&self) -> Option<(f64, f64, f64)> {
        Some((self.home?, self.draw?, self.away?))
    }
}

/// One row of the historical matches table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Position in the source table; breaks date ties.
    pub row: usize,
    pub date: NaiveDate,
    pub league: String,
    pub competition: CompetitionBucket,
    pub home_team: String,
    pub away_team: String,
    pub result: Option<FinalScore>,
    pub odds: Odds,
}

impl MatchRecord {
    pub fn outcome(&self) -> Option<Outcome> {
        self.result.map(|score| score.outcome())
    }

    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }
}

/// Orders records by date with the source position as tie-break.
pub fn sort_chronologically(records: &mut [MatchRecord]) {
    records.sort_by(|a, b| a.date.cmp(&b.date).then(a.row.cmp(&b.row)));
}

/// Optional enrichment columns consumed by the staking risk checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuxSignals {
    pub ou_main_total: Option<f64>,
    pub over_price: Option<f64>,
    pub under_price: Option<f64>,
    pub btts_yes_price: Option<f64>,
    pub btts_no_price: Option<f64>,
    pub bookmaker_count: Option<u32>,
    pub has_opening_odds: bool,
    pub has_closing_odds: bool,
    pub liquidity_tier: Option<u8>,
    pub home_xg: Option<f64>,
    pub away_xg: Option<f64>,
    pub contradiction_flags: u32,
    /// Columns the core does not interpret, kept verbatim.
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingFixture {
    pub fixture_id: String,
    pub date: NaiveDate,
    pub league: String,
    pub competition: CompetitionBucket,
    pub home_team: String,
    pub away_team: String,
    pub odds: Odds,
    pub aux: AuxSignals,
}

/// Stable id for fixtures that arrive without one.
pub fn derive_fixture_id(date: NaiveDate, home_team: &str, away_team: &str) -> String {
    let slug = |name: &str| name.trim().to_lowercase().replace(' ', "_");
    format!(
        "{}__{}__vs__{}",
        date.format("%Y%m%d"),
        slug(home_team),
        slug(away_team)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continental_detection_uses_whole_words_for_short_tokens() {
        assert_eq!(
            CompetitionBucket::from_league_name("UEFA Champions League"),
            CompetitionBucket::Continental
        );
        assert_eq!(
            CompetitionBucket::from_league_name("UEL"),
            CompetitionBucket::Continental
        );
        // "uel" inside another word must not match.
        assert_eq!(
            CompetitionBucket::from_league_name("Duel Cup"),
            CompetitionBucket::Domestic
        );
        assert_eq!(
            CompetitionBucket::from_league_name("Premier League"),
            CompetitionBucket::Domestic
        );
    }

    #[test]
    fn odds_complete_requires_every_side() {
        let mut odds = Odds::new(2.0, 3.4, 4.0);
        assert!(odds.complete().is_some());
        odds.away = None;
        assert!(odds.complete().is_none());
        assert_eq!(odds.price(Outcome::Home), Some(2.0));
    }

    #[test]
    fn fixture_id_is_slugged() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date");
        assert_eq!(
            derive_fixture_id(date, "Man City", "Arsenal"),
            "20250301__man_city__vs__arsenal"
        );
    }
}
