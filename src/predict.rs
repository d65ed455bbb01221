use chrono::NaiveDate;

use crate::blend::{BlendWeights, blend};
use crate::calibration::CalibratorSet;
use crate::config::EngineConfig;
use crate::elo::RatingBook;
use crate::error::SignalGap;
use crate::market::{implied, market_quote, overround};
use crate::prob::Prob3;
use crate::records::{Odds, UpcomingFixture};
use crate::staking::{StakeCandidate, display_kelly};

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub fixture_id: String,
    pub date: NaiveDate,
    pub league: String,
    pub home_team: String,
    pub away_team: String,
    pub model: Prob3,
    pub market: Prob3,
    /// Market weight used, `None` when the market did not contribute.
    pub weight: Option<f64>,
    pub calibrated: bool,
    /// Final `pH, pD, pA`.
    pub probs: Prob3,
    pub odds: Odds,
    pub display_kelly: Prob3,
    pub gaps: Vec<SignalGap>,
}

impl Prediction {
    pub fn stake_candidate(&self, fixture: &UpcomingFixture) -> StakeCandidate {
        StakeCandidate {
            fixture_id: self.fixture_id.clone(),
            league: self.league.clone(),
            probs: self.probs,
            odds: self.odds,
            aux: fixture.aux.clone(),
        }
    }
}

/// Why a fixture's market triple is undefined, if it is.
pub fn market_gap(odds: &Odds) -> Option<SignalGap> {
    let Some((home, draw, away)) = odds.complete() else {
        return Some(SignalGap::MissingSignal);
    };
    let raw = [implied(Some(home)), implied(Some(draw)), implied(Some(away))];
    if raw.iter().any(|p| !p.is_finite()) {
        return Some(SignalGap::DegenerateInput);
    }
    None
}

/// Read-only view over the trained state. Owns nothing.
pub struct Predictor<'a> {
    pub book: &'a RatingBook,
    pub weights: &'a BlendWeights,
    pub calibrators: &'a CalibratorSet,
    pub cfg: &'a EngineConfig,
}

impl<'a> Predictor<'a> {
    pub fn new(
        book: &'a RatingBook,
        weights: &'a BlendWeights,
        calibrators: &'a CalibratorSet,
        cfg: &'a EngineConfig,
    ) -> Self {
        Self {
            book,
            weights,
            calibrators,
            cfg,
        }
    }

    pub fn predict(&self, fixture: &UpcomingFixture) -> Prediction {
        let mut gaps = Vec::new();
        let home_adv = self.cfg.elo.home_advantage(fixture.competition);
        if !self.book.contains(&fixture.home_team) || !self.book.contains(&fixture.away_team) {
            gaps.push(SignalGap::InsufficientData);
        }
        let model = self
            .book
            .match_probs(&fixture.home_team, &fixture.away_team, home_adv, &self.cfg.elo);
        let market = market_quote(&fixture.odds);
        match market_gap(&fixture.odds) {
            Some(gap) => {
                if gap == SignalGap::DegenerateInput {
                    tracing::warn!(
                        fixture = %fixture.fixture_id,
                        home = ?fixture.odds.home,
                        draw = ?fixture.odds.draw,
                        away = ?fixture.odds.away,
                        "unusable prices; falling back to the model"
                    );
                }
                if !gaps.contains(&gap) {
                    gaps.push(gap);
                }
            }
            None => {
                if let Some(margin) = overround(&fixture.odds)
                    && margin < 0.0
                {
                    tracing::warn!(fixture = %fixture.fixture_id, margin, "book prices sum below one");
                }
            }
        }

        let (probs, weight, calibrated) = if self.weights.is_model_only(&fixture.league) {
            (model, None, false)
        } else {
            let w = self.weights.weight_for(&fixture.league);
            let blended = blend(w, &market, &model);
            let weight = market.is_finite().then_some(w);
            match self.calibrators.for_league(&fixture.league) {
                Some(cal) => (cal.apply(&blended, self.cfg.calibration.prob_floor), weight, true),
                None => (blended, weight, false),
            }
        };

        if !probs.is_finite() {
            tracing::warn!(fixture = %fixture.fixture_id, "prediction degenerated to NaN");
        }
        let display = display_kelly(&probs, &fixture.odds, self.cfg.staking.display_kelly_cap);

        Prediction {
            fixture_id: fixture.fixture_id.clone(),
            date: fixture.date,
            league: fixture.league.clone(),
            home_team: fixture.home_team.clone(),
            away_team: fixture.away_team.clone(),
            model,
            market,
            weight,
            calibrated,
            probs,
            odds: fixture.odds,
            display_kelly: display,
            gaps,
        }
    }

    pub fn predict_all(&self, fixtures: &[UpcomingFixture]) -> Vec<Prediction> {
        let out: Vec<Prediction> = fixtures.iter().map(|f| self.predict(f)).collect();
        let gapped = out.iter().filter(|p| !p.gaps.is_empty()).count();
        tracing::info!(fixtures = out.len(), with_gaps = gapped, "predictions ready");
        out
    }
}
