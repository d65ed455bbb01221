use crate::blend::{BlendSample, BlendWeights, learn_blend_weights};
use crate::calibration::{CalibratorSet, fit_calibrator_set};
use crate::config::EngineConfig;
use crate::elo::{EloConfig, RatingBook, replay_history};
use crate::market::market_quote;
use crate::records::MatchRecord;

/// Output of one rating pass over a history table.
#[derive(Debug, Clone)]
pub struct TrainingFrame {
    /// Resolved rows in `(date, row)` order with pre-match signals.
    pub samples: Vec<BlendSample>,
    /// Ratings after the last row, ready for prediction.
    pub book: RatingBook,
    pub rows_total: usize,
    pub rows_resolved: usize,
    pub rows_with_market: usize,
}

pub fn build_frame(history: &[MatchRecord], cfg: &EloConfig) -> TrainingFrame {
    let replay = replay_history(history, RatingBook::new(cfg.initial_rating), cfg);

    let mut samples: Vec<BlendSample> = history
        .iter()
        .zip(&replay.pre_match)
        .filter_map(|(m, model)| {
            let outcome = m.outcome()?;
            Some(BlendSample {
                league: m.league.clone(),
                date: m.date,
                row: m.row,
                market: market_quote(&m.odds),
                model: *model,
                outcome,
            })
        })
        .collect();
    samples.sort_by(|a, b| a.date.cmp(&b.date).then(a.row.cmp(&b.row)));

    let rows_with_market = samples.iter().filter(|s| s.has_market()).count();
    TrainingFrame {
        rows_total: history.len(),
        rows_resolved: samples.len(),
        rows_with_market,
        samples,
        book: replay.book,
    }
}

/// Blend weights then calibrators, both from the same chronological samples.
pub fn fit_from_samples(samples: &[BlendSample], cfg: &EngineConfig) -> (BlendWeights, CalibratorSet) {
    let weights = learn_blend_weights(samples, &cfg.blend);
    let calibrators = fit_calibrator_set(samples, &weights, &cfg.calibration);
    (weights, calibrators)
}

#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub frame: TrainingFrame,
    pub weights: BlendWeights,
    pub calibrators: CalibratorSet,
}

pub fn train(history: &[MatchRecord], cfg: &EngineConfig) -> TrainedModel {
    let frame = build_frame(history, &cfg.elo);
    let (weights, calibrators) = fit_from_samples(&frame.samples, cfg);

    tracing::info!(
        rows = frame.rows_total,
        resolved = frame.rows_resolved,
        priced = frame.rows_with_market,
        teams = frame.book.len(),
        "rating pass complete"
    );
    tracing::info!(
        global_weight = weights.global,
        league_overrides = weights.leagues.len(),
        model_only = weights.model_only.len(),
        "blend weights learned"
    );
    tracing::info!(
        global = calibrators.global.is_some(),
        leagues = calibrators.leagues.len(),
        "calibrators fitted"
    );
    if frame.rows_with_market == 0 {
        tracing::warn!("no priced history rows; using default blend weight and no calibration");
    }

    TrainedModel {
        frame,
        weights,
        calibrators,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{SyntheticLeague, generate_history};

    #[test]
    fn frame_counts_rows() {
        let history = generate_history(&[SyntheticLeague::new("Alpha", 8, 2)], 7);
        let frame = build_frame(&history, &EloConfig::default());
        assert_eq!(frame.rows_total, history.len());
        assert_eq!(frame.rows_resolved, history.iter().filter(|m| m.is_resolved()).count());
        assert!(frame.rows_with_market <= frame.rows_resolved);
        assert!(frame.samples.windows(2).all(|w| (w[0].date, w[0].row) <= (w[1].date, w[1].row)));
    }

    #[test]
    fn training_is_deterministic() {
        let history = generate_history(&[SyntheticLeague::new("Alpha", 10, 3)], 11);
        let cfg = EngineConfig::default();
        let a = train(&history, &cfg);
        let b = train(&history, &cfg);
        assert_eq!(a.weights, b.weights);
        assert_eq!(a.calibrators, b.calibrators);
    }
}
