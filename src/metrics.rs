use serde::Serialize;

use crate::prob::{Outcome, Prob3, log_loss};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

impl Metrics {
    pub fn empty() -> Self {
        Self {
            samples: 0,
            brier: f64::NAN,
            log_loss: f64::NAN,
            accuracy: f64::NAN,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

/// Multiclass Brier, mean log-loss and argmax accuracy. Rows whose
/// prediction is not finite are skipped rather than poisoning the means.
pub fn evaluate_probs(predictions: &[Prob3], outcomes: &[Outcome]) -> Metrics {
    if predictions.len() != outcomes.len() {
        return Metrics::empty();
    }

    let mut n = 0usize;
    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;

    for (p, outcome) in predictions.iter().zip(outcomes) {
        if !p.is_finite() {
            continue;
        }
        let y = Prob3::one_hot(*outcome);
        brier_sum +=
            (p.home - y.home).powi(2) + (p.draw - y.draw).powi(2) + (p.away - y.away).powi(2);
        log_loss_sum += log_loss(p, *outcome);
        if p.argmax() == *outcome {
            correct += 1;
        }
        n += 1;
    }

    if n == 0 {
        return Metrics::empty();
    }
    let nf = n as f64;
    Metrics {
        samples: n,
        brier: brier_sum / nf,
        log_loss: log_loss_sum / nf,
        accuracy: correct as f64 / nf,
    }
}

/// Equal-width reliability bins for one class, one-vs-rest.
pub fn calibration_bins(
    predictions: &[Prob3],
    outcomes: &[Outcome],
    class: Outcome,
    bins: usize,
) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let class_prob = p.get(class);
        if !class_prob.is_finite() {
            continue;
        }
        let class_prob = class_prob.clamp(0.0, 1.0);
        let idx = ((class_prob * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += class_prob;
        if *outcome == class {
            actual_sum[idx] += 1.0;
        }
    }

    (0..bins)
        .map(|i| {
            let count = counts[i];
            let (avg_pred, actual_rate) = if count > 0 {
                (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
            } else {
                (0.0, 0.0)
            };
            CalibrationBin {
                bucket_start: i as f64 / bins as f64,
                bucket_end: (i + 1) as f64 / bins as f64,
                count,
                avg_pred,
                actual_rate,
            }
        })
        .collect()
}

/// Expected calibration error for one class:
/// `sum_bin |avg_pred - avg_actual| * bin_weight`.
pub fn ece_class(predictions: &[Prob3], outcomes: &[Outcome], class: Outcome, bins: usize) -> f64 {
    let rows = calibration_bins(predictions, outcomes, class, bins);
    let total: usize = rows.iter().map(|b| b.count).sum();
    if total == 0 {
        return f64::NAN;
    }
    rows.iter()
        .filter(|b| b.count > 0)
        .map(|b| (b.count as f64 / total as f64) * (b.avg_pred - b.actual_rate).abs())
        .sum()
}

/// ECE averaged over the three outcome classes.
pub fn ece_1x2(predictions: &[Prob3], outcomes: &[Outcome], bins: usize) -> f64 {
    if predictions.is_empty() || predictions.len() != outcomes.len() || bins == 0 {
        return f64::NAN;
    }
    let per_class: Vec<f64> = Outcome::ALL
        .iter()
        .map(|c| ece_class(predictions, outcomes, *c, bins))
        .filter(|v| v.is_finite())
        .collect();
    if per_class.is_empty() {
        return f64::NAN;
    }
    per_class.iter().sum::<f64>() / per_class.len() as f64
}
