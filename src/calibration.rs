use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::blend::{BlendSample, BlendWeights, blend};
use crate::prob::{Outcome, Prob3};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Most recent share of scorable rows used as the fitting window.
    pub tail_fraction: f64,
    pub min_league_rows: usize,
    pub min_tail_samples: usize,
    /// Floor applied to each mapped component before renormalizing.
    pub prob_floor: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            tail_fraction: 0.20,
            min_league_rows: 200,
            min_tail_samples: 30,
            prob_floor: 1e-6,
        }
    }
}

/// Monotone non-decreasing step-and-ramp mapping learned by
/// pool-adjacent-violators. Knots are linearly interpolated; inputs outside
/// `[xs[0], xs[last]]` are clipped to the fitted domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicMap {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

impl IsotonicMap {
    pub fn apply(&self, x: f64) -> f64 {
        if !x.is_finite() || self.xs.is_empty() {
            return f64::NAN;
        }
        let last = self.xs.len() - 1;
        if x <= self.xs[0] {
            return self.ys[0];
        }
        if x >= self.xs[last] {
            return self.ys[last];
        }
        // First knot strictly greater than x; x is interior so 1..=last.
        let hi = self.xs.partition_point(|k| *k <= x);
        let lo = hi - 1;
        let (x0, x1) = (self.xs[lo], self.xs[hi]);
        let (y0, y1) = (self.ys[lo], self.ys[hi]);
        if x1 <= x0 {
            return y1;
        }
        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
    }

    pub fn domain(&self) -> Option<(f64, f64)> {
        Some((*self.xs.first()?, *self.xs.last()?))
    }
}

/// Weighted PAV over `(x, y)` pairs. Returns `None` for an empty or
/// all-non-finite input.
pub fn fit_isotonic(points: &[(f64, f64)]) -> Option<IsotonicMap> {
    let mut pts: Vec<(f64, f64)> = points
        .iter()
        .copied()
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();
    if pts.is_empty() {
        return None;
    }
    pts.sort_by(|a, b| a.0.total_cmp(&b.0));

    // Collapse ties in x into one weighted point.
    let mut xs: Vec<f64> = Vec::new();
    let mut sums: Vec<f64> = Vec::new();
    let mut counts: Vec<f64> = Vec::new();
    for (x, y) in pts {
        if xs.last() == Some(&x) {
            let i = xs.len() - 1;
            sums[i] += y;
            counts[i] += 1.0;
        } else {
            xs.push(x);
            sums.push(y);
            counts.push(1.0);
        }
    }

    // Blocks of (value, weight, first index, last index).
    let mut blocks: Vec<(f64, f64, usize, usize)> = Vec::with_capacity(xs.len());
    for i in 0..xs.len() {
        blocks.push((sums[i] / counts[i], counts[i], i, i));
        while blocks.len() > 1 {
            let n = blocks.len();
            if blocks[n - 2].0 <= blocks[n - 1].0 {
                break;
            }
            let (v2, w2, _, end) = blocks[n - 1];
            let (v1, w1, start, _) = blocks[n - 2];
            let w = w1 + w2;
            blocks.truncate(n - 2);
            blocks.push(((v1 * w1 + v2 * w2) / w, w, start, end));
        }
    }

    let mut ys = vec![0.0; xs.len()];
    for (value, _, start, end) in &blocks {
        for y in &mut ys[*start..=*end] {
            *y = *value;
        }
    }

    // Interior points of flat runs carry no information for interpolation.
    let mut kx = Vec::with_capacity(xs.len());
    let mut ky = Vec::with_capacity(xs.len());
    for i in 0..xs.len() {
        let flat_before = i > 0 && ys[i - 1] == ys[i];
        let flat_after = i + 1 < xs.len() && ys[i + 1] == ys[i];
        if flat_before && flat_after {
            continue;
        }
        kx.push(xs[i]);
        ky.push(ys[i]);
    }
    Some(IsotonicMap { xs: kx, ys: ky })
}

/// One-vs-rest mappings for the three outcomes. A missing mapping passes
/// its component through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassCalibrators {
    pub home: Option<IsotonicMap>,
    pub draw: Option<IsotonicMap>,
    pub away: Option<IsotonicMap>,
    #[serde(default)]
    pub samples: usize,
}

impl ClassCalibrators {
    pub fn get(&self, class: Outcome) -> Option<&IsotonicMap> {
        match class {
            Outcome::Home => self.home.as_ref(),
            Outcome::Draw => self.draw.as_ref(),
            Outcome::Away => self.away.as_ref(),
        }
    }

    fn slot(&mut self, class: Outcome) -> &mut Option<IsotonicMap> {
        match class {
            Outcome::Home => &mut self.home,
            Outcome::Draw => &mut self.draw,
            Outcome::Away => &mut self.away,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        self.home.is_none() && self.draw.is_none() && self.away.is_none()
    }

    pub fn apply(&self, p: &Prob3, floor: f64) -> Prob3 {
        if !p.is_finite() {
            return *p;
        }
        let mut out = *p;
        for class in Outcome::ALL {
            if let Some(map) = self.get(class) {
                out = out.with(class, map.apply(p.get(class)));
            }
        }
        let floored = Prob3::new(out.home.max(floor), out.draw.max(floor), out.away.max(floor));
        floored.normalized()
    }
}

/// Fits the three class maps on `(blended, outcome)` pairs. `None` when the
/// window is too small; classes with a constant target stay unmapped.
pub fn fit_class_calibrators(
    rows: &[(Prob3, Outcome)],
    cfg: &CalibrationConfig,
) -> Option<ClassCalibrators> {
    if rows.len() < cfg.min_tail_samples {
        return None;
    }
    let mut out = ClassCalibrators {
        samples: rows.len(),
        ..ClassCalibrators::default()
    };
    for class in Outcome::ALL {
        let points: Vec<(f64, f64)> = rows
            .iter()
            .map(|(p, o)| (p.get(class), if *o == class { 1.0 } else { 0.0 }))
            .collect();
        let hits = points.iter().filter(|(_, y)| *y > 0.5).count();
        if hits == 0 || hits == points.len() {
            continue;
        }
        *out.slot(class) = fit_isotonic(&points);
    }
    Some(out)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibratorSet {
    pub global: Option<ClassCalibrators>,
    #[serde(default)]
    pub leagues: BTreeMap<String, ClassCalibrators>,
}

impl CalibratorSet {
    pub fn for_league(&self, league: &str) -> Option<&ClassCalibrators> {
        self.leagues.get(league).or(self.global.as_ref())
    }

    /// League mapping, else global, else the input unchanged.
    pub fn apply(&self, league: &str, p: &Prob3, floor: f64) -> Prob3 {
        match self.for_league(league) {
            Some(cal) => cal.apply(p, floor),
            None => *p,
        }
    }
}

/// Chronological tail: the last `fraction` of the input, at least one row.
pub fn tail_start(len: usize, fraction: f64) -> usize {
    if len == 0 {
        return 0;
    }
    let keep = ((len as f64) * fraction.clamp(0.0, 1.0)).ceil() as usize;
    len - keep.clamp(1, len)
}

/// Fits the global set on the combined tail and per-league sets for leagues
/// with enough resolved history. Only rows with a defined market are used.
/// `samples` must already be in chronological order.
pub fn fit_calibrator_set(
    samples: &[BlendSample],
    weights: &BlendWeights,
    cfg: &CalibrationConfig,
) -> CalibratorSet {
    let scorable: Vec<&BlendSample> = samples.iter().filter(|s| s.has_market()).collect();
    let to_pair = |s: &&BlendSample| {
        (
            blend(weights.weight_for(&s.league), &s.market, &s.model),
            s.outcome,
        )
    };

    let start = tail_start(scorable.len(), cfg.tail_fraction);
    let global_rows: Vec<(Prob3, Outcome)> = scorable[start..].iter().map(to_pair).collect();
    let global = fit_class_calibrators(&global_rows, cfg);

    let mut resolved: HashMap<&str, usize> = HashMap::new();
    let mut by_league: BTreeMap<&str, Vec<&BlendSample>> = BTreeMap::new();
    for s in samples {
        *resolved.entry(s.league.as_str()).or_default() += 1;
    }
    for s in &scorable {
        by_league.entry(s.league.as_str()).or_default().push(*s);
    }

    let mut leagues = BTreeMap::new();
    for (league, rows) in by_league {
        if resolved.get(league).copied().unwrap_or(0) < cfg.min_league_rows {
            continue;
        }
        let start = tail_start(rows.len(), cfg.tail_fraction);
        let pairs: Vec<(Prob3, Outcome)> = rows[start..].iter().map(to_pair).collect();
        match fit_class_calibrators(&pairs, cfg) {
            Some(cal) => {
                leagues.insert(league.to_string(), cal);
            }
            None => tracing::debug!(league, tail = pairs.len(), "league tail too small, using global"),
        }
    }

    CalibratorSet { global, leagues }
}
