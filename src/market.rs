use crate::prob::Prob3;
use crate::records::Odds;

/// Raw implied probability of a decimal price. NaN for missing, non-finite
/// or non-positive prices.
pub fn implied(price: Option<f64>) -> f64 {
    match price {
        Some(o) if o > 0.0 && o.is_finite() => 1.0 / o,
        _ => f64::NAN,
    }
}

/// Vig-stripped 1X2 probabilities. Total: any missing side, non-positive
/// price, or unusable sum yields the NaN triple.
pub fn market_quote(odds: &Odds) -> Prob3 {
    let raw = Prob3::new(implied(odds.home), implied(odds.draw), implied(odds.away));
    if !raw.is_finite() {
        return Prob3::nan();
    }
    raw.normalized()
}

/// Bookmaker margin, `sum(1/o) - 1`, when every side is usable.
pub fn overround(odds: &Odds) -> Option<f64> {
    let raw = Prob3::new(implied(odds.home), implied(odds.draw), implied(odds.away));
    let sum = raw.sum();
    if !sum.is_finite() || sum <= 0.0 {
        return None;
    }
    Some(sum - 1.0)
}

/// Two-way vig strip, used for BTTS and over/under pairs.
pub fn two_way_yes(yes: Option<f64>, no: Option<f64>) -> Option<f64> {
    let iy = implied(yes);
    let in_ = implied(no);
    let sum = iy + in_;
    if !sum.is_finite() || sum <= 0.0 {
        return None;
    }
    Some(iy / sum)
}

pub const ODDS_BUCKETS: [&str; 7] = [
    "<=1.8",
    "(1.8,2.2]",
    "(2.2,3.0]",
    "(3.0,5.0]",
    "(5.0,10.0]",
    "10+",
    "no_odds",
];

/// Price band label shared by backtest slices, ROI slices, and vetoes.
pub fn odds_bucket(price: Option<f64>) -> &'static str {
    match price {
        Some(o) if o.is_finite() && o > 0.0 => {
            if o <= 1.8 {
                ODDS_BUCKETS[0]
            } else if o <= 2.2 {
                ODDS_BUCKETS[1]
            } else if o <= 3.0 {
                ODDS_BUCKETS[2]
            } else if o <= 5.0 {
                ODDS_BUCKETS[3]
            } else if o <= 10.0 {
                ODDS_BUCKETS[4]
            } else {
                ODDS_BUCKETS[5]
            }
        }
        _ => ODDS_BUCKETS[6],
    }
}
