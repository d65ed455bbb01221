use serde::{Deserialize, Serialize};

/// Floor used when a probability feeds a logarithm.
pub const LOG_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

impl Outcome {
    pub const ALL: [Outcome; 3] = [Outcome::Home, Outcome::Draw, Outcome::Away];

    /// 0 = home, 1 = draw, 2 = away.
    pub fn index(self) -> usize {
        match self {
            Outcome::Home => 0,
            Outcome::Draw => 1,
            Outcome::Away => 2,
        }
    }

    /// Short selection label used in the stake table.
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Home => "H",
            Outcome::Draw => "D",
            Outcome::Away => "A",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "H" | "HOME" | "1" => Some(Outcome::Home),
            "D" | "DRAW" | "X" => Some(Outcome::Draw),
            "A" | "AWAY" | "2" => Some(Outcome::Away),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prob3 {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl Prob3 {
    pub fn new(home: f64, draw: f64, away: f64) -> Self {
        Self { home, draw, away }
    }

    pub fn uniform() -> Self {
        Self {
            home: 1.0 / 3.0,
            draw: 1.0 / 3.0,
            away: 1.0 / 3.0,
        }
    }

    /// The "no signal" triple.
    pub fn nan() -> Self {
        Self {
            home: f64::NAN,
            draw: f64::NAN,
            away: f64::NAN,
        }
    }

    pub fn get(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Home => self.home,
            Outcome::Draw => self.draw,
            Outcome::Away => self.away,
        }
    }

    pub fn with(mut self, outcome: Outcome, value: f64) -> Self {
        match outcome {
            Outcome::Home => self.home = value,
            Outcome::Draw => self.draw = value,
            Outcome::Away => self.away = value,
        }
        self
    }

    pub fn sum(&self) -> f64 {
        self.home + self.draw + self.away
    }

    pub fn is_finite(&self) -> bool {
        self.home.is_finite() && self.draw.is_finite() && self.away.is_finite()
    }

    /// Rescales to sum 1. Returns the NaN triple when the total is not a
    /// usable denominator.
    pub fn normalized(&self) -> Self {
        let sum = self.sum();
        if !sum.is_finite() || sum <= 0.0 {
            return Self::nan();
        }
        Self {
            home: self.home / sum,
            draw: self.draw / sum,
            away: self.away / sum,
        }
    }

    /// Convex mix `w * self + (1 - w) * other`.
    pub fn mix(&self, other: &Prob3, w: f64) -> Self {
        Self {
            home: w * self.home + (1.0 - w) * other.home,
            draw: w * self.draw + (1.0 - w) * other.draw,
            away: w * self.away + (1.0 - w) * other.away,
        }
    }

    pub fn argmax(&self) -> Outcome {
        if self.home >= self.draw && self.home >= self.away {
            Outcome::Home
        } else if self.draw >= self.away {
            Outcome::Draw
        } else {
            Outcome::Away
        }
    }

    pub fn one_hot(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Home => Self::new(1.0, 0.0, 0.0),
            Outcome::Draw => Self::new(0.0, 1.0, 0.0),
            Outcome::Away => Self::new(0.0, 0.0, 1.0),
        }
    }
}

pub fn classify_outcome(home_goals: u32, away_goals: u32) -> Outcome {
    if home_goals > away_goals {
        Outcome::Home
    } else if home_goals < away_goals {
        Outcome::Away
    } else {
        Outcome::Draw
    }
}

/// Negative log-likelihood of the realised outcome.
pub fn log_loss(p: &Prob3, outcome: Outcome) -> f64 {
    -p.get(outcome).clamp(LOG_FLOOR, 1.0).ln()
}
