use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backtest::BacktestConfig;
use crate::blend::BlendConfig;
use crate::calibration::CalibrationConfig;
use crate::elo::EloConfig;
use crate::error::{EngineError, Result};
use crate::signals::SignalConfig;
use crate::staking::StakingConfig;

pub const CONFIG_ENV: &str = "KICKOFF_CONFIG";

/// Every tunable constant in one place. Partial TOML files are fine; missing
/// sections and keys keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub elo: EloConfig,
    pub blend: BlendConfig,
    pub calibration: CalibrationConfig,
    pub signals: SignalConfig,
    pub staking: StakingConfig,
    pub backtest: BacktestConfig,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        Self::from_toml_str(&raw)
    }

    /// Explicit path, else `KICKOFF_CONFIG`, else defaults. Env overrides
    /// are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let mut cfg = match path.map(Path::to_path_buf).or(from_env) {
            Some(p) => {
                tracing::info!(path = %p.display(), "loading config");
                Self::from_file(&p)?
            }
            None => Self::default(),
        };
        cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// `lookup` is injected so tests do not touch the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env_f64(&lookup, "KICKOFF_PER_BET_CAP")? {
            self.staking.per_bet_cap = v;
        }
        if let Some(v) = parse_env_f64(&lookup, "KICKOFF_DAILY_CAP")? {
            self.staking.daily_cap = v;
        }
        if let Some(v) = parse_env_f64(&lookup, "KICKOFF_CLUSTER_TARGET")? {
            self.staking.cluster_target = v;
        }
        if let Some(v) = parse_env_f64(&lookup, "KICKOFF_K_FACTOR")? {
            self.elo.k = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: &str| Err(EngineError::Config(msg.to_string()));
        if !(self.elo.k.is_finite() && self.elo.k >= 0.0) {
            return bad("elo.k must be finite and non-negative");
        }
        if !(0.0..1.0 / 3.0).contains(&self.elo.prob_floor) {
            return bad("elo.prob_floor must be in [0, 1/3)");
        }
        let b = &self.blend;
        if !(0.0..=1.0).contains(&b.grid_min) || !(0.0..=1.0).contains(&b.grid_max) || b.grid_min > b.grid_max {
            return bad("blend grid bounds must satisfy 0 <= grid_min <= grid_max <= 1");
        }
        if !(b.grid_step > 0.0) {
            return bad("blend.grid_step must be positive");
        }
        if !(0.0..=1.0).contains(&b.default_weight) {
            return bad("blend.default_weight must be in [0, 1]");
        }
        if !(self.calibration.tail_fraction > 0.0 && self.calibration.tail_fraction <= 1.0) {
            return bad("calibration.tail_fraction must be in (0, 1]");
        }
        let s = &self.staking;
        for (name, v) in [
            ("staking.per_bet_cap", s.per_bet_cap),
            ("staking.daily_cap", s.daily_cap),
            ("staking.kelly_cap", s.kelly_cap),
            ("staking.display_kelly_cap", s.display_kelly_cap),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(EngineError::Config(format!("{name} must be in [0, 1], got {v}")));
            }
        }
        if !(s.cluster_target >= 1.0) {
            return bad("staking.cluster_target must be at least 1");
        }
        let sig = &self.signals;
        for (name, v) in [
            ("signals.contradiction_penalty", sig.contradiction_penalty),
            ("signals.thin_market_penalty", sig.thin_market_penalty),
            ("signals.divergence_penalty", sig.divergence_penalty),
        ] {
            if !(v > 0.0 && v <= 1.0) {
                return Err(EngineError::Config(format!("{name} must be in (0, 1], got {v}")));
            }
        }
        if sig.tier_scale.iter().any(|v| !(*v > 0.0 && *v <= 1.0)) {
            return bad("signals.tier_scale entries must be in (0, 1]");
        }
        Ok(())
    }
}

fn parse_env_f64<F>(lookup: &F, key: &str) -> Result<Option<f64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| EngineError::Config(format!("{key}={raw} is not a number"))),
        _ => Ok(None),
    }
}

/// Loads `.env.local` then `.env`; earlier files win, missing files are fine.
pub fn load_dotenv() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
}
