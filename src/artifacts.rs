use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::blend::BlendWeights;
use crate::calibration::CalibratorSet;
use crate::error::{EngineError, Result};
use crate::records::MatchRecord;
use crate::training::TrainedModel;

pub const ARTIFACT_VERSION: u32 = 1;

/// Learned parameters from one training run. Replaced wholesale on
/// retraining; carries no timestamp so identical history gives identical
/// bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedArtifacts {
    pub version: u32,
    pub fingerprint: String,
    pub rows_total: usize,
    pub rows_resolved: usize,
    pub rows_with_market: usize,
    pub blend: BlendWeights,
    pub calibrators: CalibratorSet,
}

impl TrainedArtifacts {
    pub fn from_model(history: &[MatchRecord], model: &TrainedModel) -> Self {
        Self {
            version: ARTIFACT_VERSION,
            fingerprint: history_fingerprint(history),
            rows_total: model.frame.rows_total,
            rows_resolved: model.frame.rows_resolved,
            rows_with_market: model.frame.rows_with_market,
            blend: model.weights.clone(),
            calibrators: model.calibrators.clone(),
        }
    }

    pub fn matches_history(&self, history: &[MatchRecord]) -> bool {
        self.fingerprint == history_fingerprint(history)
    }
}

fn opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.6}")).unwrap_or_default()
}

/// SHA-256 over a canonical rendering of every row, base64 encoded.
pub fn history_fingerprint(history: &[MatchRecord]) -> String {
    let mut hasher = Sha256::new();
    for m in history {
        let (hg, ag) = match m.result {
            Some(s) => (s.home.to_string(), s.away.to_string()),
            None => (String::new(), String::new()),
        };
        let line = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}\n",
            m.date,
            m.league,
            m.competition.as_str(),
            m.home_team,
            m.away_team,
            hg,
            ag,
            opt(m.odds.home),
            opt(m.odds.draw),
            opt(m.odds.away),
        );
        hasher.update(line.as_bytes());
    }
    BASE64.encode(hasher.finalize())
}

pub fn save_artifacts(path: &Path, artifacts: &TrainedArtifacts) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(artifacts)?;
    fs::write(&tmp, json).map_err(|e| EngineError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| EngineError::io(path, e))?;
    Ok(())
}

pub fn load_artifacts(path: &Path) -> Result<TrainedArtifacts> {
    let raw = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
    let artifacts: TrainedArtifacts = serde_json::from_str(&raw)?;
    if artifacts.version != ARTIFACT_VERSION {
        return Err(EngineError::Config(format!(
            "artifact version {} is not supported (expected {ARTIFACT_VERSION})",
            artifacts.version
        )));
    }
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::synthetic::{SyntheticLeague, generate_history};
    use crate::training::train;

    #[test]
    fn fingerprint_tracks_content() {
        let history = generate_history(&[SyntheticLeague::new("A", 6, 1)], 1);
        let a = history_fingerprint(&history);
        assert_eq!(a, history_fingerprint(&history));
        let mut edited = history.clone();
        edited[0].result = None;
        assert_ne!(a, history_fingerprint(&edited));
    }

    #[test]
    fn save_then_load_restores_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("artifacts.json");
        let history = generate_history(&[SyntheticLeague::new("A", 8, 2)], 4);
        let model = train(&history, &EngineConfig::default());
        let artifacts = TrainedArtifacts::from_model(&history, &model);

        save_artifacts(&path, &artifacts).expect("save");
        assert!(!path.with_extension("json.tmp").exists());
        let loaded = load_artifacts(&path).expect("load");
        assert_eq!(loaded.blend, artifacts.blend);
        assert_eq!(loaded.fingerprint, artifacts.fingerprint);
        assert!(loaded.matches_history(&history));
    }

    #[test]
    fn retraining_identical_history_writes_identical_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = generate_history(&[SyntheticLeague::new("A", 8, 2)], 9);
        let cfg = EngineConfig::default();
        let first = dir.path().join("a.json");
        let second = dir.path().join("b.json");
        save_artifacts(&first, &TrainedArtifacts::from_model(&history, &train(&history, &cfg))).expect("save");
        save_artifacts(&second, &TrainedArtifacts::from_model(&history, &train(&history, &cfg))).expect("save");
        assert_eq!(
            fs::read(&first).expect("read"),
            fs::read(&second).expect("read")
        );
    }
}
