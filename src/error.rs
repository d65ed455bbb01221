use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boundary failures: reading tables, writing outputs, artifacts, config.
/// The numeric core never produces these.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Table {table} is missing required column {column}")]
    MissingColumn { table: String, column: String },

    #[error("Invalid row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Why a prediction or stake degraded. Recorded, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalGap {
    /// A required input (odds side, rating history) is absent.
    MissingSignal,
    /// Too few rows to fit a league-specific parameter.
    InsufficientData,
    /// Input present but unusable: non-positive price, zero vig sum.
    DegenerateInput,
}

impl SignalGap {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingSignal => "missing_signal",
            Self::InsufficientData => "insufficient_data",
            Self::DegenerateInput => "degenerate_input",
        }
    }
}

impl fmt::Display for SignalGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
