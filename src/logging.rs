//! Tracing setup shared by every binary.
//!
//! - `RUST_LOG` sets the filter (default `info`).
//! - `LOG_FORMAT=json` switches stderr output to one JSON object per line.

use std::io;

use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Installs the global subscriber. Logs go to stderr so table output on
/// stdout stays clean. Safe to call twice; the second call is a no-op.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match LogFormat::from_env() {
        LogFormat::Pretty => fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .with_target(false)
            .compact()
            .try_init(),
        LogFormat::Json => fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .with_target(true)
            .json()
            .flatten_event(true)
            .try_init(),
    };
    if let Err(err) = result {
        tracing::debug!(%err, "subscriber already installed");
    }
}
