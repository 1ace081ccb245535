use std::path::PathBuf;

use thiserror::Error;

use crate::events::Leg;
use crate::types::Instrument;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("configuration invalid: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("market data unavailable for {instrument}: {reason}")]
    DataUnavailable { instrument: Instrument, reason: String },
    #[error("invalid snapshot for {instrument}: {reason}")]
    InvalidSnapshot { instrument: Instrument, reason: String },
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("persisted state unreadable: {0}")]
    Schema(String),
    #[error("state persistence failed at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no pending fill estimate for trade {trade_id} leg {leg}")]
    UnknownFeedback { trade_id: String, leg: Leg },
}

impl WatchError {
    pub fn invalid_snapshot(instrument: &Instrument, reason: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            instrument: instrument.clone(),
            reason: reason.into(),
        }
    }
}
