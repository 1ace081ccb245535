//! The long-running watcher: one engine task that fetches, scores, gates and
//! dispatches, plus the control surface used to drive and inspect it.

pub mod engine;
pub mod service;
pub mod source;

pub use engine::{DispatchGate, EngineDeps, Published, TickSummary, WatchEngine};
pub use service::{Lifecycle, Watcher, WatcherStatus};
pub use source::{MarketDataSource, SyntheticSource};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alert::{KeyState, Transition};
use crate::error::WatchError;
use crate::events::AlertDecision;
use crate::scoring::ScoreReport;
use crate::types::{Instrument, MarketSnapshot, WatchSide};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SideEvaluation {
    pub side: WatchSide,
    pub transition: Transition,
    pub state: KeyState,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InstrumentEvaluation {
    pub snapshot: MarketSnapshot,
    pub report: ScoreReport,
    pub volatility: f64,
    pub sides: Vec<SideEvaluation>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SkippedInstrument {
    pub instrument: Instrument,
    pub reason: String,
}

impl SkippedInstrument {
    pub fn new(instrument: &Instrument, err: &WatchError) -> Self {
        Self {
            instrument: instrument.clone(),
            reason: err.to_string(),
        }
    }
}

/// An instrument left out of the pass by an operator mute.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MutedInstrument {
    pub instrument: Instrument,
    pub until: DateTime<Utc>,
}

/// One full evaluation pass across the watch list.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub ts: DateTime<Utc>,
    pub instruments: Vec<InstrumentEvaluation>,
    pub skipped: Vec<SkippedInstrument>,
    pub muted: Vec<MutedInstrument>,
    /// Alerts the state machine released this pass, before rate limiting.
    pub candidates: Vec<AlertDecision>,
}

impl EvaluationReport {
    pub fn instrument(&self, instrument: &Instrument) -> Option<&InstrumentEvaluation> {
        self.instruments
            .iter()
            .find(|e| &e.snapshot.instrument == instrument)
    }
}
