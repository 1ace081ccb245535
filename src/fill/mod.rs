//! Maker-order fill probability: logistic estimator, micro-volatility proxy
//! and the feedback calibrator that tunes the estimator online.

pub mod calibrator;
pub mod estimator;
pub mod volatility;

pub use calibrator::{CalibrationSummary, FeedbackApplied, FillCalibrator};
pub use estimator::{estimate, estimate_with_override, Features, FillInputs, FillModelParameters};
pub use volatility::{micro_volatility, MidHistory};

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::WatchError;
use crate::events::{FillOutcome, Leg};
use crate::types::{Instrument, MarketSnapshot};

/// Shared fill model used by the evaluation loop and feedback callers.
#[derive(Debug, Default)]
pub struct FillModel {
    calibrator: FillCalibrator,
    history: MidHistory,
    /// Set by feedback; cleared when the watch loop persists the parameters.
    dirty: AtomicBool,
}

impl FillModel {
    pub fn new(params: FillModelParameters) -> Self {
        Self {
            calibrator: FillCalibrator::new(params),
            history: MidHistory::default(),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn record_mid(&self, snap: &MarketSnapshot) {
        self.history.record(&snap.instrument, snap.mid);
    }

    pub fn volatility(&self, instrument: &Instrument) -> f64 {
        self.history.volatility(instrument)
    }

    pub fn inputs_for(&self, snap: &MarketSnapshot, spread_bps: f64, offset_bps: f64, order_size: f64) -> FillInputs {
        FillInputs {
            spread_bps,
            depth: snap.depth,
            order_size,
            volatility: self.volatility(&snap.instrument),
            offset_bps,
            sentiment: snap.sentiment,
        }
    }

    /// Published probability for one leg; an override wins over the model.
    pub fn probability(&self, inputs: &FillInputs, override_probability: Option<f64>) -> f64 {
        estimate_with_override(inputs, &self.calibrator.params(), override_probability)
    }

    /// Remember the model's own estimate for a dispatched leg so feedback can
    /// be applied later, whether or not an override was published.
    pub fn register(&self, trade_id: &str, leg: Leg, inputs: &FillInputs) {
        let modelled = estimate(inputs, &self.calibrator.params());
        self.calibrator
            .register(trade_id, leg, Features::from_inputs(inputs), modelled);
    }

    pub fn submit(&self, trade_id: &str, leg: Leg, outcome: FillOutcome) -> Result<FeedbackApplied, WatchError> {
        let applied = self.calibrator.submit(trade_id, leg, outcome)?;
        self.dirty.store(true, Ordering::SeqCst);
        Ok(applied)
    }

    /// Whether parameters changed through feedback since the last call.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    pub fn params(&self) -> FillModelParameters {
        self.calibrator.params()
    }

    pub fn restore(&self, params: FillModelParameters) {
        self.calibrator.restore(params);
    }

    pub fn summary(&self) -> CalibrationSummary {
        self.calibrator.summary()
    }

    pub fn retain_instruments(&self, keep: impl Fn(&Instrument) -> bool) {
        self.history.retain(keep);
    }
}
