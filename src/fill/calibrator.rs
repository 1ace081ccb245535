//! Online calibration of the fill model from realized maker-order outcomes.
//!
//! Every published estimate is remembered under `(trade_id, leg)`. When the
//! outcome arrives the logistic coefficients take one bounded gradient step
//! on the log loss, then get projected back inside their sign constraints.
//! Reads and updates share one `RwLock`, so an estimate never observes a
//! half-applied update.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::estimator::{model_probability, Features, FillModelParameters};
use crate::error::WatchError;
use crate::events::{FillOutcome, Leg};
use crate::metrics::stats::FeedbackCounters;

pub const DEFAULT_LEARNING_RATE: f64 = 0.1;
pub const DEFAULT_MAX_PENDING: usize = 1024;
const BIAS_SMOOTHING: f64 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq)]
struct PendingEstimate {
    features: Features,
    predicted: f64,
}

/// Result of applying one feedback sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackApplied {
    pub trade_id: String,
    pub leg: Leg,
    pub predicted: f64,
    pub outcome: FillOutcome,
    pub params: FillModelParameters,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSummary {
    pub params: FillModelParameters,
    pub feedback: FeedbackCounters,
    pub observed_fill_rate: f64,
    /// Smoothed `predicted - realized`; positive means the model is optimistic.
    pub mean_bias: f64,
    pub pending: usize,
}

#[derive(Debug, Default)]
struct Ledger {
    pending: HashMap<(String, Leg), PendingEstimate>,
    order: VecDeque<(String, Leg)>,
    counters: FeedbackCounters,
    mean_bias: f64,
}

#[derive(Debug)]
pub struct FillCalibrator {
    params: Arc<RwLock<FillModelParameters>>,
    ledger: Mutex<Ledger>,
    learning_rate: f64,
    max_pending: usize,
}

impl Default for FillCalibrator {
    fn default() -> Self {
        Self::new(FillModelParameters::default())
    }
}

impl FillCalibrator {
    pub fn new(params: FillModelParameters) -> Self {
        Self::with_learning_rate(params, DEFAULT_LEARNING_RATE, DEFAULT_MAX_PENDING)
    }

    pub fn with_learning_rate(mut params: FillModelParameters, learning_rate: f64, max_pending: usize) -> Self {
        params.project();
        Self {
            params: Arc::new(RwLock::new(params)),
            ledger: Mutex::new(Ledger::default()),
            learning_rate: if learning_rate.is_finite() { learning_rate.clamp(0.0, 1.0) } else { DEFAULT_LEARNING_RATE },
            max_pending: max_pending.max(1),
        }
    }

    /// Consistent copy of the current coefficients.
    pub fn params(&self) -> FillModelParameters {
        self.params.read().clone()
    }

    /// Replace the coefficients, e.g. from persisted state.
    pub fn restore(&self, mut params: FillModelParameters) {
        params.project();
        *self.params.write() = params;
    }

    /// Remember an estimate so its outcome can be fed back later. The oldest
    /// pending estimate is forgotten once the ledger is full.
    pub fn register(&self, trade_id: &str, leg: Leg, features: Features, predicted: f64) {
        let mut ledger = self.ledger.lock();
        let key = (trade_id.to_string(), leg);
        if ledger
            .pending
            .insert(key.clone(), PendingEstimate { features, predicted })
            .is_none()
        {
            ledger.order.push_back(key);
        }
        while ledger.pending.len() > self.max_pending {
            let Some(oldest) = ledger.order.pop_front() else { break };
            ledger.pending.remove(&oldest);
        }
    }

    pub fn is_pending(&self, trade_id: &str, leg: Leg) -> bool {
        self.ledger.lock().pending.contains_key(&(trade_id.to_string(), leg))
    }

    /// Apply one realized outcome. Each pending estimate accepts exactly one.
    pub fn submit(&self, trade_id: &str, leg: Leg, outcome: FillOutcome) -> Result<FeedbackApplied, WatchError> {
        let key = (trade_id.to_string(), leg);
        let estimate = {
            let mut ledger = self.ledger.lock();
            let estimate = ledger.pending.remove(&key).ok_or_else(|| WatchError::UnknownFeedback {
                trade_id: trade_id.to_string(),
                leg,
            })?;
            ledger.order.retain(|k| k != &key);
            match outcome {
                FillOutcome::Filled => ledger.counters.filled += 1,
                FillOutcome::Missed => ledger.counters.missed += 1,
            }
            let err = estimate.predicted - outcome.as_target();
            ledger.mean_bias += BIAS_SMOOTHING * (err - ledger.mean_bias);
            estimate
        };

        let params = {
            let mut params = self.params.write();
            let f = estimate.features;
            let step = self.learning_rate * (outcome.as_target() - model_probability(&f, &params));
            params.intercept += step;
            params.spread_coef += step * f.spread;
            params.depth_coef += step * f.depth_ratio;
            params.volatility_coef += step * f.volatility;
            params.offset_coef += step * f.offset;
            params.updates += 1;
            params.project();
            params.clone()
        };

        tracing::debug!(
            trade_id,
            leg = %leg,
            predicted = estimate.predicted,
            outcome = ?outcome,
            updates = params.updates,
            "fill feedback applied"
        );

        Ok(FeedbackApplied {
            trade_id: trade_id.to_string(),
            leg,
            predicted: estimate.predicted,
            outcome,
            params,
        })
    }

    pub fn summary(&self) -> CalibrationSummary {
        let params = self.params();
        let ledger = self.ledger.lock();
        CalibrationSummary {
            params,
            observed_fill_rate: ledger.counters.observed_fill_rate(),
            feedback: ledger.counters.clone(),
            mean_bias: ledger.mean_bias,
            pending: ledger.pending.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fill::estimator::{estimate, FillInputs, MIN_PROBABILITY};

    fn inputs() -> FillInputs {
        FillInputs {
            spread_bps: 2.0,
            depth: 5_000.0,
            order_size: 1_000.0,
            volatility: 0.0,
            offset_bps: 10.0,
            sentiment: None,
        }
    }

    fn round(cal: &FillCalibrator, i: usize, outcome: FillOutcome) {
        let id = format!("t{i}");
        let p = estimate(&inputs(), &cal.params());
        cal.register(&id, Leg::Open, Features::from_inputs(&inputs()), p);
        cal.submit(&id, Leg::Open, outcome).unwrap();
    }

    #[test]
    fn bias_shrinks_toward_realized_rate() {
        let cal = FillCalibrator::default();
        let before = estimate(&inputs(), &cal.params());
        for i in 0..400 {
            let outcome = if i % 10 < 3 { FillOutcome::Filled } else { FillOutcome::Missed };
            round(&cal, i, outcome);
        }
        let after = estimate(&inputs(), &cal.params());
        assert!((after - 0.3).abs() < (before - 0.3).abs());
        assert!((after - 0.3).abs() < 0.15, "after = {after}");

        let summary = cal.summary();
        assert_eq!(summary.feedback.total(), 400);
        assert!((summary.observed_fill_rate - 0.3).abs() < 1e-12);
        assert_eq!(summary.params.updates, 400);
    }

    #[test]
    fn constraints_hold_under_one_sided_feedback() {
        let cal = FillCalibrator::default();
        for i in 0..2_000 {
            round(&cal, i, FillOutcome::Missed);
        }
        let params = cal.params();
        assert!(params.is_within_bounds());
        assert_eq!(estimate(&inputs(), &params), MIN_PROBABILITY);
    }

    #[test]
    fn unknown_or_repeated_feedback_is_rejected() {
        let cal = FillCalibrator::default();
        let err = cal.submit("nope", Leg::Close, FillOutcome::Filled).unwrap_err();
        assert!(matches!(err, WatchError::UnknownFeedback { .. }));

        cal.register("a", Leg::Open, Features::from_inputs(&inputs()), 0.5);
        assert!(cal.submit("a", Leg::Close, FillOutcome::Filled).is_err());
        assert!(cal.submit("a", Leg::Open, FillOutcome::Filled).is_ok());
        assert!(cal.submit("a", Leg::Open, FillOutcome::Filled).is_err());
        assert_eq!(cal.params().updates, 1);
    }

    #[test]
    fn pending_ledger_is_bounded() {
        let cal = FillCalibrator::with_learning_rate(FillModelParameters::default(), 0.1, 3);
        let f = Features::from_inputs(&inputs());
        for i in 0..5 {
            cal.register(&format!("t{i}"), Leg::Open, f, 0.5);
        }
        assert!(!cal.is_pending("t0", Leg::Open));
        assert!(!cal.is_pending("t1", Leg::Open));
        assert!(cal.is_pending("t4", Leg::Open));
        assert_eq!(cal.summary().pending, 3);
    }
}
