use serde::{Deserialize, Serialize};

pub const MIN_PROBABILITY: f64 = 0.01;
pub const MAX_PROBABILITY: f64 = 0.99;
/// Largest absolute nudge sentiment may apply to a probability.
pub const MAX_SENTIMENT_DELTA: f64 = 0.1;

const SPREAD_SCALE_BPS: f64 = 10.0;
const OFFSET_SCALE_BPS: f64 = 50.0;
const INTERCEPT_BOUND: f64 = 6.0;
const COEF_BOUND: f64 = 8.0;

/// Inputs for one maker-order fill estimate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FillInputs {
    pub spread_bps: f64,
    /// Resting depth near the touch (notional).
    pub depth: f64,
    /// Order notional.
    pub order_size: f64,
    /// Short-term volatility proxy in [0, 1].
    pub volatility: f64,
    /// Distance of the resting price away from the touch, in bps.
    pub offset_bps: f64,
    /// Optional sentiment bias in [-1, 1].
    pub sentiment: Option<f64>,
}

/// Normalized model features, each in [0, 1].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub spread: f64,
    pub depth_ratio: f64,
    pub volatility: f64,
    pub offset: f64,
}

fn unit(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl Features {
    pub fn from_inputs(inputs: &FillInputs) -> Self {
        let depth_ratio = if !(inputs.order_size > 0.0) {
            1.0
        } else if !(inputs.depth > 0.0) {
            0.0
        } else {
            let r = inputs.depth / inputs.order_size;
            r / (1.0 + r)
        };
        Self {
            spread: unit(inputs.spread_bps / SPREAD_SCALE_BPS),
            depth_ratio: unit(depth_ratio),
            volatility: unit(inputs.volatility),
            offset: unit(inputs.offset_bps / OFFSET_SCALE_BPS),
        }
    }
}

/// Coefficients of the logistic fill model. Sign constraints keep the model
/// monotone: spread, volatility and offset never help, depth never hurts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FillModelParameters {
    pub intercept: f64,
    pub spread_coef: f64,
    pub depth_coef: f64,
    pub volatility_coef: f64,
    pub offset_coef: f64,
    /// Probability delta per unit of sentiment, at most `MAX_SENTIMENT_DELTA`.
    pub sentiment_weight: f64,
    /// Number of feedback samples applied.
    pub updates: u64,
}

impl Default for FillModelParameters {
    fn default() -> Self {
        Self {
            intercept: 1.2,
            spread_coef: -1.0,
            depth_coef: 1.5,
            volatility_coef: -1.5,
            offset_coef: -2.0,
            sentiment_weight: 0.05,
            updates: 0,
        }
    }
}

impl FillModelParameters {
    pub fn logit(&self, f: &Features) -> f64 {
        self.intercept
            + self.spread_coef * f.spread
            + self.depth_coef * f.depth_ratio
            + self.volatility_coef * f.volatility
            + self.offset_coef * f.offset
    }

    /// Pull every coefficient back inside its sign and magnitude bounds.
    pub fn project(&mut self) {
        let clean = |v: f64, lo: f64, hi: f64| if v.is_finite() { v.clamp(lo, hi) } else { 0.0 };
        self.intercept = clean(self.intercept, -INTERCEPT_BOUND, INTERCEPT_BOUND);
        self.spread_coef = clean(self.spread_coef, -COEF_BOUND, 0.0);
        self.depth_coef = clean(self.depth_coef, 0.0, COEF_BOUND);
        self.volatility_coef = clean(self.volatility_coef, -COEF_BOUND, 0.0);
        self.offset_coef = clean(self.offset_coef, -COEF_BOUND, 0.0);
        self.sentiment_weight = clean(self.sentiment_weight, 0.0, MAX_SENTIMENT_DELTA);
    }

    pub fn is_within_bounds(&self) -> bool {
        let mut projected = self.clone();
        projected.project();
        projected == *self
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Model probability before sentiment and clamping.
pub fn model_probability(features: &Features, params: &FillModelParameters) -> f64 {
    sigmoid(params.logit(features))
}

/// Fill probability for a resting maker order, in [0.01, 0.99].
pub fn estimate(inputs: &FillInputs, params: &FillModelParameters) -> f64 {
    let features = Features::from_inputs(inputs);
    let mut p = model_probability(&features, params);
    if let Some(bias) = inputs.sentiment.filter(|b| b.is_finite()) {
        let weight = params.sentiment_weight.clamp(0.0, MAX_SENTIMENT_DELTA);
        p += bias.clamp(-1.0, 1.0) * weight;
    }
    if !p.is_finite() {
        return MIN_PROBABILITY;
    }
    p.clamp(MIN_PROBABILITY, MAX_PROBABILITY)
}

/// A caller-supplied override wins over the model and is only clamped to [0, 1].
pub fn estimate_with_override(
    inputs: &FillInputs,
    params: &FillModelParameters,
    override_probability: Option<f64>,
) -> f64 {
    match override_probability {
        Some(p) if p.is_finite() => p.clamp(0.0, 1.0),
        Some(_) => 0.0,
        None => estimate(inputs, params),
    }
}
