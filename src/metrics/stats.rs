use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

const SIGNIFICANT_FIGURES: u8 = 3;

/// Filled/missed tallies from fill feedback.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackCounters {
    pub filled: u64,
    pub missed: u64,
}

impl FeedbackCounters {
    pub fn total(&self) -> u64 {
        self.filled + self.missed
    }

    pub fn observed_fill_rate(&self) -> f64 {
        let denom = self.total();
        if denom == 0 {
            return 0.0;
        }
        (self.filled as f64) / (denom as f64)
    }
}

#[derive(Clone, Debug)]
pub struct Histo {
    /// Values are stored as integers (e.g. microseconds).
    inner: Option<Histogram<u64>>,
}

impl Default for Histo {
    fn default() -> Self {
        Self {
            inner: Histogram::new(SIGNIFICANT_FIGURES).ok(),
        }
    }
}

impl Histo {
    pub fn record(&mut self, v: u64) {
        if let Some(h) = self.inner.as_mut() {
            let _ = h.record(v.max(1));
        }
    }

    fn quantile(&self, q: f64) -> u64 {
        self.inner.as_ref().map_or(0, |h| h.value_at_quantile(q))
    }

    pub fn p50(&self) -> u64 {
        self.quantile(0.50)
    }

    pub fn p95(&self) -> u64 {
        self.quantile(0.95)
    }

    pub fn max(&self) -> u64 {
        self.inner.as_ref().map_or(0, |h| h.max())
    }

    pub fn count(&self) -> u64 {
        self.inner.as_ref().map_or(0, |h| h.len())
    }
}
