use dashmap::DashMap;
use std::collections::VecDeque;

use crate::types::Instrument;

pub const DEFAULT_HISTORY_LEN: usize = 20;
pub const DEFAULT_WINDOW: usize = 5;
/// Mean absolute relative mid change that maps to volatility 1.0.
const FULL_SCALE_MOVE: f64 = 0.01;

/// Mean absolute relative change over the last `window` steps of `mids`,
/// scaled into [0, 1]. Fewer than two usable points give 0.
pub fn micro_volatility<'a>(mids: impl DoubleEndedIterator<Item = &'a f64>, window: usize) -> f64 {
    let recent: Vec<f64> = mids
        .rev()
        .take(window.saturating_add(1))
        .copied()
        .filter(|m| m.is_finite() && *m > 0.0)
        .collect();
    if recent.len() < 2 {
        return 0.0;
    }
    let moves: Vec<f64> = recent
        .windows(2)
        .map(|pair| ((pair[0] - pair[1]) / pair[1]).abs())
        .collect();
    let mean = moves.iter().sum::<f64>() / moves.len() as f64;
    (mean / FULL_SCALE_MOVE).clamp(0.0, 1.0)
}

/// Bounded per-instrument mid history feeding the volatility proxy.
#[derive(Debug)]
pub struct MidHistory {
    max_len: usize,
    window: usize,
    mids: DashMap<Instrument, VecDeque<f64>>,
}

impl Default for MidHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LEN, DEFAULT_WINDOW)
    }
}

impl MidHistory {
    pub fn new(max_len: usize, window: usize) -> Self {
        Self {
            max_len: max_len.max(2),
            window: window.max(1),
            mids: DashMap::new(),
        }
    }

    pub fn record(&self, instrument: &Instrument, mid: f64) {
        if !(mid.is_finite() && mid > 0.0) {
            return;
        }
        let mut entry = self.mids.entry(instrument.clone()).or_default();
        entry.push_back(mid);
        while entry.len() > self.max_len {
            entry.pop_front();
        }
    }

    pub fn volatility(&self, instrument: &Instrument) -> f64 {
        self.mids
            .get(instrument)
            .map_or(0.0, |h| micro_volatility(h.iter(), self.window))
    }

    pub fn len(&self, instrument: &Instrument) -> usize {
        self.mids.get(instrument).map_or(0, |h| h.len())
    }

    /// Drop history for instruments no longer watched.
    pub fn retain(&self, keep: impl Fn(&Instrument) -> bool) {
        self.mids.retain(|k, _| keep(k));
    }
}
