use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::types::{BookLevel, Instrument, MarketSnapshot, OrderBookTopN, VenueContext};

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_snapshot(&self, instrument: &Instrument) -> anyhow::Result<MarketSnapshot>;
}

/// Random-walk market for demos and soak runs. Each instrument starts at
/// `base_mid` and drifts a few bps per fetch; book and venue context are
/// resampled every time.
pub struct SyntheticSource {
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
    mids: Mutex<HashMap<Instrument, f64>>,
    base_mid: f64,
    levels: usize,
}

impl SyntheticSource {
    pub fn new(clock: Arc<dyn Clock>, seed: u64) -> Self {
        Self {
            clock,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            mids: Mutex::new(HashMap::new()),
            base_mid: 100.0,
            levels: 5,
        }
    }

    pub fn with_base_mid(mut self, base_mid: f64) -> Self {
        self.base_mid = base_mid;
        self
    }

    fn synth_book(rng: &mut StdRng, mid: f64, levels: usize) -> OrderBookTopN {
        let spread_bps = rng.gen_range(0.5..6.0);
        let half = mid * spread_bps / 20_000.0;
        let tick = mid * 0.0001;
        let mut level = |px: f64| BookLevel {
            price: px,
            qty: rng.gen_range(200.0..4_000.0) / px,
        };
        let bids = (0..levels).map(|i| level(mid - half - tick * i as f64)).collect();
        let asks = (0..levels).map(|i| level(mid + half + tick * i as f64)).collect();
        OrderBookTopN { bids, asks }
    }
}

#[async_trait]
impl MarketDataSource for SyntheticSource {
    async fn fetch_snapshot(&self, instrument: &Instrument) -> anyhow::Result<MarketSnapshot> {
        let mut rng = self.rng.lock();
        let mid = {
            let mut mids = self.mids.lock();
            let mid = mids.entry(instrument.clone()).or_insert(self.base_mid);
            *mid *= 1.0 + rng.gen_range(-0.0004..=0.0004);
            *mid
        };
        let book = Self::synth_book(&mut rng, mid, self.levels);
        let ctx = VenueContext {
            mark: mid * (1.0 + rng.gen_range(-0.0004..=0.0004)),
            oracle: mid * (1.0 + rng.gen_range(-0.0008..=0.0008)),
            funding_rate: rng.gen_range(-3e-5..=3e-5),
            volume_24h: rng.gen_range(2e6..2e7),
        };
        let mut snap = MarketSnapshot::from_book(instrument.clone(), &book, &ctx, self.levels, self.clock.now())
            .ok_or_else(|| anyhow::anyhow!("synthetic book for {instrument} has an empty side"))?;
        if rng.gen_bool(0.5) {
            snap.sentiment = Some(rng.gen_range(-0.3..=0.3));
        }
        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::scoring::RawMetrics;
    use crate::types::FundingKind;

    #[tokio::test]
    async fn synthetic_snapshots_are_well_formed() {
        let source = SyntheticSource::new(Arc::new(SystemClock), 7).with_base_mid(2_500.0);
        let eth = Instrument::new("ETH");
        for _ in 0..50 {
            let snap = source.fetch_snapshot(&eth).await.unwrap();
            assert!(snap.best_bid < snap.best_ask);
            assert!(snap.depth > 0.0);
            RawMetrics::from_snapshot(&snap, FundingKind::Hourly).unwrap();
        }
    }
}
