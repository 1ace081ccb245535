use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instrument(pub String);

impl Instrument {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchSide {
    Long,
    Short,
}

impl WatchSide {
    pub fn as_str(self) -> &'static str {
        match self {
            WatchSide::Long => "long",
            WatchSide::Short => "short",
        }
    }
}

impl fmt::Display for WatchSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which sides of each instrument are evaluated at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideFilter {
    Long,
    Short,
    #[default]
    Either,
}

impl SideFilter {
    pub fn sides(self) -> &'static [WatchSide] {
        match self {
            SideFilter::Long => &[WatchSide::Long],
            SideFilter::Short => &[WatchSide::Short],
            SideFilter::Either => &[WatchSide::Long, WatchSide::Short],
        }
    }

    pub fn admits(self, side: WatchSide) -> bool {
        self.sides().contains(&side)
    }
}

/// How the venue quotes the funding rate carried in a snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundingKind {
    #[default]
    #[serde(rename = "hourly")]
    Hourly,
    #[serde(rename = "8h")]
    EightHour,
}

impl FundingKind {
    pub fn to_hourly(self, rate: f64) -> f64 {
        match self {
            FundingKind::Hourly => rate,
            FundingKind::EightHour => rate / 8.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub qty: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookTopN {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBookTopN {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid(&self) -> Option<f64> {
        Some((self.best_bid()? + self.best_ask()?) / 2.0)
    }

    /// Notional resting in the first `k` levels of both sides.
    pub fn depth_notional_top_k(&self, k: usize) -> f64 {
        let side = |levels: &[BookLevel]| -> f64 {
            levels
                .iter()
                .take(k)
                .map(|l| (l.price * l.qty).max(0.0))
                .sum()
        };
        side(&self.bids) + side(&self.asks)
    }
}

/// One immutable observation of an instrument's market state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub instrument: Instrument,
    pub best_bid: f64,
    pub best_ask: f64,
    pub mid: f64,
    pub mark: f64,
    pub oracle: f64,
    /// Funding rate as quoted by the venue; see `FundingKind`.
    pub funding_rate: f64,
    /// 24h notional volume.
    pub volume_24h: f64,
    /// Sampled order-book depth (notional).
    pub depth: f64,
    /// Optional external sentiment in [-1, 1]; positive favours fills.
    #[serde(default)]
    pub sentiment: Option<f64>,
    pub ts: DateTime<Utc>,
}

/// Venue context that does not come from the book itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VenueContext {
    pub mark: f64,
    pub oracle: f64,
    pub funding_rate: f64,
    pub volume_24h: f64,
}

impl MarketSnapshot {
    /// Build a snapshot from a top-of-book sample. Returns `None` when either
    /// side of the book is empty.
    pub fn from_book(
        instrument: Instrument,
        book: &OrderBookTopN,
        ctx: &VenueContext,
        depth_levels: usize,
        ts: DateTime<Utc>,
    ) -> Option<Self> {
        Some(Self {
            instrument,
            best_bid: book.best_bid()?,
            best_ask: book.best_ask()?,
            mid: book.mid()?,
            mark: ctx.mark,
            oracle: ctx.oracle,
            funding_rate: ctx.funding_rate,
            volume_24h: ctx.volume_24h,
            depth: book.depth_notional_top_k(depth_levels),
            sentiment: None,
            ts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> OrderBookTopN {
        OrderBookTopN {
            bids: vec![
                BookLevel { price: 99.0, qty: 10.0 },
                BookLevel { price: 98.0, qty: 5.0 },
            ],
            asks: vec![BookLevel { price: 101.0, qty: 10.0 }],
        }
    }

    #[test]
    fn depth_sums_notional_of_top_levels() {
        let b = book();
        assert_eq!(b.depth_notional_top_k(1), 990.0 + 1010.0);
        assert_eq!(b.depth_notional_top_k(3), 990.0 + 490.0 + 1010.0);
    }

    #[test]
    fn snapshot_from_empty_side_is_none() {
        let mut b = book();
        b.asks.clear();
        let snap = MarketSnapshot::from_book(
            Instrument::new("BTC"),
            &b,
            &VenueContext::default(),
            3,
            Utc::now(),
        );
        assert!(snap.is_none());
    }

    #[test]
    fn side_filter_expands() {
        assert_eq!(SideFilter::Either.sides().len(), 2);
        assert!(SideFilter::Long.admits(WatchSide::Long));
        assert!(!SideFilter::Long.admits(WatchSide::Short));
        assert_eq!(FundingKind::EightHour.to_hourly(8e-4), 1e-4);
    }
}
