//! Maker-safe limit prices for a suggested open/close round trip.
//!
//! Offsets are measured away from the touch: a buy rests `offset_bps` below
//! the best bid, a sell rests `offset_bps` above the best ask. Prices are then
//! clamped so they never cross the book.

use crate::events::Leg;
use crate::types::WatchSide;

fn buys_on(side: WatchSide, leg: Leg) -> bool {
    matches!(
        (side, leg),
        (WatchSide::Long, Leg::Open) | (WatchSide::Short, Leg::Close)
    )
}

pub fn maker_limit_price(side: WatchSide, leg: Leg, best_bid: f64, best_ask: f64, offset_bps: f64) -> f64 {
    let offset = offset_bps.max(0.0) / 10_000.0;
    if buys_on(side, leg) {
        (best_bid * (1.0 - offset)).min(best_bid)
    } else {
        (best_ask * (1.0 + offset)).max(best_ask)
    }
}

/// `(open, close)` limit prices for `side`.
pub fn suggested_limit_prices(
    side: WatchSide,
    best_bid: f64,
    best_ask: f64,
    open_offset_bps: f64,
    close_offset_bps: f64,
) -> (f64, f64) {
    (
        maker_limit_price(side, Leg::Open, best_bid, best_ask, open_offset_bps),
        maker_limit_price(side, Leg::Close, best_bid, best_ask, close_offset_bps),
    )
}
