//! Crossing detection logic
//!
//! Determines when a bid and ask can match based on price compatibility

use types::numeric::Price;
use types::order::Order;

/// Check if a bid and ask can match at given prices
///
/// The book is crossed while the best bid is at or above the best ask.
pub fn can_match(bid_price: Price, ask_price: Price) -> bool {
    bid_price >= ask_price
}

/// Check if a taker order will accept a maker's price.
///
/// A taker without a limit price (market) accepts any price.
pub fn taker_accepts(taker: &Order, maker_price: Price) -> bool {
    match taker.price {
        None => true,
        Some(limit) => match taker.side {
            types::order::Side::BUY => can_match(limit, maker_price),
            types::order::Side::SELL => can_match(maker_price, limit),
        },
    }
}
