//! Price-time priority score
//!
//! The sorted index orders entries by `price × 10^7 ∓ timestamp`: bids are
//! read highest-first, asks lowest-first, and within one price the earlier
//! timestamp wins on both sides.
//!
//! The two components are kept apart and compared lexicographically. Folded
//! into one scalar, a nanosecond timestamp (~1.7e18) would swamp a one-tick
//! price difference (1e-8 × 1e7 = 0.1), so price priority would be lost.

use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;
use types::numeric::Price;
use types::order::Side;

use super::index::IndexError;

/// Decimal precision exponent shared by every writer of the index.
pub const SCORE_PRECISION: u32 = 7;

fn scale() -> Decimal {
    Decimal::from(10u64.pow(SCORE_PRECISION))
}

/// Composite sort key of a resting order
///
/// `Ord` follows ascending score, so the best bid is the *greatest* bid
/// score and the best ask is the *least* ask score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriorityScore {
    scaled_price: Decimal,
    /// `-timestamp` for bids, `+timestamp` for asks
    time_key: i64,
}

impl PriorityScore {
    /// Compute the score of an order resting on `side`.
    pub fn compute(side: Side, price: Price, timestamp: i64) -> Result<Self, IndexError> {
        let time_key = match side {
            Side::BUY => timestamp.saturating_neg(),
            Side::SELL => timestamp,
        };
        let scaled_price = price
            .as_decimal()
            .checked_mul(scale())
            .ok_or_else(|| IndexError::ScoreOverflow(price.to_string()))?;
        Ok(Self {
            scaled_price,
            time_key,
        })
    }

    /// The single scalar `price × 10^7 ∓ timestamp`.
    pub fn value(&self) -> Decimal {
        self.scaled_price + Decimal::from(self.time_key)
    }

    /// Limit price recovered from the scaled component.
    pub fn price(&self) -> Option<Price> {
        Price::new(self.scaled_price / scale()).ok()
    }

    pub fn timestamp(&self) -> i64 {
        self.time_key.saturating_abs()
    }
}

impl Ord for PriorityScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.scaled_price
            .cmp(&other.scaled_price)
            .then(self.time_key.cmp(&other.time_key))
    }
}

impl PartialOrd for PriorityScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PriorityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Strictly increasing nanosecond clock owned by one matching worker.
///
/// Two orders admitted in the same nanosecond still get distinct timestamps
/// in arrival order, so no two live orders of a symbol share a score.
#[derive(Debug, Default)]
pub struct PriorityClock {
    last: i64,
}

impl PriorityClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp, never equal to or below a previous one.
    pub fn tick(&mut self) -> i64 {
        let now = types::now_nanos();
        self.last = if now > self.last { now } else { self.last + 1 };
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buy_score_scalar() {
        let score = PriorityScore::compute(Side::BUY, Price::from_u64(100), 5).unwrap();
        assert_eq!(score.value(), Decimal::from(1_000_000_000i64 - 5));
    }

    #[test]
    fn test_sell_score_scalar() {
        let score = PriorityScore::compute(Side::SELL, Price::from_u64(100), 5).unwrap();
        assert_eq!(score.value(), Decimal::from(1_000_000_005i64));
    }

    #[test]
    fn test_bid_priority() {
        let high = PriorityScore::compute(Side::BUY, Price::from_u64(101), 2_000).unwrap();
        let low = PriorityScore::compute(Side::BUY, Price::from_u64(100), 1_000).unwrap();
        let low_later = PriorityScore::compute(Side::BUY, Price::from_u64(100), 1_500).unwrap();

        // best bid = greatest score
        assert!(high > low);
        assert!(low > low_later, "earlier bid at same price ranks first");
    }

    #[test]
    fn test_ask_priority() {
        let cheap = PriorityScore::compute(Side::SELL, Price::from_u64(99), 2_000).unwrap();
        let dear = PriorityScore::compute(Side::SELL, Price::from_u64(100), 1_000).unwrap();
        let dear_later = PriorityScore::compute(Side::SELL, Price::from_u64(100), 1_500).unwrap();

        // best ask = least score
        assert!(cheap < dear);
        assert!(dear < dear_later, "earlier ask at same price ranks first");
    }

    #[test]
    fn test_price_priority_survives_real_timestamps() {
        let tick = Price::from_str("100.00000001").unwrap();
        let early = PriorityScore::compute(Side::BUY, Price::from_u64(100), 1_000).unwrap();
        let late_but_better =
            PriorityScore::compute(Side::BUY, tick, 1_708_123_456_789_000_000).unwrap();

        assert!(late_but_better > early);
    }

    #[test]
    fn test_price_recovered_from_score() {
        let price = Price::from_str("3000.12345678").unwrap();
        let score = PriorityScore::compute(Side::SELL, price, 42).unwrap();
        assert_eq!(score.price(), Some(price));
        assert_eq!(score.timestamp(), 42);
    }

    #[test]
    fn test_largest_price_scores_without_overflow() {
        let ceiling = Price::from_str("9999999999.99999999").unwrap();
        let score = PriorityScore::compute(Side::BUY, ceiling, i64::MAX).unwrap();
        assert_eq!(score.price(), Some(ceiling));
        assert!(score > PriorityScore::compute(Side::BUY, Price::from_u64(u64::MAX), 0).unwrap());
        assert!(score.value() < Decimal::MAX);
    }

    #[test]
    fn test_clock_strictly_increasing() {
        let mut clock = PriorityClock::new();
        let mut last = clock.tick();
        for _ in 0..1_000 {
            let next = clock.tick();
            assert!(next > last);
            last = next;
        }
    }
}
