//! Depth snapshots for the Market Data Service
//!
//! Reads both sides of a symbol's book from the orderbook index, buckets
//! every resting order by `floor(price / interval) × interval`, and keeps
//! the five best buckets per side. Read-only: the builder never takes part
//! in matching and may observe a book that is changing underneath it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use types::ids::Symbol;
use types::numeric::{Quantity, MAX_SCALE};
use types::order::Side;

use matching_engine::book::{IndexError, OrderbookIndex, RestingOrder};

/// Levels kept per side.
pub const MAX_LEVELS: usize = 5;

/// Bucket width used when the caller does not choose one.
pub fn default_bucket_interval() -> Decimal {
    Decimal::from(1000)
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("bucket interval must be positive, got {0}")]
    NonPositiveInterval(Decimal),

    #[error("bucket interval {0} is out of range")]
    IntervalOutOfRange(Decimal),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Aggregated quantity at one price bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    /// Lower bound of the bucket
    pub price: Decimal,
    pub quantity: Quantity,
}

/// Leveled view of one symbol's book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub symbol: Symbol,
    /// Descending by price (best first)
    pub bids: Vec<DepthLevel>,
    /// Ascending by price (best first)
    pub asks: Vec<DepthLevel>,
    /// Unix nanoseconds when the snapshot was read.
    pub timestamp: i64,
    /// SHA-256 over symbol and levels; equal books give equal checksums.
    pub checksum: String,
}

/// Start of the bucket that contains `price`, or `None` if the division
/// leaves the decimal range.
pub fn bucket(price: Decimal, interval: Decimal) -> Option<Decimal> {
    let steps = price.checked_div(interval)?.floor();
    Some(steps.checked_mul(interval)?.normalize())
}

/// Sum unfilled quantity per bucket and keep the best `levels` buckets.
///
/// `entries` may come in any order.
pub fn aggregate(
    entries: &[RestingOrder],
    side: Side,
    interval: Decimal,
    levels: usize,
) -> Result<Vec<DepthLevel>, SnapshotError> {
    let mut buckets: BTreeMap<Decimal, Decimal> = BTreeMap::new();
    for entry in entries {
        let start = bucket(entry.price.as_decimal(), interval)
            .ok_or(SnapshotError::IntervalOutOfRange(interval))?;
        *buckets.entry(start).or_insert(Decimal::ZERO) += entry.unfilled().as_decimal();
    }

    let to_level = |(price, quantity): (Decimal, Decimal)| DepthLevel {
        price,
        quantity: Quantity::try_new(quantity).unwrap_or_else(|_| Quantity::zero()),
    };
    Ok(match side {
        Side::BUY => buckets.into_iter().rev().take(levels).map(to_level).collect(),
        Side::SELL => buckets.into_iter().take(levels).map(to_level).collect(),
    })
}

/// Compute a SHA-256 checksum over the symbol and both sides.
fn compute_checksum(symbol: &Symbol, bids: &[DepthLevel], asks: &[DepthLevel]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_str().as_bytes());
    hasher.update(b"---");

    for level in bids {
        hasher.update(level.price.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(level.quantity.to_string().as_bytes());
        hasher.update(b"|");
    }
    hasher.update(b"---");

    for level in asks {
        hasher.update(level.price.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(level.quantity.to_string().as_bytes());
        hasher.update(b"|");
    }

    format!("{:x}", hasher.finalize())
}

/// Verify that a snapshot's checksum matches its content.
pub fn verify_snapshot_integrity(snapshot: &DepthSnapshot) -> bool {
    snapshot.checksum == compute_checksum(&snapshot.symbol, &snapshot.bids, &snapshot.asks)
}

/// Builds depth snapshots straight from the orderbook index.
#[derive(Clone)]
pub struct DepthSnapshotBuilder {
    index: Arc<dyn OrderbookIndex>,
    levels: usize,
}

impl DepthSnapshotBuilder {
    pub fn new(index: Arc<dyn OrderbookIndex>) -> Self {
        Self {
            index,
            levels: MAX_LEVELS,
        }
    }

    pub fn with_levels(mut self, levels: usize) -> Self {
        self.levels = levels;
        self
    }

    pub fn snapshot(&self, symbol: &Symbol, interval: Decimal) -> Result<DepthSnapshot, SnapshotError> {
        if interval <= Decimal::ZERO {
            return Err(SnapshotError::NonPositiveInterval(interval));
        }
        // finer than any price can be, so every quotient would overflow
        if interval.normalize().scale() > MAX_SCALE {
            return Err(SnapshotError::IntervalOutOfRange(interval));
        }

        let bid_entries = self.index.side_entries(symbol, Side::BUY)?;
        let ask_entries = self.index.side_entries(symbol, Side::SELL)?;

        let bids = aggregate(&bid_entries, Side::BUY, interval, self.levels)?;
        let asks = aggregate(&ask_entries, Side::SELL, interval, self.levels)?;
        let checksum = compute_checksum(symbol, &bids, &asks);

        Ok(DepthSnapshot {
            symbol: symbol.clone(),
            bids,
            asks,
            timestamp: types::now_nanos(),
            checksum,
        })
    }
}
