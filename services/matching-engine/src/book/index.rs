//! Orderbook index
//!
//! Per `(symbol, side)` a sorted set of `score → member`, plus a record
//! store holding the full order by id. Only live (non-terminal, priced)
//! orders are ever stored.
//!
//! Writes for one symbol come from exactly one matching worker. Readers
//! such as the depth builder may scan concurrently and observe a book that
//! is mid-update.

use dashmap::DashMap;
use std::collections::BTreeMap;
use thiserror::Error;
use types::ids::{OrderId, Symbol};
use types::numeric::{Price, Quantity};
use types::order::{Order, Side};

use super::member::Member;
use super::score::PriorityScore;

/// Index failures. All of them abort the current matching cycle; the
/// transient ones are retried by the worker that owns the symbol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("index call timed out: {0}")]
    Timeout(String),

    #[error("index unavailable: {0}")]
    Unavailable(String),

    #[error("index corrupt: {0}")]
    Corrupt(String),

    #[error("order {0} has no limit price and cannot rest")]
    Unpriced(OrderId),

    #[error("price {0} is too large to score")]
    ScoreOverflow(String),
}

/// One entry read back from a side of the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestingOrder {
    pub score: PriorityScore,
    pub price: Price,
    pub member: Member,
}

impl RestingOrder {
    fn decode(score: PriorityScore, raw: &str) -> Result<Self, IndexError> {
        let member = Member::decode(raw)?;
        let price = score
            .price()
            .ok_or_else(|| IndexError::Corrupt(format!("score {score} carries no valid price")))?;
        Ok(Self { score, price, member })
    }

    pub fn order_id(&self) -> OrderId {
        self.member.order_id
    }

    pub fn unfilled(&self) -> Quantity {
        self.member.unfilled
    }
}

/// A single mutation inside an atomic [`OrderbookIndex::commit`].
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOp {
    /// Insert or replace the order's record and sorted-set entry.
    Upsert(Order),
    /// Drop the order from both structures; absent ids are ignored.
    Remove(OrderId),
}

/// Storage seam between the matching engine and the live book.
pub trait OrderbookIndex: Send + Sync {
    /// Best entry of one side: highest bid or lowest ask, earliest first.
    fn best(&self, symbol: &Symbol, side: Side) -> Result<Option<RestingOrder>, IndexError>;

    /// Full record of a resting order.
    fn get(&self, order_id: OrderId) -> Result<Option<Order>, IndexError>;

    /// Every entry of one side in priority order. Read-only.
    fn side_entries(&self, symbol: &Symbol, side: Side) -> Result<Vec<RestingOrder>, IndexError>;

    /// Apply `ops` as one unit. The batch is validated before anything is
    /// written, so a rejected batch leaves the index untouched.
    fn commit(&self, ops: Vec<IndexOp>) -> Result<(), IndexError>;
}

type Ladder = BTreeMap<(PriorityScore, OrderId), String>;

/// In-process index backed by `dashmap`.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    ladders: DashMap<(Symbol, Side), Ladder>,
    records: DashMap<OrderId, Order>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resting orders across all symbols.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn score_of(order: &Order) -> Result<PriorityScore, IndexError> {
        let price = order.price.ok_or(IndexError::Unpriced(order.order_id))?;
        PriorityScore::compute(order.side, price, order.modified_at)
    }

    fn validate(op: &IndexOp) -> Result<(), IndexError> {
        match op {
            IndexOp::Upsert(order) => {
                Self::score_of(order)?;
                if order.is_terminal() || order.unfilled_quantity.is_zero() {
                    return Err(IndexError::Corrupt(format!(
                        "order {} is {} with unfilled {} and cannot rest",
                        order.order_id, order.status, order.unfilled_quantity
                    )));
                }
                Ok(())
            }
            IndexOp::Remove(_) => Ok(()),
        }
    }

    fn detach(&self, previous: &Order) {
        let Ok(score) = Self::score_of(previous) else {
            return;
        };
        let key = (previous.symbol.clone(), previous.side);
        if let Some(mut ladder) = self.ladders.get_mut(&key) {
            ladder.remove(&(score, previous.order_id));
        }
    }

    fn apply(&self, op: IndexOp) -> Result<(), IndexError> {
        match op {
            IndexOp::Upsert(order) => {
                let score = Self::score_of(&order)?;
                let key = (order.symbol.clone(), order.side);
                let member = Member::of(&order).encode();
                let order_id = order.order_id;

                if let Some(previous) = self.records.insert(order_id, order) {
                    self.detach(&previous);
                }
                self.ladders
                    .entry(key)
                    .or_default()
                    .insert((score, order_id), member);
            }
            IndexOp::Remove(order_id) => {
                if let Some((_, previous)) = self.records.remove(&order_id) {
                    self.detach(&previous);
                }
            }
        }
        Ok(())
    }
}

impl OrderbookIndex for MemoryIndex {
    fn best(&self, symbol: &Symbol, side: Side) -> Result<Option<RestingOrder>, IndexError> {
        let Some(ladder) = self.ladders.get(&(symbol.clone(), side)) else {
            return Ok(None);
        };
        let top = match side {
            Side::BUY => ladder.iter().next_back(),
            Side::SELL => ladder.iter().next(),
        };
        top.map(|((score, _), raw)| RestingOrder::decode(*score, raw))
            .transpose()
    }

    fn get(&self, order_id: OrderId) -> Result<Option<Order>, IndexError> {
        Ok(self.records.get(&order_id).map(|entry| entry.value().clone()))
    }

    fn side_entries(&self, symbol: &Symbol, side: Side) -> Result<Vec<RestingOrder>, IndexError> {
        let Some(ladder) = self.ladders.get(&(symbol.clone(), side)) else {
            return Ok(Vec::new());
        };
        let decode = |((score, _), raw): (&(PriorityScore, OrderId), &String)| {
            RestingOrder::decode(*score, raw)
        };
        let entries = match side {
            Side::BUY => ladder.iter().rev().map(decode).collect(),
            Side::SELL => ladder.iter().map(decode).collect(),
        };
        entries
    }

    fn commit(&self, ops: Vec<IndexOp>) -> Result<(), IndexError> {
        for op in &ops {
            Self::validate(op)?;
        }
        for op in ops {
            self.apply(op)?;
        }
        Ok(())
    }
}
