//! Order ledger — system of record for orders and trades
//!
//! Every order row carries a version. A write names the version it expects
//! to replace; a mismatch is a conflict and the whole batch is refused.
//!
//! | Column            | Layout                         |
//! |-------------------|--------------------------------|
//! | side/type/status  | upper-case strings             |
//! | price, quantities | decimal, scale 8               |
//! | version           | u64, 0 = row does not exist    |

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use types::ids::{OrderId, OwnerId, Symbol, TradeId};
use types::order::Order;
use types::trade::Trade;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("version conflict on order {order_id}: expected {expected}, found {found}")]
    VersionConflict {
        order_id: OrderId,
        expected: u64,
        found: u64,
    },

    #[error("trade {0} already recorded")]
    DuplicateTrade(TradeId),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("ledger call timed out after {0:?}")]
    Timeout(Duration),
}

impl LedgerError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::VersionConflict { .. })
    }
}

// ── Writes ──────────────────────────────────────────────────────────

/// An order row to store, guarded by the version it replaces.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderWrite {
    pub order: Order,
    pub expected_version: u64,
}

impl OrderWrite {
    pub fn new(order: Order, expected_version: u64) -> Self {
        Self {
            order,
            expected_version,
        }
    }
}

/// Relational store behind settlement and the read-side queries.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Store order rows. Returns them with their new versions.
    async fn persist_orders(&self, writes: Vec<OrderWrite>) -> Result<Vec<Order>, LedgerError>;

    async fn persist_trade(&self, trade: &Trade) -> Result<(), LedgerError>;

    /// Store both orders of a match and the trade as one unit: all rows or
    /// none.
    async fn commit_settlement(
        &self,
        writes: Vec<OrderWrite>,
        trade: &Trade,
    ) -> Result<Vec<Order>, LedgerError>;

    async fn find_order_by_id(&self, order_id: OrderId) -> Result<Option<Order>, LedgerError>;

    /// Orders of `owner_id` whose `updated_at` lies in `[from, to]`.
    async fn find_orders_by_owner_and_window(
        &self,
        owner_id: &OwnerId,
        from: i64,
        to: i64,
    ) -> Result<Vec<Order>, LedgerError>;

    /// Newest trades of a symbol first.
    async fn recent_trades(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Trade>, LedgerError>;

    async fn find_trades_by_order(&self, order_id: OrderId) -> Result<Vec<Trade>, LedgerError>;
}

// ── In-memory ledger ────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    trades: Vec<Trade>,
    trade_ids: HashMap<TradeId, usize>,
}

impl Tables {
    fn check(&self, writes: &[OrderWrite]) -> Result<(), LedgerError> {
        for write in writes {
            let found = self
                .orders
                .get(&write.order.order_id)
                .map_or(0, |row| row.version);
            if found != write.expected_version {
                return Err(LedgerError::VersionConflict {
                    order_id: write.order.order_id,
                    expected: write.expected_version,
                    found,
                });
            }
        }
        Ok(())
    }

    fn apply(&mut self, writes: Vec<OrderWrite>) -> Vec<Order> {
        writes
            .into_iter()
            .map(|write| {
                let mut row = write.order;
                row.version = write.expected_version + 1;
                self.orders.insert(row.order_id, row.clone());
                row
            })
            .collect()
    }

    fn insert_trade(&mut self, trade: &Trade) {
        self.trade_ids.insert(trade.trade_id, self.trades.len());
        self.trades.push(trade.clone());
    }
}

/// Ledger kept in process memory, used by the gateway binary and tests.
///
/// All checks of a batch run before any row is written, under one write
/// lock, which gives the all-or-nothing behaviour of a transaction.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    tables: RwLock<Tables>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    pub async fn trade_count(&self) -> usize {
        self.tables.read().await.trades.len()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn persist_orders(&self, writes: Vec<OrderWrite>) -> Result<Vec<Order>, LedgerError> {
        let mut tables = self.tables.write().await;
        tables.check(&writes)?;
        Ok(tables.apply(writes))
    }

    async fn persist_trade(&self, trade: &Trade) -> Result<(), LedgerError> {
        let mut tables = self.tables.write().await;
        if tables.trade_ids.contains_key(&trade.trade_id) {
            return Err(LedgerError::DuplicateTrade(trade.trade_id));
        }
        tables.insert_trade(trade);
        Ok(())
    }

    async fn commit_settlement(
        &self,
        writes: Vec<OrderWrite>,
        trade: &Trade,
    ) -> Result<Vec<Order>, LedgerError> {
        let mut tables = self.tables.write().await;
        if tables.trade_ids.contains_key(&trade.trade_id) {
            return Err(LedgerError::DuplicateTrade(trade.trade_id));
        }
        tables.check(&writes)?;

        let stored = tables.apply(writes);
        tables.insert_trade(trade);
        Ok(stored)
    }

    async fn find_order_by_id(&self, order_id: OrderId) -> Result<Option<Order>, LedgerError> {
        Ok(self.tables.read().await.orders.get(&order_id).cloned())
    }

    async fn find_orders_by_owner_and_window(
        &self,
        owner_id: &OwnerId,
        from: i64,
        to: i64,
    ) -> Result<Vec<Order>, LedgerError> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| &o.owner_id == owner_id && (from..=to).contains(&o.updated_at))
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.updated_at, o.order_id));
        Ok(orders)
    }

    async fn recent_trades(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Trade>, LedgerError> {
        let tables = self.tables.read().await;
        Ok(tables
            .trades
            .iter()
            .rev()
            .filter(|t| &t.symbol == symbol)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_trades_by_order(&self, order_id: OrderId) -> Result<Vec<Trade>, LedgerError> {
        let tables = self.tables.read().await;
        Ok(tables
            .trades
            .iter()
            .filter(|t| t.involves(order_id))
            .cloned()
            .collect())
    }
}
