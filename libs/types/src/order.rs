//! Order lifecycle types
//!
//! `PENDING → PARTIALLY_FILLED → FILLED | CANCELLED`. Fills are applied only
//! by the matching engine; cancel and amend come in through intake.

use crate::errors::{OrderError, RejectReason};
use crate::ids::{OrderId, OwnerId, Symbol};
use crate::numeric::{Price, Quantity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    BUY,
    /// Sell order (ask)
    SELL,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::BUY => Side::SELL,
            Side::SELL => Side::BUY,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::BUY => "BUY",
            Side::SELL => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type
///
/// Every type except `Market` carries a limit price and may rest in the
/// book. Trigger evaluation for take-profit / stop-loss happens upstream;
/// by the time one reaches the core it behaves like a limit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    TakeProfit,
    StopLoss,
}

impl OrderType {
    pub fn requires_price(&self) -> bool {
        !matches!(self, OrderType::Market)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::StopLoss => "STOP_LOSS",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status, persisted as its upper-case string name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted and awaiting (further) matching
    Pending,
    /// Some quantity matched, remainder still resting
    PartiallyFilled,
    /// Completely matched (terminal)
    Filled,
    /// Canceled by the owner, or an unfilled market remainder (terminal)
    Cancelled,
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete order record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub owner_id: OwnerId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    /// Absent only for market orders
    pub price: Option<Price>,
    pub quantity: Quantity,
    pub filled_quantity: Quantity,
    pub unfilled_quantity: Quantity,
    pub status: OrderStatus,
    pub created_at: i64, // Unix nanos
    pub updated_at: i64, // Unix nanos
    /// Time-priority stamp; feeds the orderbook score
    pub modified_at: i64, // Unix nanos
    /// Ledger row version for optimistic locking. Owned by the ledger.
    pub version: u64,
}

impl Order {
    /// Create a new pending order
    pub fn new(
        owner_id: OwnerId,
        symbol: Symbol,
        side: Side,
        order_type: OrderType,
        price: Option<Price>,
        quantity: Quantity,
        timestamp: i64,
    ) -> Self {
        Self {
            order_id: OrderId::new(),
            owner_id,
            symbol,
            side,
            order_type,
            price,
            quantity,
            filled_quantity: Quantity::zero(),
            unfilled_quantity: quantity,
            status: OrderStatus::Pending,
            created_at: timestamp,
            updated_at: timestamp,
            modified_at: timestamp,
            version: 0,
        }
    }

    /// Check quantity invariant: filled + unfilled = original
    pub fn check_invariant(&self) -> bool {
        self.filled_quantity.as_decimal() + self.unfilled_quantity.as_decimal()
            == self.quantity.as_decimal()
    }

    /// Check if order is completely filled
    pub fn is_filled(&self) -> bool {
        self.unfilled_quantity.is_zero()
    }

    /// Check if order has any fills
    pub fn has_fills(&self) -> bool {
        !self.filled_quantity.is_zero()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a fill and move the status forward.
    pub fn fill(&mut self, fill_quantity: Quantity, timestamp: i64) -> Result<(), OrderError> {
        if self.is_terminal() {
            return Err(OrderError::AlreadyTerminal {
                order_id: self.order_id.to_string(),
                status: self.status.to_string(),
            });
        }
        if fill_quantity.is_zero() {
            return Err(OrderError::EmptyFill(self.order_id.to_string()));
        }

        let unfilled = self.unfilled_quantity.checked_sub(fill_quantity).ok_or_else(|| {
            OrderError::Overfill {
                order_id: self.order_id.to_string(),
                fill: fill_quantity.to_string(),
                unfilled: self.unfilled_quantity.to_string(),
            }
        })?;

        self.unfilled_quantity = unfilled;
        self.filled_quantity = self.filled_quantity + fill_quantity;
        self.status = if unfilled.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = timestamp;

        debug_assert!(self.check_invariant(), "invariant violated after fill");
        Ok(())
    }

    /// Cancel the order, keeping whatever was already filled.
    pub fn cancel(&mut self, timestamp: i64) -> Result<(), OrderError> {
        if self.is_terminal() {
            return Err(OrderError::AlreadyTerminal {
                order_id: self.order_id.to_string(),
                status: self.status.to_string(),
            });
        }

        self.status = OrderStatus::Cancelled;
        self.updated_at = timestamp;
        Ok(())
    }

    /// Replace price and total quantity of a live order.
    ///
    /// The new total must exceed what has already been filled. The caller
    /// is responsible for removing the old index entry and re-scoring.
    pub fn amend(
        &mut self,
        price: Price,
        quantity: Quantity,
        timestamp: i64,
    ) -> Result<(), RejectReason> {
        if !self.order_type.requires_price() {
            return Err(RejectReason::NotModifiable(self.order_type.to_string()));
        }
        let unfilled = match quantity.checked_sub(self.filled_quantity) {
            Some(q) if !q.is_zero() => q,
            _ => {
                return Err(RejectReason::QuantityBelowFilled {
                    requested: quantity.to_string(),
                    filled: self.filled_quantity.to_string(),
                })
            }
        };

        self.price = Some(price);
        self.quantity = quantity;
        self.unfilled_quantity = unfilled;
        self.updated_at = timestamp;
        self.modified_at = timestamp;
        Ok(())
    }
}
